//! # MQ Listener Runtime
//!
//! Runtime for the MQ listener.
//!
//! This crate drives records from a [`MessageBus`](mq_listener_core::MessageBus)
//! through each topic's state container and runs the configured command
//! whenever a transition fires.
//!
//! ## Core Components
//!
//! - **Engine**: Owns the per-topic state, ingests records and spawns dispatches
//! - **Dispatcher**: Runs the resolved command line through a [`CommandRunner`]
//! - **Reporter**: Publishes an outcome report for every dispatch
//! - **Metrics**: Prometheus counters and histograms for all of the above
//!
//! ## Example
//!
//! ```ignore
//! use mq_listener_runtime::{Engine, ProcessRunner, Reporter};
//!
//! let reporter = Reporter::new(Arc::clone(&bus), "MQ_LISTENER", "MQ_LISTENER_EDGE");
//! let engine = Engine::new(config.listeners(), Arc::new(ProcessRunner), reporter, Arc::new(SystemClock));
//!
//! engine.run(bus.as_ref(), shutdown_signal()).await?;
//! engine.shutdown(Duration::from_secs(30)).await?;
//! ```

/// Command execution for triggered rules
pub mod dispatcher;

/// Record ingestion and per-topic orchestration
pub mod engine;

/// Prometheus metrics for observability
pub mod metrics;

/// Outcome report publishing
pub mod reporter;

/// Error types for the engine
pub mod error {
    use mq_listener_core::MessageBusError;
    use thiserror::Error;

    /// Errors that can occur while running the engine
    #[derive(Error, Debug)]
    pub enum EngineError {
        /// Subscribing to the listener topics failed
        ///
        /// Ingestion never started.
        #[error("Failed to subscribe to listener topics: {0}")]
        Subscribe(#[source] MessageBusError),

        /// Shutdown timed out waiting for dispatches to complete
        ///
        /// Some commands were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} dispatches still running")]
        ShutdownTimeout(usize),
    }
}

pub use dispatcher::{CommandOutput, CommandRunner, DispatchJob, Dispatcher, ProcessRunner};
pub use engine::{Engine, Handled};
pub use error::EngineError;
pub use reporter::Reporter;
