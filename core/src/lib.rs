//! # MQ Listener Core
//!
//! Core types for the MQ listener: a service that watches keyed records on
//! a set of topics, keeps a per-topic snapshot of the last key and value,
//! and runs an external command when a configured transition happens.
//!
//! ## Core Concepts
//!
//! - **Field schema** ([`schema`]): the expected fields of a topic's value and how to decode it
//! - **Trigger rule** ([`rule`]): when (`received` / `updated`) and by what (`key` / `value`) to fire
//! - **Topic state** ([`state`]): last/current key, value and checksum for one topic
//! - **Detector** ([`detector`]): pure decision over a rule and a topic state
//! - **Command line** ([`command`]): the argv built from a rule's template and the trigger argument
//! - **Outcome report** ([`outcome`]): what gets published back after a command ran
//! - **Message bus** ([`message_bus`]): the transport seam (subscribe / publish)
//!
//! ## Processing Order
//!
//! For every record on a topic the order is fixed:
//!
//! ```text
//! update(current) ──▶ evaluate(last vs current) ──▶ exchange(current → last)
//! ```
//!
//! ## Example
//!
//! ```
//! use mq_listener_core::config::ListenerConfig;
//! use mq_listener_core::detector::should_trigger;
//! use mq_listener_core::environment::SystemClock;
//! use mq_listener_core::state::TopicState;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config: ListenerConfig = toml::from_str(
//!     r#"
//!     topic = "sensor"
//!     monitor = { where = "value", on_event = "updated", field_name = "temp", cmd = "notify.sh" }
//!     value = { fields = [{ name = "temp", type = "float" }] }
//!     "#,
//! )?;
//! let listener = Arc::new(config.into_listener());
//! let mut state = TopicState::new(Arc::clone(&listener), &SystemClock);
//!
//! let _ = state.update("k", br#"{"temp": 20.0}"#);
//! assert!(should_trigger(&listener, &state));
//! state.exchange(&SystemClock);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// CRC-16 checksum over raw value payloads
pub mod checksum;

/// Command line construction for triggered actions
pub mod command;

/// Listener configuration and loading
pub mod config;

/// Transition detection
pub mod detector;

/// Message bus abstraction (subscribe / publish)
pub mod message_bus;

/// Dispatch outcome reports
pub mod outcome;

/// Inbound and outbound records
pub mod record;

/// Trigger rules and validated listeners
pub mod rule;

/// Field schemas and value decoding
pub mod schema;

/// Per-topic state container
pub mod state;

/// Tagged field values
pub mod value;

/// Environment module - Injected dependencies via traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use command::CommandLine;
pub use detector::{Detection, evaluate, should_trigger};
pub use message_bus::{MessageBus, MessageBusError, MessageStream};
pub use outcome::{DispatchResult, OutcomeReport};
pub use record::{Position, Record};
pub use rule::{Listener, TriggerBy, TriggerOn, TriggerRule, ValueTrigger};
pub use schema::{DecodeError, DecodeFormat, FieldSpec, FieldType, ValueSchema};
pub use state::TopicState;
pub use value::{FieldValue, ValueSnapshot};
