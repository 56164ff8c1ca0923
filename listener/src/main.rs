//! MQ listener daemon.
//!
//! Loads the listener configuration, connects to the broker and runs the
//! configured commands whenever a watched topic changes.
//!
//! # Running
//!
//! ```bash
//! mq-listener --conf /etc/mq-listener/config.toml
//! ```
//!
//! The config path falls back to `CONFIG_FILEPATH`, then `./config.toml`.
//! A `.env` file in the working directory is loaded before the environment
//! overrides are applied. `RUST_LOG` takes precedence over the `debug` flag.

use anyhow::Context;
use clap::Parser;
use mq_listener_core::config::AppConfig;
use mq_listener_core::environment::SystemClock;
use mq_listener_core::MessageBus;
use mq_listener_redpanda::RedpandaMessageBus;
use mq_listener_runtime::metrics::MetricsServer;
use mq_listener_runtime::{Engine, ProcessRunner, Reporter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "mq-listener", version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long = "conf", value_name = "PATH")]
    conf: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let path = AppConfig::resolve_path(cli.conf, |key| std::env::var(key).ok());
    let config = AppConfig::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        name = %config.name,
        config = %path.display(),
        listeners = config.listeners.len(),
        report_topic = %config.report_topic(),
        "Starting MQ listener"
    );

    if let Some(addr) = config.metrics_addr {
        MetricsServer::new(addr)
            .serve()
            .context("failed to start metrics server")?;
    }

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaMessageBus::from_config(&config.broker).context("failed to connect to broker")?,
    );
    let reporter = Reporter::new(
        Arc::clone(&bus),
        config.report_topic(),
        config.report_key(),
    );
    let engine = Engine::new(
        config.listeners(),
        Arc::new(ProcessRunner),
        reporter,
        Arc::new(SystemClock),
    );

    engine
        .run(bus.as_ref(), shutdown_signal())
        .await
        .context("listener stopped with an error")?;

    engine
        .shutdown(config.shutdown_timeout())
        .await
        .context("dispatches still running at exit")?;

    tracing::info!("MQ listener stopped");
    Ok(())
}

/// Resolves on Ctrl-C (SIGINT).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
