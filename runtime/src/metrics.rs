//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the listener:
//! - Record ingestion (received, duplicate, ignored, decode failures)
//! - Triggers by detection kind
//! - Command dispatch results and duration
//! - Outcome report publishing
//!
//! # Example
//!
//! ```rust,no_run
//! use mq_listener_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Expose metrics on port 9100
//! let mut server = MetricsServer::new("0.0.0.0:9100".parse()?);
//! server.serve()?;
//!
//! // Metrics available at http://localhost:9100/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use mq_listener_core::{Detection, DispatchResult};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9100`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the Prometheus recorder without an HTTP endpoint.
    ///
    /// Metrics can then be read through [`MetricsServer::render`].
    ///
    /// # Errors
    ///
    /// Returns error if the metrics exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), a warning
    /// is logged and the call succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match Self::builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Install the Prometheus recorder and serve it over HTTP.
    ///
    /// Must be called from within a Tokio runtime: the exporter runs as a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or the recorder cannot
    /// be installed.
    pub fn serve(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = Self::builder()?
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        metrics::set_global_recorder(recorder)
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        let addr = self.addr;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    fn builder() -> Result<PrometheusBuilder, MetricsError> {
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))
    }

    /// The configured listen address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Ingestion Metrics
    describe_counter!(
        "mq_listener_records_received_total",
        "Total number of records received from the message bus"
    );
    describe_counter!(
        "mq_listener_records_duplicate_total",
        "Total number of redelivered records dropped"
    );
    describe_counter!(
        "mq_listener_records_ignored_total",
        "Total number of records on topics without a listener"
    );
    describe_counter!(
        "mq_listener_decode_failures_total",
        "Total number of record values that failed to decode"
    );
    describe_counter!(
        "mq_listener_consume_errors_total",
        "Total number of errors reported by the subscription stream"
    );

    // Trigger Metrics
    describe_counter!(
        "mq_listener_triggers_total",
        "Total number of rule transitions that fired"
    );

    // Dispatch Metrics
    describe_counter!(
        "mq_listener_dispatches_total",
        "Total number of commands dispatched, by result"
    );
    describe_histogram!(
        "mq_listener_dispatch_duration_seconds",
        "Time taken to run dispatched commands"
    );

    // Reporting Metrics
    describe_counter!(
        "mq_listener_reports_published_total",
        "Total number of outcome reports published"
    );
    describe_counter!(
        "mq_listener_reports_failed_total",
        "Total number of outcome reports that could not be published"
    );
}

/// Ingestion metrics recorder.
pub struct ListenerMetrics;

impl ListenerMetrics {
    /// Record a received record.
    pub fn record_received(topic: &str) {
        counter!("mq_listener_records_received_total", "topic" => topic.to_owned()).increment(1);
    }

    /// Record a dropped redelivery.
    pub fn record_duplicate(topic: &str) {
        counter!("mq_listener_records_duplicate_total", "topic" => topic.to_owned()).increment(1);
    }

    /// Record a record on an unconfigured topic.
    pub fn record_ignored() {
        counter!("mq_listener_records_ignored_total").increment(1);
    }

    /// Record a value decode failure.
    pub fn record_decode_failure(topic: &str) {
        counter!("mq_listener_decode_failures_total", "topic" => topic.to_owned()).increment(1);
    }

    /// Record an error from the subscription stream.
    pub fn record_consume_error() {
        counter!("mq_listener_consume_errors_total").increment(1);
    }

    /// Record a fired transition.
    pub fn record_trigger(topic: &str, detection: Detection) {
        let kind = match detection {
            Detection::Idle => "idle",
            Detection::Received => "received",
            Detection::KeyChanged => "key_changed",
            Detection::FieldChanged => "field_changed",
            Detection::ChecksumChanged => "checksum_changed",
        };
        counter!(
            "mq_listener_triggers_total",
            "topic" => topic.to_owned(),
            "detection" => kind
        )
        .increment(1);
    }
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a finished dispatch.
    pub fn record(topic: &str, result: DispatchResult, duration: Duration) {
        counter!(
            "mq_listener_dispatches_total",
            "topic" => topic.to_owned(),
            "result" => result.as_str()
        )
        .increment(1);
        histogram!("mq_listener_dispatch_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Outcome report metrics recorder.
pub struct ReportMetrics;

impl ReportMetrics {
    /// Record a published report.
    pub fn record_published() {
        counter!("mq_listener_reports_published_total").increment(1);
    }

    /// Record a report that could not be published.
    pub fn record_failed() {
        counter!("mq_listener_reports_failed_total").increment(1);
    }
}
