//! Outcome report publishing.

use crate::metrics::ReportMetrics;
use mq_listener_core::{MessageBus, OutcomeReport};
use std::sync::Arc;

/// Publishes outcome reports to the reporting topic.
///
/// Publishing is best effort: failures are logged and counted, never retried.
pub struct Reporter {
    bus: Arc<dyn MessageBus>,
    topic: String,
    key: String,
}

impl Reporter {
    /// Create a reporter publishing to `topic` with the fixed record `key`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            key: key.into(),
        }
    }

    /// The reporting topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The key reports are published with.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish a report, logging and dropping it on failure.
    pub async fn report(&self, outcome: &OutcomeReport) {
        let payload = match outcome.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    topic = %outcome.listen_topic,
                    error = %e,
                    "Failed to serialize outcome report"
                );
                ReportMetrics::record_failed();
                return;
            }
        };

        match self.bus.publish(&self.topic, &self.key, &payload).await {
            Ok(()) => {
                tracing::debug!(
                    report_topic = %self.topic,
                    listen_topic = %outcome.listen_topic,
                    result = outcome.result.as_str(),
                    "Outcome report published"
                );
                ReportMetrics::record_published();
            }
            Err(e) => {
                tracing::error!(
                    report_topic = %self.topic,
                    listen_topic = %outcome.listen_topic,
                    error = %e,
                    "Failed to publish outcome report"
                );
                ReportMetrics::record_failed();
            }
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
