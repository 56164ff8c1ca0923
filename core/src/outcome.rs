//! Dispatch outcome reports.
//!
//! After a triggered command ran, an [`OutcomeReport`] describing it is
//! published to the reporting topic as JSON.

use crate::rule::{TriggerBy, TriggerOn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the command succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchResult {
    /// Exited with status zero
    Succeed,
    /// Could not be started or exited non-zero
    Failed,
}

impl DispatchResult {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeed => "succeed",
            Self::Failed => "failed",
        }
    }
}

/// The record published after a dispatch.
///
/// # Examples
///
/// ```
/// use mq_listener_core::outcome::{DispatchResult, OutcomeReport};
/// use mq_listener_core::rule::{TriggerBy, TriggerOn};
///
/// let report = OutcomeReport {
///     listen_topic: "sensor".to_string(),
///     on_event: TriggerOn::Updated,
///     trigger_by: TriggerBy::Value,
///     field_name: "temp".to_string(),
///     cmd: "notify.sh 21.5".to_string(),
///     result: DispatchResult::Succeed,
///     output: "ok\n".to_string(),
///     exit_code: Some(0),
///     finished_at: chrono::Utc::now(),
/// };
///
/// let json: serde_json::Value = serde_json::from_slice(&report.to_json()?)?;
/// assert_eq!(json["where"], "value");
/// assert_eq!(json["result"], "SUCCEED");
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Topic whose transition triggered the command
    pub listen_topic: String,
    /// Trigger timing
    pub on_event: TriggerOn,
    /// Trigger basis
    #[serde(rename = "where")]
    pub trigger_by: TriggerBy,
    /// Watched field, empty when none
    pub field_name: String,
    /// The command line that ran
    pub cmd: String,
    /// Outcome
    pub result: DispatchResult,
    /// Captured stdout followed by stderr, or the spawn error
    pub output: String,
    /// Exit code, when the process exited normally
    pub exit_code: Option<i32>,
    /// When the command finished
    pub finished_at: DateTime<Utc>,
}

impl OutcomeReport {
    /// Serialize the report as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_report() -> OutcomeReport {
        OutcomeReport {
            listen_topic: "devices".to_string(),
            on_event: TriggerOn::Received,
            trigger_by: TriggerBy::Key,
            field_name: String::new(),
            cmd: "false device-1".to_string(),
            result: DispatchResult::Failed,
            output: "boom".to_string(),
            exit_code: Some(1),
            finished_at: DateTime::<Utc>::default(),
        }
    }

    #[test]
    fn serializes_wire_field_names() {
        let bytes = failed_report().to_json().unwrap_or_default();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_default();

        assert_eq!(json["listen_topic"], "devices");
        assert_eq!(json["on_event"], "received");
        assert_eq!(json["where"], "key");
        assert_eq!(json["field_name"], "");
        assert_eq!(json["cmd"], "false device-1");
        assert_eq!(json["result"], "FAILED");
        assert_eq!(json["output"], "boom");
        assert_eq!(json["exit_code"], 1);
    }

    #[test]
    fn report_roundtrips() {
        let report = failed_report();
        let bytes = report.to_json().unwrap_or_default();
        let decoded: Option<OutcomeReport> = serde_json::from_slice(&bytes).ok();
        assert_eq!(decoded, Some(report));
    }
}
