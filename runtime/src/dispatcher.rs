//! Command execution for triggered rules.
//!
//! The engine snapshots everything a dispatch needs into a [`DispatchJob`]
//! while it holds the topic state, then hands the job to a [`Dispatcher`] in
//! a spawned task. The dispatcher runs the command through a
//! [`CommandRunner`] and turns the result into an [`OutcomeReport`].

use crate::metrics::DispatchMetrics;
use mq_listener_core::environment::Clock;
use mq_listener_core::{
    CommandLine, Detection, DispatchResult, Listener, OutcomeReport, TopicState, TriggerBy,
    TriggerOn,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;

/// What a command produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited with status zero
    pub success: bool,
    /// Captured stdout followed by stderr, or the spawn error
    pub output: String,
    /// Exit code, when the process exited normally
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// A successful run with the given output.
    #[must_use]
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: Some(0),
        }
    }

    /// A command that could not be started.
    #[must_use]
    pub fn not_started(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            output: reason.into(),
            exit_code: None,
        }
    }
}

/// Executes resolved command lines.
///
/// This is the seam between the engine and the operating system: production
/// uses [`ProcessRunner`], tests substitute a recording mock.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// Failures are reported through [`CommandOutput`], never as an error.
    fn run<'a>(
        &'a self,
        command: &'a CommandLine,
    ) -> Pin<Box<dyn Future<Output = CommandOutput> + Send + 'a>>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        command: &'a CommandLine,
    ) -> Pin<Box<dyn Future<Output = CommandOutput> + Send + 'a>> {
        Box::pin(async move {
            let Some(program) = command.program() else {
                return CommandOutput::not_started("empty command template");
            };

            match Command::new(program).args(command.args()).output().await {
                Ok(output) => {
                    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                    text.push_str(&String::from_utf8_lossy(&output.stderr));
                    CommandOutput {
                        success: output.status.success(),
                        output: text,
                        exit_code: output.status.code(),
                    }
                }
                Err(e) => CommandOutput::not_started(format!("failed to start '{program}': {e}")),
            }
        })
    }
}

/// Everything needed to run and report one triggered command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchJob {
    /// Topic whose transition triggered
    pub topic: String,
    /// Trigger timing of the rule
    pub trigger_on: TriggerOn,
    /// Trigger basis of the rule
    pub trigger_by: TriggerBy,
    /// Watched field, empty when none
    pub field_name: String,
    /// Why the rule fired
    pub detection: Detection,
    /// Resolved command line
    pub command: CommandLine,
}

impl DispatchJob {
    /// Snapshot a job from the topic's current state.
    ///
    /// Must be called after `update` and before `exchange`, while the caller
    /// still holds the state.
    #[must_use]
    pub fn snapshot(listener: &Listener, state: &TopicState, detection: Detection) -> Self {
        let rule = listener.rule();
        Self {
            topic: listener.topic().to_string(),
            trigger_on: rule.trigger_on,
            trigger_by: rule.trigger_by,
            field_name: rule.field_name().unwrap_or_default().to_string(),
            detection,
            command: CommandLine::build(listener, state),
        }
    }
}

/// Runs dispatch jobs and builds their outcome reports.
pub struct Dispatcher {
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Create a dispatcher over a command runner.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, clock: Arc<dyn Clock>) -> Self {
        Self { runner, clock }
    }

    /// Run the job's command and describe the outcome.
    pub async fn dispatch(&self, job: &DispatchJob) -> OutcomeReport {
        let cmd = job.command.to_string();
        tracing::info!(
            topic = %job.topic,
            detection = ?job.detection,
            cmd = %cmd,
            "Dispatching command"
        );

        let start = Instant::now();
        let output = self.runner.run(&job.command).await;
        let duration = start.elapsed();

        let result = if output.success {
            DispatchResult::Succeed
        } else {
            DispatchResult::Failed
        };
        DispatchMetrics::record(&job.topic, result, duration);

        match result {
            DispatchResult::Succeed => tracing::debug!(
                topic = %job.topic,
                cmd = %cmd,
                duration_ms = duration.as_millis(),
                output = %output.output,
                "Command succeeded"
            ),
            DispatchResult::Failed => tracing::warn!(
                topic = %job.topic,
                cmd = %cmd,
                exit_code = ?output.exit_code,
                output = %output.output,
                "Command failed"
            ),
        }

        OutcomeReport {
            listen_topic: job.topic.clone(),
            on_event: job.trigger_on,
            trigger_by: job.trigger_by,
            field_name: job.field_name.clone(),
            cmd,
            result,
            output: output.output,
            exit_code: output.exit_code,
            finished_at: self.clock.now(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: Test will fail if state setup fails
mod tests {
    use super::*;
    use mq_listener_core::environment::SystemClock;
    use mq_listener_core::{FieldSpec, FieldType, TriggerRule, ValueSchema};

    struct EchoRunner;

    impl CommandRunner for EchoRunner {
        fn run<'a>(
            &'a self,
            command: &'a CommandLine,
        ) -> Pin<Box<dyn Future<Output = CommandOutput> + Send + 'a>> {
            Box::pin(async move {
                match command.program() {
                    Some("fail") => CommandOutput {
                        success: false,
                        output: "boom".to_string(),
                        exit_code: Some(2),
                    },
                    _ => CommandOutput::succeeded(command.to_string()),
                }
            })
        }
    }

    fn job(cmd: &str) -> DispatchJob {
        let rule = TriggerRule {
            trigger_by: TriggerBy::Value,
            trigger_on: TriggerOn::Updated,
            field_name: Some("temp".to_string()),
            cmd: cmd.to_string(),
        };
        let schema = ValueSchema::json(vec![FieldSpec::new("temp", FieldType::Float)]);
        let listener = Arc::new(Listener::new("sensor", rule, schema));
        let mut state = TopicState::new(Arc::clone(&listener), &SystemClock);
        state.update("k", br#"{"temp": 21.5}"#).unwrap();
        DispatchJob::snapshot(&listener, &state, Detection::FieldChanged)
    }

    #[test]
    fn snapshot_resolves_command_and_rule() {
        let job = job("notify.sh --celsius");
        assert_eq!(job.topic, "sensor");
        assert_eq!(job.field_name, "temp");
        assert_eq!(job.command.to_string(), "notify.sh --celsius 21.5");
    }

    #[tokio::test]
    async fn successful_dispatch_reports_succeed() {
        let dispatcher = Dispatcher::new(Arc::new(EchoRunner), Arc::new(SystemClock));
        let report = dispatcher.dispatch(&job("notify.sh")).await;

        assert_eq!(report.result, DispatchResult::Succeed);
        assert_eq!(report.cmd, "notify.sh 21.5");
        assert_eq!(report.output, "notify.sh 21.5");
        assert_eq!(report.listen_topic, "sensor");
        assert_eq!(report.exit_code, Some(0));
    }

    #[tokio::test]
    async fn failed_dispatch_reports_failed() {
        let dispatcher = Dispatcher::new(Arc::new(EchoRunner), Arc::new(SystemClock));
        let report = dispatcher.dispatch(&job("fail now")).await;

        assert_eq!(report.result, DispatchResult::Failed);
        assert_eq!(report.output, "boom");
        assert_eq!(report.exit_code, Some(2));
    }

    #[tokio::test]
    async fn process_runner_rejects_empty_template() {
        let output = ProcessRunner.run(&CommandLine::new("", vec!["x".to_string()])).await;
        assert!(!output.success);
        assert_eq!(output.exit_code, None);
        assert_eq!(output.output, "empty command template");
    }

    #[tokio::test]
    async fn process_runner_reports_missing_binary() {
        let command = CommandLine::new("/nonexistent/mq-listener-hook", Vec::new());
        let output = ProcessRunner.run(&command).await;
        assert!(!output.success);
        assert!(output.output.contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_captures_stdout_then_stderr() {
        let command = CommandLine::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo out; echo err 1>&2; exit 3".to_string(),
            ],
        );
        let output = ProcessRunner.run(&command).await;
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.output, "out\nerr\n");
    }
}
