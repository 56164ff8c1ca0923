//! # MQ Listener Testing
//!
//! Testing utilities and helpers for the MQ listener.
//!
//! This crate provides:
//! - Mock implementations of the environment traits (clock, command runner)
//! - An in-memory message bus
//! - Listener fixtures
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use mq_listener_testing::{InMemoryMessageBus, ListenerBuilder, MockRunner, test_clock};
//! use mq_listener_runtime::{Engine, Reporter};
//!
//! #[tokio::test]
//! async fn test_sensor_flow() {
//!     let bus = Arc::new(InMemoryMessageBus::new());
//!     let runner = Arc::new(MockRunner::new());
//!     let listener = ListenerBuilder::new("sensor").by_value("temp").float("temp").cmd("notify.sh").build();
//!     let engine = Engine::new(vec![listener], runner.clone(), Reporter::new(bus, "MQ_LISTENER", "KEY"), Arc::new(test_clock()));
//!
//!     engine.handle(Record::new("sensor", "k", br#"{"temp": 20.0}"#.to_vec())).await;
//! }
//! ```

use chrono::{DateTime, Utc};
use mq_listener_core::environment::Clock;

/// In-memory message bus
pub mod message_bus_mocks;

pub use message_bus_mocks::InMemoryMessageBus;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use mq_listener_core::CommandLine;
    use mq_listener_runtime::{CommandOutput, CommandRunner};
    use std::collections::HashSet;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use mq_listener_testing::mocks::FixedClock;
    /// use mq_listener_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    #[derive(Default)]
    struct RunnerState {
        calls: Vec<CommandLine>,
        failing: HashSet<String>,
    }

    /// Command runner that records calls instead of spawning processes.
    ///
    /// Every call succeeds with its rendered command line as output, unless
    /// the program was marked failing. An optional delay keeps calls in
    /// flight long enough to observe concurrency.
    ///
    /// # Example
    ///
    /// ```
    /// use mq_listener_core::CommandLine;
    /// use mq_listener_runtime::CommandRunner;
    /// use mq_listener_testing::MockRunner;
    ///
    /// # tokio_test::block_on(async {
    /// let runner = MockRunner::new().failing("alarm.sh");
    ///
    /// let ok = runner.run(&CommandLine::new("notify.sh", vec!["20".into()])).await;
    /// let failed = runner.run(&CommandLine::new("alarm.sh", Vec::new())).await;
    ///
    /// assert!(ok.success);
    /// assert!(!failed.success);
    /// assert_eq!(runner.call_count(), 2);
    /// # });
    /// ```
    #[derive(Clone, Default)]
    pub struct MockRunner {
        state: Arc<Mutex<RunnerState>>,
        delay: Option<Duration>,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    }

    impl MockRunner {
        /// Create a runner where every call succeeds immediately.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Keep every call running for `delay`.
        #[must_use]
        pub const fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Make calls to `program` fail with exit code 1.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned.
        #[must_use]
        #[allow(clippy::unwrap_used)]
        pub fn failing(self, program: impl Into<String>) -> Self {
            self.state.lock().unwrap().failing.insert(program.into());
            self
        }

        /// Commands run so far, in call order.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned.
        #[must_use]
        #[allow(clippy::unwrap_used)]
        pub fn calls(&self) -> Vec<CommandLine> {
            self.state.lock().unwrap().calls.clone()
        }

        /// Rendered command lines run so far.
        #[must_use]
        pub fn rendered_calls(&self) -> Vec<String> {
            self.calls().iter().map(ToString::to_string).collect()
        }

        /// Number of calls so far.
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls().len()
        }

        /// Highest number of calls observed running at the same time.
        #[must_use]
        pub fn max_concurrency(&self) -> usize {
            self.max_running.load(Ordering::SeqCst)
        }
    }

    impl CommandRunner for MockRunner {
        #[allow(clippy::unwrap_used)]
        fn run<'a>(
            &'a self,
            command: &'a CommandLine,
        ) -> Pin<Box<dyn Future<Output = CommandOutput> + Send + 'a>> {
            Box::pin(async move {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_running.fetch_max(now, Ordering::SeqCst);

                let fails = {
                    let mut state = self.state.lock().unwrap();
                    state.calls.push(command.clone());
                    command
                        .program()
                        .is_some_and(|program| state.failing.contains(program))
                };

                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }

                self.running.fetch_sub(1, Ordering::SeqCst);

                if fails {
                    CommandOutput {
                        success: false,
                        output: format!("{command}: failed"),
                        exit_code: Some(1),
                    }
                } else {
                    CommandOutput::succeeded(command.to_string())
                }
            })
        }
    }

    impl std::fmt::Debug for MockRunner {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockRunner")
                .field("delay", &self.delay)
                .field("max_concurrency", &self.max_concurrency())
                .finish_non_exhaustive()
        }
    }
}

/// Listener fixtures.
pub mod fixtures {
    use mq_listener_core::{
        DecodeFormat, FieldSpec, FieldType, Listener, TriggerBy, TriggerOn, TriggerRule,
        ValueSchema,
    };

    /// Fluent builder for listeners in tests.
    ///
    /// Defaults to a `none`/`updated` rule with an `echo` command and an
    /// empty JSON schema.
    ///
    /// # Example
    ///
    /// ```
    /// use mq_listener_core::ValueTrigger;
    /// use mq_listener_testing::ListenerBuilder;
    ///
    /// let listener = ListenerBuilder::new("sensor")
    ///     .by_value("temp")
    ///     .field("temp", mq_listener_core::FieldType::Float)
    ///     .cmd("notify.sh")
    ///     .build();
    ///
    /// assert_eq!(listener.value_trigger(), &ValueTrigger::Field("temp".to_string()));
    /// ```
    #[derive(Clone, Debug)]
    pub struct ListenerBuilder {
        topic: String,
        rule: TriggerRule,
        schema: ValueSchema,
    }

    impl ListenerBuilder {
        /// Start a listener for `topic`.
        #[must_use]
        pub fn new(topic: impl Into<String>) -> Self {
            Self {
                topic: topic.into(),
                rule: TriggerRule {
                    cmd: "echo".to_string(),
                    ..TriggerRule::default()
                },
                schema: ValueSchema::default(),
            }
        }

        /// Trigger on key changes.
        #[must_use]
        pub fn by_key(mut self) -> Self {
            self.rule.trigger_by = TriggerBy::Key;
            self
        }

        /// Trigger on changes of a value field.
        #[must_use]
        pub fn by_value(mut self, field_name: impl Into<String>) -> Self {
            self.rule.trigger_by = TriggerBy::Value;
            self.rule.field_name = Some(field_name.into());
            self
        }

        /// Trigger on raw value changes (no field).
        #[must_use]
        pub fn by_raw_value(mut self) -> Self {
            self.rule.trigger_by = TriggerBy::Value;
            self.rule.field_name = None;
            self
        }

        /// Fire on every received record.
        #[must_use]
        pub fn on_received(mut self) -> Self {
            self.rule.trigger_on = TriggerOn::Received;
            self
        }

        /// Set the command template.
        #[must_use]
        pub fn cmd(mut self, cmd: impl Into<String>) -> Self {
            self.rule.cmd = cmd.into();
            self
        }

        /// Add a schema field.
        #[must_use]
        pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
            self.schema.fields.push(FieldSpec::new(name, field_type));
            self
        }

        /// Do not decode values.
        #[must_use]
        pub fn raw(mut self) -> Self {
            self.schema.format = DecodeFormat::Raw;
            self
        }

        /// Build the listener.
        #[must_use]
        pub fn build(self) -> Listener {
            Listener::new(self.topic, self.rule, self.schema)
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use mq_listener_core::Record;

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    }

    /// A record with a JSON value.
    #[must_use]
    pub fn json_record(topic: &str, key: &str, value: &serde_json::Value) -> Record {
        Record::new(topic, key, value.to_string().into_bytes())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Keys drawn from a small alphabet so repeats are common.
    pub fn key_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a", "b", "c"]).prop_map(str::to_string)
    }

    /// Sensor payloads where `temp` is sometimes absent.
    pub fn sensor_payload_strategy() -> impl Strategy<Value = Option<i32>> {
        prop::option::weighted(0.8, -2_i32..3)
    }

    /// Render a sensor payload as JSON bytes.
    #[must_use]
    pub fn sensor_payload(temp: Option<i32>) -> Vec<u8> {
        match temp {
            Some(temp) => format!(r#"{{"temp": {temp}.0, "unit": "C"}}"#).into_bytes(),
            None => br#"{"unit": "C"}"#.to_vec(),
        }
    }
}

// Re-export commonly used items
pub use fixtures::ListenerBuilder;
pub use mocks::{FixedClock, MockRunner, test_clock};
