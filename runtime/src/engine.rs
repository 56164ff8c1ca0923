//! Record ingestion and per-topic orchestration.
//!
//! The [`Engine`] owns one state container per configured topic. For every
//! record it runs, under the topic's state lock:
//!
//! 1. redelivery check against the record position
//! 2. `update` of the current snapshot
//! 3. transition detection
//! 4. a [`DispatchJob`] snapshot if the rule fired
//! 5. `exchange` of current into last
//!
//! and then spawns the dispatch. Each dispatch waits for the previous one on
//! the same topic to finish, so commands for one topic run one at a time and
//! in ingestion order. A slow command never blocks ingestion, and dispatches
//! for different topics run concurrently.

use crate::dispatcher::{CommandRunner, DispatchJob, Dispatcher};
use crate::error::EngineError;
use crate::metrics::ListenerMetrics;
use crate::reporter::Reporter;
use futures::StreamExt;
use mq_listener_core::environment::Clock;
use mq_listener_core::{Listener, MessageBus, OutcomeReport, Record, TopicState, evaluate};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;

/// What happened to a record handed to [`Engine::handle`].
#[derive(Debug)]
#[must_use]
pub enum Handled {
    /// No listener is configured for the record's topic
    Ignored,
    /// The record's position was already processed
    Duplicate,
    /// State updated, rule did not fire
    Idle,
    /// Rule fired; the handle resolves to the published outcome
    Dispatched(JoinHandle<OutcomeReport>),
}

/// One topic's state plus the tail of its dispatch queue.
struct TopicSlot {
    state: TopicState,
    /// Resolves once the most recently spawned dispatch has run its command.
    dispatch_tail: Option<oneshot::Receiver<()>>,
}

impl TopicSlot {
    fn new(listener: Arc<Listener>, clock: &dyn Clock) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            state: TopicState::new(listener, clock),
            dispatch_tail: None,
        }))
    }
}

/// Decrements the in-flight counter when a dispatch task ends.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The listener engine.
///
/// Cloning is cheap: clones share the same topic states and counters.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::new(listeners, Arc::new(ProcessRunner), reporter, Arc::new(SystemClock));
///
/// match engine.handle(record).await {
///     Handled::Dispatched(handle) => {
///         let outcome = handle.await?;
///         println!("{}: {:?}", outcome.cmd, outcome.result);
///     }
///     other => println!("{other:?}"),
/// }
/// ```
#[derive(Clone)]
pub struct Engine {
    listeners: Arc<HashMap<String, Arc<Listener>>>,
    topics: Arc<RwLock<HashMap<String, Arc<Mutex<TopicSlot>>>>>,
    dispatcher: Arc<Dispatcher>,
    reporter: Arc<Reporter>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<AtomicUsize>,
}

impl Engine {
    /// Create an engine with one state container per listener.
    ///
    /// Listeners whose value rule cannot work (e.g. the field is not in the
    /// schema) are kept, but a warning is logged.
    #[must_use]
    pub fn new(
        listeners: Vec<Listener>,
        runner: Arc<dyn CommandRunner>,
        reporter: Reporter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut by_topic = HashMap::new();
        let mut slots = HashMap::new();

        for listener in listeners {
            if listener.is_misconfigured() {
                tracing::warn!(
                    topic = %listener.topic(),
                    field_name = ?listener.rule().field_name(),
                    "Value trigger disabled: field is not part of the value schema"
                );
            }

            let listener = Arc::new(listener);
            let topic = listener.topic().to_string();
            slots.insert(
                topic.clone(),
                TopicSlot::new(Arc::clone(&listener), clock.as_ref()),
            );
            if by_topic.insert(topic.clone(), listener).is_some() {
                tracing::warn!(topic = %topic, "Topic configured more than once, last listener wins");
            }
        }

        Self {
            listeners: Arc::new(by_topic),
            topics: Arc::new(RwLock::new(slots)),
            dispatcher: Arc::new(Dispatcher::new(runner, Arc::clone(&clock))),
            reporter: Arc::new(reporter),
            clock,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Topics the engine subscribes to: every listener topic except the
    /// reporting topic, sorted.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .listeners
            .keys()
            .filter(|topic| topic.as_str() != self.reporter.topic())
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    /// Number of dispatches currently running or queued behind their topic.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Read a topic's state.
    ///
    /// Returns `None` if no listener is configured for the topic.
    pub async fn topic_state<F, T>(&self, topic: &str, f: F) -> Option<T>
    where
        F: FnOnce(&TopicState) -> T,
    {
        let slot = self.slot(topic).await?;
        let slot = slot.lock().await;
        Some(f(&slot.state))
    }

    /// Process one record.
    ///
    /// State changes happen before this returns; the command, if any, runs
    /// in a spawned task queued behind the topic's earlier dispatches.
    pub async fn handle(&self, record: Record) -> Handled {
        ListenerMetrics::record_received(&record.topic);

        let Some(slot) = self.slot(&record.topic).await else {
            tracing::debug!(topic = %record.topic, "Ignoring record for unconfigured topic");
            ListenerMetrics::record_ignored();
            return Handled::Ignored;
        };

        let mut slot = slot.lock().await;
        let TopicSlot {
            state,
            dispatch_tail,
        } = &mut *slot;

        if let Some(position) = record.position {
            if !state.accept_position(position) {
                let high_water = state.high_water(position.partition).unwrap_or_default();
                if position.offset == 0 && high_water > 0 {
                    tracing::warn!(
                        topic = %record.topic,
                        partition = position.partition,
                        high_water = high_water,
                        "Partition restarted at offset 0, records up to the previous high-water mark will be dropped"
                    );
                } else {
                    tracing::debug!(
                        topic = %record.topic,
                        partition = position.partition,
                        offset = position.offset,
                        "Dropping redelivered record"
                    );
                }
                ListenerMetrics::record_duplicate(&record.topic);
                return Handled::Duplicate;
            }
        }

        if let Err(error) = state.update(&record.key, &record.value) {
            tracing::warn!(
                topic = %record.topic,
                key = %record.key,
                error = %error,
                "Failed to decode record value"
            );
            ListenerMetrics::record_decode_failure(&record.topic);
        }

        let listener = Arc::clone(state.listener());
        let detection = evaluate(&listener, state);
        let job = if detection.is_triggered() {
            tracing::info!(
                topic = %record.topic,
                detection = ?detection,
                key = %state.key_transition(),
                value = %state.value_transition(),
                "Rule triggered"
            );
            ListenerMetrics::record_trigger(&record.topic, detection);
            Some(DispatchJob::snapshot(&listener, state, detection))
        } else {
            None
        };

        state.exchange(self.clock.as_ref());

        // Queued while the state lock is held, so dispatch order is ingestion order.
        match job {
            Some(job) => Handled::Dispatched(self.spawn_dispatch(dispatch_tail, job)),
            None => Handled::Idle,
        }
    }

    /// Subscribe to the listener topics and process records until the
    /// stream ends or `shutdown` resolves.
    ///
    /// Ingestion is sequential. Stream errors are logged and ingestion
    /// continues; the transport is expected to reconnect on its own.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Subscribe`] if the subscription fails.
    pub async fn run<F>(&self, bus: &dyn MessageBus, shutdown: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()> + Send,
    {
        let topics = self.subscribed_topics();
        tokio::pin!(shutdown);

        if topics.is_empty() {
            tracing::warn!("No listener topics configured, waiting for shutdown");
            shutdown.await;
            return Ok(());
        }

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        let mut stream = bus
            .subscribe(&topic_refs)
            .await
            .map_err(EngineError::Subscribe)?;
        tracing::info!(topics = ?topics, "Consumer connected");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping ingestion");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(record)) => {
                        // Dispatches complete on their own; shutdown waits on the in-flight count.
                        drop(self.handle(record).await);
                    }
                    Some(Err(error)) if error.is_disconnect() => {
                        tracing::warn!(error = %error, "Connection lost, waiting for reconnect");
                        ListenerMetrics::record_consume_error();
                    }
                    Some(Err(error)) => {
                        tracing::error!(error = %error, "Failed to receive record");
                        ListenerMetrics::record_consume_error();
                    }
                    None => {
                        tracing::info!("Record stream ended");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Wait for running dispatches to finish.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShutdownTimeout`] if dispatches are still
    /// running when the timeout elapses.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), EngineError> {
        tracing::info!("Initiating graceful shutdown");

        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(50);

        loop {
            let pending = self.in_flight.load(Ordering::Acquire);

            if pending == 0 {
                tracing::info!("All dispatches completed, shutdown successful");
                return Ok(());
            }

            if start.elapsed() >= timeout {
                tracing::error!(
                    pending_dispatches = pending,
                    "Shutdown timeout: {} dispatches still running", pending
                );
                return Err(EngineError::ShutdownTimeout(pending));
            }

            tracing::debug!(
                pending_dispatches = pending,
                elapsed_ms = start.elapsed().as_millis(),
                "Waiting for dispatches to complete"
            );

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Look up a topic's slot, creating it if a listener exists but the slot does not.
    async fn slot(&self, topic: &str) -> Option<Arc<Mutex<TopicSlot>>> {
        if let Some(slot) = self.topics.read().await.get(topic) {
            return Some(Arc::clone(slot));
        }

        let listener = self.listeners.get(topic)?;
        let mut topics = self.topics.write().await;
        let slot = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicSlot::new(Arc::clone(listener), self.clock.as_ref()));
        Some(Arc::clone(slot))
    }

    fn spawn_dispatch(
        &self,
        dispatch_tail: &mut Option<oneshot::Receiver<()>>,
        job: DispatchJob,
    ) -> JoinHandle<OutcomeReport> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let dispatcher = Arc::clone(&self.dispatcher);
        let reporter = Arc::clone(&self.reporter);

        let (done_tx, done_rx) = oneshot::channel();
        let previous = dispatch_tail.replace(done_rx);

        tokio::spawn(async move {
            let _guard = guard;

            // Resolves on completion or when the previous task is dropped.
            if let Some(previous) = previous {
                let _ = previous.await;
            }

            let outcome = dispatcher.dispatch(&job).await;
            drop(done_tx);

            reporter.report(&outcome).await;
            outcome
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("topics", &self.listeners.keys().collect::<Vec<_>>())
            .field("reporter", &self.reporter)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
