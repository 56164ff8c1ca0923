//! In-memory message bus for engine tests.
//!
//! [`InMemoryMessageBus`] keeps a log per topic, assigns sequential offsets
//! on partition 0 and fans published records out to live subscriptions.
//! Tests can also replay records at explicit positions, inject stream
//! errors and make publishes fail.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use futures::future;
use mq_listener_core::{MessageBus, MessageBusError, MessageStream, Position, Record};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

type Delivery = Result<Record, MessageBusError>;

struct Subscription {
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BusState {
    log: HashMap<String, Vec<Record>>,
    subscriptions: Vec<Subscription>,
    fail_publish: bool,
    fail_subscribe: bool,
}

impl BusState {
    fn fan_out(&mut self, delivery: &Delivery, topic: Option<&str>) {
        self.subscriptions.retain(|sub| {
            let wanted = topic.is_none_or(|t| sub.topics.iter().any(|s| s == t));
            !wanted || sub.tx.send(delivery.clone()).is_ok()
        });
    }
}

/// In-memory message bus for fast, deterministic testing.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use mq_listener_core::MessageBus;
/// use mq_listener_testing::InMemoryMessageBus;
///
/// # tokio_test::block_on(async {
/// let bus = InMemoryMessageBus::new();
/// let mut stream = bus.subscribe(&["sensor"]).await.unwrap();
///
/// bus.publish("sensor", "device-1", br#"{"temp": 20.0}"#).await.unwrap();
///
/// let record = stream.next().await.unwrap().unwrap();
/// assert_eq!(record.key, "device-1");
/// assert_eq!(record.position.map(|p| p.offset), Some(0));
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    state: Arc<RwLock<BusState>>,
}

impl InMemoryMessageBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.state.write().unwrap().fail_publish = fail;
    }

    /// Make subsequent subscriptions fail (or succeed again).
    pub fn fail_subscriptions(&self, fail: bool) {
        self.state.write().unwrap().fail_subscribe = fail;
    }

    /// Deliver a record as-is, position included, without logging it.
    ///
    /// Used to simulate redeliveries after a reconnect.
    pub fn deliver(&self, record: Record) {
        let topic = record.topic.clone();
        self.state
            .write()
            .unwrap()
            .fan_out(&Ok(record), Some(&topic));
    }

    /// Push an error into every live subscription.
    pub fn inject_error(&self, error: MessageBusError) {
        self.state.write().unwrap().fan_out(&Err(error), None);
    }

    /// End every live subscription stream.
    pub fn close(&self) {
        self.state.write().unwrap().subscriptions.clear();
    }

    /// Records published to a topic, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Record> {
        self.state
            .read()
            .unwrap()
            .log
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.read().unwrap().subscriptions.len()
    }

    /// Wait until at least `count` subscriptions are live.
    pub async fn wait_for_subscribers(&self, count: usize) {
        while self.subscription_count() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Wait until `topic` holds at least `count` records.
    pub async fn wait_for_published(&self, topic: &str, count: usize) -> Vec<Record> {
        loop {
            let records = self.published(topic);
            if records.len() >= count {
                return records;
            }
            tokio::task::yield_now().await;
        }
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>> {
        let mut state = self.state.write().unwrap();

        if state.fail_publish {
            return Box::pin(future::ready(Err(MessageBusError::PublishFailed {
                topic: topic.to_string(),
                reason: "publish failure injected".to_string(),
            })));
        }

        let log = state.log.entry(topic.to_string()).or_default();
        let offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
        let record = Record::new(topic, key, payload.to_vec()).with_position(Position::new(0, offset));
        log.push(record.clone());
        state.fan_out(&Ok(record), Some(topic));

        Box::pin(future::ready(Ok(())))
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, MessageBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let mut state = self.state.write().unwrap();

        if state.fail_subscribe {
            return Box::pin(future::ready(Err(MessageBusError::SubscriptionFailed {
                topics,
                reason: "subscription failure injected".to_string(),
            })));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        state.subscriptions.push(Subscription { topics, tx });

        let stream = async_stream::stream! {
            while let Some(delivery) = rx.recv().await {
                yield delivery;
            }
        };

        Box::pin(future::ready(Ok(Box::pin(stream) as MessageStream)))
    }
}

impl std::fmt::Debug for InMemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap();
        f.debug_struct("InMemoryMessageBus")
            .field("topics", &state.log.keys().collect::<Vec<_>>())
            .field("subscriptions", &state.subscriptions.len())
            .finish()
    }
}
