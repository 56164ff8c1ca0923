//! Redpanda message bus implementation for the MQ listener.
//!
//! This crate provides a Kafka-compatible [`MessageBus`] built on rdkafka.
//! Records are carried as raw key/value bytes: the key is read as UTF-8
//! (lossily) and the value is handed to the listener untouched.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Redpanda / Kafka │
//! └────────┬─────────┘
//!          │ StreamConsumer (manual commit)
//!          ▼
//! ┌──────────────────┐
//! │  consumer task   │──▶ mpsc(buffer_size)
//! └──────────────────┘          │
//!                               ▼
//!                     ┌──────────────────┐
//!                     │  MessageStream   │──▶ Engine
//!                     └──────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER the record is handed to the subscriber's channel
//! - If the process crashes before commit, records are redelivered
//! - Every record carries its `(partition, offset)` position so the engine
//!   can drop redeliveries
//! - Ordering is guaranteed within a partition
//!
//! # Example
//!
//! ```no_run
//! use mq_listener_redpanda::RedpandaMessageBus;
//! use mq_listener_core::MessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::new("localhost:9092")?;
//!
//! bus.publish("MQ_LISTENER", "MQ_LISTENER_EDGE", br#"{"result":"SUCCEED"}"#).await?;
//!
//! let mut stream = bus.subscribe(&["sensor"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(record) => println!("Received: {record}"),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use mq_listener_core::config::BrokerConfig;
use mq_listener_core::{MessageBus, MessageBusError, MessageStream, Position, Record};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default subscriber buffer capacity.
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Redpanda message bus implementation.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, timeout
/// - **Consumer group**: Explicit ID or derived from the subscribed topics
/// - **Buffer size**: Record buffer capacity (default: 1000)
/// - **Offset reset**: Where new groups start reading (default: "latest")
/// - **Security**: Protocol and SASL credentials
///
/// # Example
///
/// ```no_run
/// use mq_listener_redpanda::RedpandaMessageBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaMessageBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("mq-listener-edge")
///     .security_protocol("sasl_ssl")
///     .sasl("SCRAM-SHA-256", "listener", "secret")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaMessageBus {
    /// Kafka producer for outcome reports
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Record buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
    /// Security settings shared by producer and consumers
    security: Vec<(&'static str, String)>,
}

impl RedpandaMessageBus {
    /// Create a message bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, MessageBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a message bus from broker configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, MessageBusError> {
        let mut builder = Self::builder()
            .brokers(&config.brokers)
            .auto_offset_reset(&config.auto_offset_reset)
            .security_protocol(&config.security_protocol);

        if let Some(group) = &config.consumer_group {
            builder = builder.consumer_group(group);
        }
        if let (Some(username), Some(password)) = (&config.sasl_username, &config.sasl_password) {
            let mechanism = config.sasl_mechanism.as_deref().unwrap_or("PLAIN");
            builder = builder.sasl(mechanism, username, password);
        }

        builder.build()
    }

    /// Create a new builder for configuring the message bus.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer_group_for(&self, topics: &[String]) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            // Sort topics for deterministic consumer group naming
            let mut sorted = topics.to_vec();
            sorted.sort();
            format!("mq-listener-{}", sorted.join("-"))
        })
    }
}

/// Builder for configuring a [`RedpandaMessageBus`].
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    security_protocol: Option<String>,
    sasl: Option<(String, String, String)>,
}

impl RedpandaMessageBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is derived from the subscribed topics. Instances
    /// sharing a group split the topic partitions between them.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the record buffer size for subscriptions.
    ///
    /// Controls how many records can wait between the Kafka consumer and the
    /// engine. Zero is raised to one.
    ///
    /// Default: 1000
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set the auto offset reset policy for new consumer groups:
    /// "earliest", "latest" or "error".
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the security protocol: "plaintext", "ssl", "`sasl_plaintext`", "`sasl_ssl`".
    ///
    /// Default: "plaintext"
    #[must_use]
    pub fn security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SASL mechanism and credentials.
    #[must_use]
    pub fn sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl = Some((mechanism.into(), username.into(), password.into()));
        self
    }

    /// Build the [`RedpandaMessageBus`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::ConnectionFailed`] if brokers are not set
    /// or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaMessageBus, MessageBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            MessageBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;

        let mut security = vec![(
            "security.protocol",
            self.security_protocol
                .clone()
                .unwrap_or_else(|| "plaintext".to_string()),
        )];
        if let Some((mechanism, username, password)) = self.sasl {
            security.push(("sasl.mechanism", mechanism));
            security.push(("sasl.username", username));
            security.push(("sasl.password", password));
        }

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set("compression.type", self.compression.as_deref().unwrap_or("none"));
        for (key, value) in &security {
            producer_config.set(*key, value);
        }

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            MessageBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "latest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            security_protocol = self.security_protocol.as_deref().unwrap_or("plaintext"),
            buffer_size = buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaMessageBus created successfully"
        );

        Ok(RedpandaMessageBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
            security,
        })
    }
}

/// Convert a consumed Kafka message into a listener record.
fn to_record(message: &BorrowedMessage<'_>) -> Record {
    let key = message
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default();
    let value = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

    Record::new(message.topic(), key, value)
        .with_position(Position::new(message.partition(), message.offset()))
}

impl MessageBus for RedpandaMessageBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>> {
        // Clone data before moving into async block
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition = partition,
                        offset = offset,
                        "Record published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish record"
                    );
                    Err(MessageBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, MessageBusError>> + Send + '_>> {
        // Clone configuration before moving into async block
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let consumer_group_id = self.consumer_group_for(&topics);
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();
        let security = self.security.clone();

        Box::pin(async move {
            // Manual commit for at-least-once delivery
            let mut consumer_config = ClientConfig::new();
            consumer_config
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false");
            for (key, value) in &security {
                consumer_config.set(*key, value);
            }

            let consumer: StreamConsumer =
                consumer_config
                    .create()
                    .map_err(|e| MessageBusError::SubscriptionFailed {
                        topics: topics.clone(),
                        reason: format!("Failed to create consumer: {e}"),
                    })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| MessageBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size = buffer_size,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The task owns the consumer and forwards records
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let record = to_record(&message);
                            tracing::trace!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                key = %record.key,
                                "Received record"
                            );

                            // Only commit AFTER successful hand-off to the channel
                            if tx.send(Ok(record)).await.is_err() {
                                tracing::debug!("Channel receiver dropped, exiting consumer task");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (record may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let err = MessageBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

impl std::fmt::Debug for RedpandaMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaMessageBus")
            .field("brokers", &self.brokers)
            .field("consumer_group", &self.consumer_group)
            .field("buffer_size", &self.buffer_size)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .finish_non_exhaustive()
    }
}
