//! Message bus abstraction for topic subscription and publishing.
//!
//! This module provides the [`MessageBus`] trait: the only transport capability
//! the listener needs. Records flow in from subscribed topics; outcome reports
//! flow back out through `publish`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   Message Bus    │
//! └────────┬─────────┘
//!          │ subscribe(topics)
//!          ▼
//! ┌──────────────────┐
//! │  Engine          │──▶ update / detect / exchange
//! └────────┬─────────┘
//!          │ spawn
//!          ▼
//! ┌──────────────────┐
//! │  Dispatcher      │──▶ external command
//! └────────┬─────────┘
//!          │ publish(reporting topic)
//!          ▼
//! ┌──────────────────┐
//! │   Message Bus    │
//! └──────────────────┘
//! ```
//!
//! # Delivery
//!
//! - **At-least-once**: records may be redelivered after a reconnect; records
//!   carrying a [`Position`](crate::record::Position) are deduplicated per topic
//! - **Ordered within partition**: records for a topic arrive in transport order
//!
//! # Implementations
//!
//! - `InMemoryMessageBus` (`mq-listener-testing`) - For testing
//! - `RedpandaMessageBus` (`mq-listener-redpanda`) - Kafka-compatible brokers
//!
//! # Example
//!
//! ```rust,ignore
//! use mq_listener_core::message_bus::MessageBus;
//! use futures::StreamExt;
//!
//! async fn example(bus: impl MessageBus) {
//!     bus.publish("MQ_LISTENER", "MQ_LISTENER_DEFAULT", b"{}").await?;
//!
//!     let mut stream = bus.subscribe(&["sensor", "devices"]).await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(record) => println!("Received: {record}"),
//!             Err(e) => eprintln!("Error: {e}"),
//!         }
//!     }
//! }
//! ```

use crate::record::Record;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone)]
pub enum MessageBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a record to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while consuming
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Generic error for other failures
    #[error("Message bus error: {0}")]
    Other(String),
}

impl MessageBusError {
    /// Whether the error indicates a lost or failed connection.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::TransportError(_))
    }
}

/// Stream of records from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Record, MessageBusError>> + Send>>;

/// Trait for message bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the bus is shared between the
/// ingestion loop and the outcome reporter.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the bus can be used as
/// `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync {
    /// Publish a keyed record to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of records.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, MessageBusError>> + Send + '_>>;
}
