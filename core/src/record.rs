//! Keyed records exchanged with the message bus.

use std::fmt;

/// Where a record sits in the transport's log.
///
/// Used to recognise redelivered records after a reconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    /// Partition the record was read from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub const fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

/// A keyed record on a topic.
///
/// The value is kept as raw bytes; decoding is up to the topic's schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Topic the record belongs to
    pub topic: String,
    /// Routing / identity key
    pub key: String,
    /// Raw value payload
    pub value: Vec<u8>,
    /// Transport position, when the transport provides one
    pub position: Option<Position>,
}

impl Record {
    /// Create a record without a transport position.
    ///
    /// # Examples
    ///
    /// ```
    /// use mq_listener_core::record::Record;
    ///
    /// let record = Record::new("sensor", "device-1", br#"{"temp": 20.0}"#.to_vec());
    /// assert_eq!(record.topic, "sensor");
    /// assert!(record.position.is_none());
    /// ```
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value,
            position: None,
        }
    }

    /// Attach a transport position.
    #[must_use]
    pub const fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Record {{ topic: {}, key: {}, size: {} bytes }}",
            self.topic,
            self.key,
            self.value.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_display() {
        let record = Record::new("sensor", "device-1", vec![1, 2, 3, 4, 5]);

        let display = format!("{record}");
        assert!(display.contains("sensor"));
        assert!(display.contains("device-1"));
        assert!(display.contains("5 bytes"));
    }

    #[test]
    fn record_with_position() {
        let record = Record::new("t", "k", Vec::new()).with_position(Position::new(2, 41));
        assert_eq!(record.position, Some(Position::new(2, 41)));
    }
}
