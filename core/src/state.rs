//! Per-topic state container.
//!
//! A [`TopicState`] holds two snapshots of a topic: `current` reflects the
//! most recently received record, `last` reflects the state before it. The
//! owner drives every record through the same order:
//!
//! 1. [`TopicState::update`] writes the record into `current`
//! 2. the detector compares `last` against `current`
//! 3. [`TopicState::exchange`] copies `current` into `last`
//!
//! so `last` always lags `current` by exactly one record.

use crate::checksum::checksum;
use crate::environment::Clock;
use crate::record::Position;
use crate::rule::{Listener, ValueTrigger};
use crate::schema::DecodeError;
use crate::value::{FieldValue, ValueSnapshot};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Snapshot state of a single topic.
#[derive(Clone, Debug)]
pub struct TopicState {
    listener: Arc<Listener>,
    last_key: String,
    current_key: String,
    last_value: ValueSnapshot,
    current_value: ValueSnapshot,
    last_checksum: u16,
    current_checksum: u16,
    value_decoded: bool,
    updated_at: DateTime<Utc>,
    /// Highest offset processed per partition
    positions: HashMap<i32, i64>,
}

impl TopicState {
    /// Create the state for a listener, with both value snapshots set to
    /// the schema's zero values.
    #[must_use]
    pub fn new(listener: Arc<Listener>, clock: &dyn Clock) -> Self {
        let zero = listener.schema().zero_snapshot();
        Self {
            listener,
            last_key: String::new(),
            current_key: String::new(),
            last_value: zero.clone(),
            current_value: zero,
            last_checksum: 0,
            current_checksum: 0,
            value_decoded: true,
            updated_at: clock.now(),
            positions: HashMap::new(),
        }
    }

    /// Write a received record into the current snapshot.
    ///
    /// The key and checksum are always updated. When the schema decodes
    /// values, fields present in the payload are merged into the current
    /// value and absent fields keep their previous value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload does not decode. The key and
    /// checksum are still updated so key-based rules keep working; the
    /// current value is left untouched.
    pub fn update(&mut self, key: &str, raw: &[u8]) -> Result<(), DecodeError> {
        key.clone_into(&mut self.current_key);
        self.current_checksum = checksum(raw);

        if !self.listener.schema().decodes() {
            self.value_decoded = true;
            return Ok(());
        }

        match self.listener.schema().decode(raw) {
            Ok(fields) => {
                self.current_value.extend(fields);
                self.value_decoded = true;
                Ok(())
            }
            Err(e) => {
                self.value_decoded = false;
                Err(e)
            }
        }
    }

    /// Copy the current snapshot into the last snapshot.
    ///
    /// Values are merged field by field.
    pub fn exchange(&mut self, clock: &dyn Clock) {
        self.last_key.clone_from(&self.current_key);
        self.last_checksum = self.current_checksum;
        for (name, value) in &self.current_value {
            self.last_value.insert(name.clone(), value.clone());
        }
        self.updated_at = clock.now();
    }

    /// Record a transport position, returning `false` if it was already
    /// processed (a redelivery).
    ///
    /// The per-partition high-water mark is never lowered. If a topic is
    /// recreated or its offsets are reset while the process runs, records at
    /// or below the old mark keep being rejected until the partition passes
    /// it again; a restart clears the marks.
    pub fn accept_position(&mut self, position: Position) -> bool {
        match self.positions.get(&position.partition) {
            Some(&seen) if position.offset <= seen => false,
            _ => {
                self.positions.insert(position.partition, position.offset);
                true
            }
        }
    }

    /// Highest offset processed on a partition, if any.
    #[must_use]
    pub fn high_water(&self, partition: i32) -> Option<i64> {
        self.positions.get(&partition).copied()
    }

    /// The listener governing this topic.
    #[must_use]
    pub const fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }

    /// The topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.listener.topic()
    }

    /// Key of the previous record.
    #[must_use]
    pub fn last_key(&self) -> &str {
        &self.last_key
    }

    /// Key of the most recent record.
    #[must_use]
    pub fn current_key(&self) -> &str {
        &self.current_key
    }

    /// Value snapshot before the most recent record.
    #[must_use]
    pub const fn last_value(&self) -> &ValueSnapshot {
        &self.last_value
    }

    /// Value snapshot including the most recent record.
    #[must_use]
    pub const fn current_value(&self) -> &ValueSnapshot {
        &self.current_value
    }

    /// Current value of a single field.
    #[must_use]
    pub fn current_field(&self, name: &str) -> Option<&FieldValue> {
        self.current_value.get(name)
    }

    /// Checksum of the previous raw value.
    #[must_use]
    pub const fn last_checksum(&self) -> u16 {
        self.last_checksum
    }

    /// Checksum of the most recent raw value.
    #[must_use]
    pub const fn current_checksum(&self) -> u16 {
        self.current_checksum
    }

    /// Whether the most recent record's value decoded (always true for raw topics).
    #[must_use]
    pub const fn value_decoded(&self) -> bool {
        self.value_decoded
    }

    /// Time of the last exchange.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Key transition for logs, e.g. `a -> b`.
    #[must_use]
    pub fn key_transition(&self) -> String {
        format!("{} -> {}", self.last_key, self.current_key)
    }

    /// Value transition for logs, following the listener's value trigger.
    #[must_use]
    pub fn value_transition(&self) -> String {
        match self.listener.value_trigger() {
            ValueTrigger::Field(name) => {
                let render = |v: Option<&FieldValue>| v.map(FieldValue::to_argument).unwrap_or_default();
                format!(
                    "{} -> {}",
                    render(self.last_value.get(name)),
                    render(self.current_value.get(name))
                )
            }
            ValueTrigger::Checksum => {
                format!("{} -> {}", self.last_checksum, self.current_checksum)
            }
            ValueTrigger::Disabled => String::new(),
        }
    }
}
