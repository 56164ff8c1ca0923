//! Transition detection.
//!
//! Pure decision logic: given a listener and a topic state that has just been
//! updated (but not yet exchanged), decide whether the listener's rule fires.

use crate::rule::{Listener, TriggerBy, TriggerOn, ValueTrigger};
use crate::state::TopicState;

/// Why a record triggered, or [`Detection::Idle`] if it did not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Detection {
    /// Nothing to do
    Idle,
    /// Rule fires on every received record
    Received,
    /// The key differs from the previous record's key
    KeyChanged,
    /// The watched field differs from its previous value
    FieldChanged,
    /// The raw payload checksum differs from the previous one
    ChecksumChanged,
}

impl Detection {
    /// Whether the rule fired.
    #[must_use]
    pub const fn is_triggered(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Evaluate the listener's rule against the topic state.
#[must_use]
pub fn evaluate(listener: &Listener, state: &TopicState) -> Detection {
    let rule = listener.rule();

    if rule.trigger_on == TriggerOn::Received {
        return Detection::Received;
    }

    match rule.trigger_by {
        TriggerBy::None => Detection::Idle,
        TriggerBy::Key => {
            if state.last_key() == state.current_key() {
                Detection::Idle
            } else {
                Detection::KeyChanged
            }
        }
        TriggerBy::Value => match listener.value_trigger() {
            ValueTrigger::Disabled => Detection::Idle,
            ValueTrigger::Field(_) if !state.value_decoded() => Detection::Idle,
            ValueTrigger::Field(name) => {
                if state.current_value().get(name) == state.last_value().get(name) {
                    Detection::Idle
                } else {
                    Detection::FieldChanged
                }
            }
            ValueTrigger::Checksum => {
                if state.last_checksum() == state.current_checksum() {
                    Detection::Idle
                } else {
                    Detection::ChecksumChanged
                }
            }
        },
    }
}

/// Whether the listener's rule fires for the topic state.
#[must_use]
pub fn should_trigger(listener: &Listener, state: &TopicState) -> bool {
    evaluate(listener, state).is_triggered()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SystemClock;
    use crate::rule::TriggerRule;
    use crate::schema::{FieldSpec, FieldType, ValueSchema};
    use std::sync::Arc;

    fn state_for(rule: TriggerRule, schema: ValueSchema) -> TopicState {
        TopicState::new(Arc::new(Listener::new("t", rule, schema)), &SystemClock)
    }

    /// Update, evaluate, exchange; returns the detection.
    fn feed(state: &mut TopicState, key: &str, raw: &[u8]) -> Detection {
        let _ = state.update(key, raw);
        let listener = Arc::clone(state.listener());
        let detection = evaluate(&listener, state);
        state.exchange(&SystemClock);
        detection
    }

    fn rule(trigger_by: TriggerBy, trigger_on: TriggerOn, field: Option<&str>) -> TriggerRule {
        TriggerRule {
            trigger_by,
            trigger_on,
            field_name: field.map(str::to_string),
            cmd: "echo".to_string(),
        }
    }

    fn temp_schema() -> ValueSchema {
        ValueSchema::json(vec![
            FieldSpec::new("temp", FieldType::Float),
            FieldSpec::new("meta", FieldType::Map),
        ])
    }

    #[test]
    fn received_always_fires() {
        let mut state = state_for(
            rule(TriggerBy::None, TriggerOn::Received, None),
            ValueSchema::default(),
        );
        for _ in 0..3 {
            assert_eq!(feed(&mut state, "same", b"same"), Detection::Received);
        }
    }

    #[test]
    fn key_fires_only_on_change() {
        let mut state = state_for(
            rule(TriggerBy::Key, TriggerOn::Updated, None),
            ValueSchema::default(),
        );
        assert_eq!(feed(&mut state, "a", b""), Detection::KeyChanged);
        assert_eq!(feed(&mut state, "a", b"other"), Detection::Idle);
        assert_eq!(feed(&mut state, "b", b""), Detection::KeyChanged);
    }

    #[test]
    fn field_scenario_fires_on_transitions() {
        let mut state = state_for(
            rule(TriggerBy::Value, TriggerOn::Updated, Some("temp")),
            temp_schema(),
        );
        assert_eq!(feed(&mut state, "k", br#"{"temp": 20.0}"#), Detection::FieldChanged);
        assert_eq!(feed(&mut state, "k", br#"{"temp": 20.0}"#), Detection::Idle);
        assert_eq!(feed(&mut state, "k", br#"{"temp": 21.5}"#), Detection::FieldChanged);
    }

    #[test]
    fn other_fields_do_not_trigger() {
        let mut state = state_for(
            rule(TriggerBy::Value, TriggerOn::Updated, Some("temp")),
            temp_schema(),
        );
        assert_eq!(feed(&mut state, "k", br#"{"temp": 1.0}"#), Detection::FieldChanged);
        assert_eq!(
            feed(&mut state, "k", br#"{"meta": {"a": 1}}"#),
            Detection::Idle
        );
    }

    #[test]
    fn map_fields_compare_deeply() {
        let mut state = state_for(
            rule(TriggerBy::Value, TriggerOn::Updated, Some("meta")),
            temp_schema(),
        );
        assert_eq!(
            feed(&mut state, "k", br#"{"meta": {"a": {"b": 1}}}"#),
            Detection::FieldChanged
        );
        assert_eq!(
            feed(&mut state, "k", br#"{"meta": {"a": {"b": 1}}}"#),
            Detection::Idle
        );
        assert_eq!(
            feed(&mut state, "k", br#"{"meta": {"a": {"b": 2}}}"#),
            Detection::FieldChanged
        );
    }

    #[test]
    fn decode_failure_is_not_a_transition() {
        let mut state = state_for(
            rule(TriggerBy::Value, TriggerOn::Updated, Some("temp")),
            temp_schema(),
        );
        assert_eq!(feed(&mut state, "k", br#"{"temp": 5.0}"#), Detection::FieldChanged);
        assert_eq!(feed(&mut state, "k", br#"{"temp": "hot"}"#), Detection::Idle);
        assert_eq!(feed(&mut state, "k", br#"{"temp": 5.0}"#), Detection::Idle);
    }

    #[test]
    fn raw_topics_compare_checksums() {
        let mut state = state_for(
            rule(TriggerBy::Value, TriggerOn::Updated, None),
            ValueSchema::default(),
        );
        assert_eq!(feed(&mut state, "k", b"abc"), Detection::ChecksumChanged);
        assert_eq!(feed(&mut state, "k", b"abc"), Detection::Idle);
        assert_eq!(feed(&mut state, "x", b"abc"), Detection::Idle);
        assert_eq!(feed(&mut state, "k", b"abd"), Detection::ChecksumChanged);
    }

    #[test]
    fn unknown_field_never_fires() {
        let mut state = state_for(
            rule(TriggerBy::Value, TriggerOn::Updated, Some("pressure")),
            temp_schema(),
        );
        assert_eq!(feed(&mut state, "k", br#"{"temp": 1.0}"#), Detection::Idle);
        assert_eq!(feed(&mut state, "k", br#"{"temp": 2.0}"#), Detection::Idle);
    }

    #[test]
    fn none_never_fires_on_update() {
        let mut state = state_for(
            rule(TriggerBy::None, TriggerOn::Updated, None),
            ValueSchema::default(),
        );
        assert_eq!(feed(&mut state, "a", b"1"), Detection::Idle);
        assert_eq!(feed(&mut state, "b", b"2"), Detection::Idle);
    }
}
