//! Trigger rules and validated listeners.
//!
//! A [`TriggerRule`] is the configured "when and how" for a topic. A
//! [`Listener`] pairs the rule with the topic's [`ValueSchema`] and resolves,
//! once, how value-based triggering behaves for that combination.

use crate::schema::ValueSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a trigger is based on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TriggerBy {
    /// Never triggers on updates
    #[default]
    None,
    /// The record key
    Key,
    /// The record value (a schema field, or raw bytes)
    Value,
}

impl TriggerBy {
    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Key => "key",
            Self::Value => "value",
        }
    }
}

impl fmt::Display for TriggerBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "not" => Ok(Self::None),
            "key" => Ok(Self::Key),
            "value" => Ok(Self::Value),
            other => Err(format!("unknown trigger basis '{other}'")),
        }
    }
}

impl TryFrom<String> for TriggerBy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TriggerBy> for String {
    fn from(value: TriggerBy) -> Self {
        value.as_str().to_string()
    }
}

/// When a trigger is evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TriggerOn {
    /// Every received record triggers
    Received,
    /// Only records that change the snapshot trigger
    #[default]
    Updated,
}

impl TriggerOn {
    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Updated => "updated",
        }
    }
}

impl fmt::Display for TriggerOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "received" => Ok(Self::Received),
            "" | "updated" => Ok(Self::Updated),
            other => Err(format!("unknown trigger timing '{other}'")),
        }
    }
}

impl TryFrom<String> for TriggerOn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TriggerOn> for String {
    fn from(value: TriggerOn) -> Self {
        value.as_str().to_string()
    }
}

/// When and how to run a command for a topic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    /// Trigger basis
    #[serde(default, rename = "where", alias = "trigger_by")]
    pub trigger_by: TriggerBy,
    /// Trigger timing
    #[serde(default, rename = "on_event", alias = "onEvent", alias = "trigger_on")]
    pub trigger_on: TriggerOn,
    /// Value field whose changes trigger, for `trigger_by = "value"`
    #[serde(default, alias = "fieldName")]
    pub field_name: Option<String>,
    /// Command template; the trigger argument is appended at dispatch time
    #[serde(default)]
    pub cmd: String,
}

impl TriggerRule {
    /// The configured field name, treating an empty string as unset.
    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref().filter(|name| !name.is_empty())
    }

    /// The command template split on whitespace.
    #[must_use]
    pub fn command_tokens(&self) -> Vec<String> {
        self.cmd.split_whitespace().map(str::to_string).collect()
    }
}

/// How value changes are detected for a listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueTrigger {
    /// Value-based triggering is off for this listener
    Disabled,
    /// Compare a decoded schema field
    Field(String),
    /// Compare checksums of the raw payload
    Checksum,
}

/// A topic's rule and schema, validated together.
///
/// # Examples
///
/// ```
/// use mq_listener_core::rule::{Listener, TriggerBy, TriggerRule, ValueTrigger};
/// use mq_listener_core::schema::ValueSchema;
///
/// let rule = TriggerRule {
///     trigger_by: TriggerBy::Value,
///     ..TriggerRule::default()
/// };
/// let listener = Listener::new("raw", rule, ValueSchema::default());
/// assert_eq!(listener.value_trigger(), &ValueTrigger::Checksum);
/// ```
#[derive(Clone, Debug)]
pub struct Listener {
    topic: String,
    rule: TriggerRule,
    schema: ValueSchema,
    value_trigger: ValueTrigger,
}

impl Listener {
    /// Build a listener, resolving the value trigger.
    #[must_use]
    pub fn new(topic: impl Into<String>, rule: TriggerRule, schema: ValueSchema) -> Self {
        let value_trigger = match rule.field_name() {
            Some(name) if schema.field(name).is_none() => ValueTrigger::Disabled,
            Some(name) if schema.decodes() => ValueTrigger::Field(name.to_string()),
            Some(_) => ValueTrigger::Checksum,
            None if schema.decodes() => ValueTrigger::Disabled,
            None => ValueTrigger::Checksum,
        };

        Self {
            topic: topic.into(),
            rule,
            schema,
            value_trigger,
        }
    }

    /// The topic this listener watches.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The trigger rule.
    #[must_use]
    pub const fn rule(&self) -> &TriggerRule {
        &self.rule
    }

    /// The value schema.
    #[must_use]
    pub const fn schema(&self) -> &ValueSchema {
        &self.schema
    }

    /// How value changes are detected.
    #[must_use]
    pub const fn value_trigger(&self) -> &ValueTrigger {
        &self.value_trigger
    }

    /// True when the rule asks for value triggering but it cannot work,
    /// e.g. the field name is not part of the schema.
    #[must_use]
    pub fn is_misconfigured(&self) -> bool {
        self.rule.trigger_by == TriggerBy::Value && self.value_trigger == ValueTrigger::Disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DecodeFormat, FieldSpec, FieldType};

    fn value_rule(field: Option<&str>) -> TriggerRule {
        TriggerRule {
            trigger_by: TriggerBy::Value,
            trigger_on: TriggerOn::Updated,
            field_name: field.map(str::to_string),
            cmd: "echo".to_string(),
        }
    }

    fn temp_schema() -> ValueSchema {
        ValueSchema::json(vec![FieldSpec::new("temp", FieldType::Float)])
    }

    #[test]
    fn parses_trigger_enums_loosely() {
        assert_eq!("KEY".parse::<TriggerBy>(), Ok(TriggerBy::Key));
        assert_eq!("NOT".parse::<TriggerBy>(), Ok(TriggerBy::None));
        assert_eq!("Received".parse::<TriggerOn>(), Ok(TriggerOn::Received));
        assert!("sometimes".parse::<TriggerOn>().is_err());
    }

    #[test]
    fn command_template_splits_on_whitespace() {
        let rule = TriggerRule {
            cmd: "  /bin/sh   -c  notify ".to_string(),
            ..TriggerRule::default()
        };
        assert_eq!(rule.command_tokens(), vec!["/bin/sh", "-c", "notify"]);
    }

    #[test]
    fn empty_field_name_is_unset() {
        assert_eq!(value_rule(Some("")).field_name(), None);
    }

    #[test]
    fn resolves_field_trigger() {
        let listener = Listener::new("sensor", value_rule(Some("temp")), temp_schema());
        assert_eq!(
            listener.value_trigger(),
            &ValueTrigger::Field("temp".to_string())
        );
        assert!(!listener.is_misconfigured());
    }

    #[test]
    fn unknown_field_disables_value_trigger() {
        let listener = Listener::new("sensor", value_rule(Some("humidity")), temp_schema());
        assert_eq!(listener.value_trigger(), &ValueTrigger::Disabled);
        assert!(listener.is_misconfigured());
    }

    #[test]
    fn raw_schema_falls_back_to_checksum() {
        let schema = ValueSchema {
            format: DecodeFormat::Raw,
            ..temp_schema()
        };
        let listener = Listener::new("sensor", value_rule(Some("temp")), schema);
        assert_eq!(listener.value_trigger(), &ValueTrigger::Checksum);

        let listener = Listener::new("raw", value_rule(None), ValueSchema::default());
        assert_eq!(listener.value_trigger(), &ValueTrigger::Checksum);
    }

    #[test]
    fn decoded_schema_without_field_is_disabled() {
        let listener = Listener::new("sensor", value_rule(None), temp_schema());
        assert_eq!(listener.value_trigger(), &ValueTrigger::Disabled);
    }

    #[test]
    fn rule_deserializes_with_defaults() {
        let rule: TriggerRule = serde_json::from_str(r#"{"where": "Key", "cmd": "run.sh"}"#)
            .unwrap_or_default();
        assert_eq!(rule.trigger_by, TriggerBy::Key);
        assert_eq!(rule.trigger_on, TriggerOn::Updated);
        assert_eq!(rule.field_name, None);
        assert_eq!(rule.cmd, "run.sh");
    }
}
