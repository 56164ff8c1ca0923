//! Tagged field values.
//!
//! Decoded payload fields are held as a closed set of variants so that
//! equality and argument rendering are total over every field type.

use crate::schema::FieldType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Decoded fields of a topic value, keyed by field name.
pub type ValueSnapshot = BTreeMap<String, FieldValue>;

/// A single decoded field value.
///
/// Equality is structural for every variant, including nested maps.
///
/// # Examples
///
/// ```
/// use mq_listener_core::value::FieldValue;
///
/// assert_eq!(FieldValue::Bool(true).to_argument(), "true");
/// assert_eq!(FieldValue::Float(3.5).to_argument(), "3.5");
/// assert_eq!(FieldValue::Float(20.0).to_argument(), "20");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// String value
    Str(String),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// Nested object
    Map(serde_json::Map<String, serde_json::Value>),
}

impl FieldValue {
    /// The schema type this value belongs to.
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        match self {
            Self::Str(_) => FieldType::String,
            Self::Int(_) => FieldType::Int,
            Self::Float(_) => FieldType::Float,
            Self::Bool(_) => FieldType::Bool,
            Self::Map(_) => FieldType::Map,
        }
    }

    /// Coerce a JSON value into the declared field type.
    ///
    /// Returns `None` when the JSON value cannot represent the type. Integers
    /// accept floats with no fractional part (`20.0` is the integer `20`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn from_json(field_type: FieldType, value: &serde_json::Value) -> Option<Self> {
        match field_type {
            FieldType::String => value.as_str().map(|s| Self::Str(s.to_string())),
            FieldType::Int => value.as_i64().map(Self::Int).or_else(|| {
                value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| Self::Int(f as i64))
            }),
            FieldType::Float => value.as_f64().map(Self::Float),
            FieldType::Bool => value.as_bool().map(Self::Bool),
            FieldType::Map => value.as_object().map(|m| Self::Map(m.clone())),
        }
    }

    /// Render the value as a single command-line argument.
    ///
    /// Strings are passed verbatim, booleans as `true`/`false`, integers in
    /// base 10, floats as the shortest decimal that round-trips and maps as
    /// compact JSON.
    #[must_use]
    pub fn to_argument(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Map(m) => serde_json::to_string(m).unwrap_or_default(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_argument())
    }
}
