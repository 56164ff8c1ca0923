//! Field schemas and value decoding.
//!
//! A [`ValueSchema`] describes the fields a topic's value is expected to carry.
//! When decoding is enabled (at least one field and `unmarshal_type = "json"`),
//! raw payloads are decoded into a partial [`ValueSnapshot`] containing only
//! the schema fields that were present in the payload.

use crate::value::{FieldValue, ValueSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while decoding a raw value against a schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not valid JSON.
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    /// Payload is valid JSON but not an object.
    #[error("Payload is not a JSON object")]
    NotAnObject,

    /// A schema field carried a value of the wrong type.
    #[error("Field '{field}' is not a valid {expected}")]
    FieldType {
        /// The offending field
        field: String,
        /// The type declared in the schema
        expected: FieldType,
    },
}

/// Declared type of a value field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// Signed 64-bit integer
    Int,
    /// 64-bit float
    Float,
    /// Boolean
    Bool,
    /// Nested JSON object
    Map,
}

impl FieldType {
    /// The value a field of this type holds before any message was seen.
    #[must_use]
    pub fn zero_value(self) -> FieldValue {
        match self {
            Self::String => FieldValue::Str(String::new()),
            Self::Int => FieldValue::Int(0),
            Self::Float => FieldValue::Float(0.0),
            Self::Bool => FieldValue::Bool(false),
            Self::Map => FieldValue::Map(serde_json::Map::new()),
        }
    }

    /// Lowercase configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Map => "map",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            "map" => Ok(Self::Map),
            other => Err(format!("unknown field type '{other}'")),
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.as_str().to_string()
    }
}

/// One expected field of a topic's value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name (unique within a schema)
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Localized label, informational only
    #[serde(default, alias = "zh_cn", alias = "zhCN")]
    pub zh_label: String,
}

impl FieldSpec {
    /// Create a field spec without a label.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            zh_label: String::new(),
        }
    }
}

/// How a topic's raw value is decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DecodeFormat {
    /// Decode as a JSON object
    #[default]
    Json,
    /// Never decode; changes are detected on raw bytes
    Raw,
}

impl FromStr for DecodeFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" | "" => Ok(Self::Json),
            "raw" | "none" => Ok(Self::Raw),
            other => Err(format!("unknown unmarshal type '{other}'")),
        }
    }
}

impl TryFrom<String> for DecodeFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DecodeFormat> for String {
    fn from(value: DecodeFormat) -> Self {
        match value {
            DecodeFormat::Json => "json".to_string(),
            DecodeFormat::Raw => "raw".to_string(),
        }
    }
}

/// The expected shape of a topic's value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSchema {
    /// All declared fields
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Decoding format
    #[serde(default, rename = "unmarshal_type", alias = "unmarshalType")]
    pub format: DecodeFormat,
}

impl ValueSchema {
    /// Create a JSON schema from a list of fields.
    #[must_use]
    pub const fn json(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            format: DecodeFormat::Json,
        }
    }

    /// Whether raw values are decoded against this schema.
    #[must_use]
    pub fn decodes(&self) -> bool {
        !self.fields.is_empty() && self.format == DecodeFormat::Json
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the first field declared more than once, if any.
    #[must_use]
    pub fn duplicate_field(&self) -> Option<&str> {
        self.fields.iter().enumerate().find_map(|(i, field)| {
            self.fields[..i]
                .iter()
                .any(|earlier| earlier.name == field.name)
                .then_some(field.name.as_str())
        })
    }

    /// A snapshot holding the zero value of every field.
    #[must_use]
    pub fn zero_snapshot(&self) -> ValueSnapshot {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.field_type.zero_value()))
            .collect()
    }

    /// Decode a raw payload into the schema fields it contains.
    ///
    /// Fields missing from the payload are absent from the result; keys the
    /// schema does not declare are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is not a JSON object or a
    /// declared field has a value of the wrong type. Nothing is returned on
    /// error, so callers never merge a half-decoded value.
    pub fn decode(&self, raw: &[u8]) -> Result<ValueSnapshot, DecodeError> {
        let json: serde_json::Value =
            serde_json::from_slice(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        let serde_json::Value::Object(object) = json else {
            return Err(DecodeError::NotAnObject);
        };

        let mut decoded = ValueSnapshot::new();
        for spec in &self.fields {
            let Some(value) = object.get(&spec.name) else {
                continue;
            };
            let field = FieldValue::from_json(spec.field_type, value).ok_or_else(|| {
                DecodeError::FieldType {
                    field: spec.name.clone(),
                    expected: spec.field_type,
                }
            })?;
            decoded.insert(spec.name.clone(), field);
        }

        Ok(decoded)
    }
}
