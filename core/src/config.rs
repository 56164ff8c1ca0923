//! Listener configuration.
//!
//! Configuration is read from a TOML file and then adjusted from environment
//! variables. Each `[[listeners]]` entry names a topic, its trigger rule
//! (`monitor`) and its value schema (`value`).
//!
//! # Example
//!
//! ```toml
//! name = "edge-01"
//! logger_topic = "MQ_LISTENER"
//!
//! [broker]
//! brokers = "127.0.0.1:9092"
//!
//! [[listeners]]
//! topic = "sensor"
//! monitor = { where = "value", on_event = "updated", field_name = "temp", cmd = "/opt/hooks/temp.sh" }
//!
//! [listeners.value]
//! unmarshal_type = "json"
//! fields = [
//!     { name = "temp", type = "float", zh_label = "温度" },
//! ]
//! ```
//!
//! # Environment Overrides
//!
//! | Variable                | Field                     |
//! |-------------------------|---------------------------|
//! | `BROKER_ADDRESSES`      | `broker.brokers`          |
//! | `BROKER_CONSUMER_GROUP` | `broker.consumer_group`   |
//! | `BROKER_SASL_USERNAME`  | `broker.sasl_username`    |
//! | `BROKER_SASL_PASSWORD`  | `broker.sasl_password`    |
//! | `LISTENER_NAME`         | `name`                    |
//! | `DEBUG`                 | `debug`                   |
//! | `METRICS_ADDR`          | `metrics_addr`            |

use crate::rule::{Listener, TriggerRule};
use crate::schema::ValueSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Reporting topic used when none is configured.
pub const DEFAULT_REPORT_TOPIC: &str = "MQ_LISTENER";

/// Config file used when neither the CLI nor `CONFIG_FILEPATH` name one.
pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override has an unusable value
    #[error("Invalid value '{value}' for environment variable {var}")]
    InvalidOverride {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker addresses (comma-separated)
    #[serde(default = "default_brokers")]
    pub brokers: String,
    /// Consumer group; derived from the topics when unset
    #[serde(default)]
    pub consumer_group: Option<String>,
    /// Where a new consumer group starts reading: earliest, latest
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,
    /// Security protocol: plaintext, ssl, `sasl_plaintext`, `sasl_ssl`
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
    /// SASL mechanism: PLAIN, SCRAM-SHA-256, SCRAM-SHA-512
    #[serde(default)]
    pub sasl_mechanism: Option<String>,
    /// SASL username
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL password
    #[serde(default)]
    pub sasl_password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            consumer_group: None,
            auto_offset_reset: default_offset_reset(),
            security_protocol: default_security_protocol(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
        }
    }
}

/// One watched topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Topic name
    pub topic: String,
    /// Trigger rule
    #[serde(default, alias = "rule")]
    pub monitor: TriggerRule,
    /// Value schema
    #[serde(default)]
    pub value: ValueSchema,
}

impl ListenerConfig {
    /// Turn the configuration into a validated listener.
    #[must_use]
    pub fn into_listener(self) -> Listener {
        Listener::new(self.topic, self.monitor, self.value)
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service name, also part of the reporting key
    #[serde(default = "default_name")]
    pub name: String,
    /// Debug logging
    #[serde(default)]
    pub debug: bool,
    /// Broker settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Topic outcome reports are published to
    #[serde(default = "default_report_topic", alias = "loggerTopic")]
    pub logger_topic: String,
    /// Prometheus scrape endpoint, disabled when unset
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
    /// How long shutdown waits for running commands
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Watched topics
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            debug: false,
            broker: BrokerConfig::default(),
            logger_topic: default_report_topic(),
            metrics_addr: None,
            shutdown_timeout_secs: default_shutdown_timeout(),
            listeners: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, an
    /// override is invalid, or validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve the config file path: explicit path, then `CONFIG_FILEPATH`, then the default.
    #[must_use]
    pub fn resolve_path<F>(explicit: Option<PathBuf>, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        explicit
            .or_else(|| lookup("CONFIG_FILEPATH").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Apply environment overrides using the given lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if `DEBUG` or `METRICS_ADDR`
    /// cannot be parsed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(brokers) = lookup("BROKER_ADDRESSES") {
            self.broker.brokers = brokers;
        }
        if let Some(group) = lookup("BROKER_CONSUMER_GROUP") {
            self.broker.consumer_group = Some(group);
        }
        if let Some(username) = lookup("BROKER_SASL_USERNAME") {
            self.broker.sasl_username = Some(username);
        }
        if let Some(password) = lookup("BROKER_SASL_PASSWORD") {
            self.broker.sasl_password = Some(password);
        }
        if let Some(name) = lookup("LISTENER_NAME") {
            self.name = name;
        }
        if let Some(debug) = lookup("DEBUG") {
            self.debug = parse_bool(&debug).ok_or_else(|| ConfigError::InvalidOverride {
                var: "DEBUG".to_string(),
                value: debug.clone(),
            })?;
        }
        if let Some(addr) = lookup("METRICS_ADDR") {
            self.metrics_addr =
                Some(addr.parse().map_err(|_| ConfigError::InvalidOverride {
                    var: "METRICS_ADDR".to_string(),
                    value: addr.clone(),
                })?);
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// A rule whose field is missing from its schema is not an error; value
    /// triggering is simply disabled for that listener.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an empty name, empty or
    /// duplicate topics, or duplicate field names within a schema.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("name must not be empty".to_string()));
        }

        let mut topics = HashSet::new();
        for listener in &self.listeners {
            if listener.topic.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "listener topic must not be empty".to_string(),
                ));
            }
            if !topics.insert(listener.topic.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "topic '{}' is configured more than once",
                    listener.topic
                )));
            }
            if let Some(field) = listener.value.duplicate_field() {
                return Err(ConfigError::Validation(format!(
                    "field '{field}' is declared more than once for topic '{}'",
                    listener.topic
                )));
            }
        }

        Ok(())
    }

    /// The reporting topic, falling back to [`DEFAULT_REPORT_TOPIC`].
    #[must_use]
    pub fn report_topic(&self) -> &str {
        if self.logger_topic.is_empty() {
            DEFAULT_REPORT_TOPIC
        } else {
            &self.logger_topic
        }
    }

    /// Key outcome reports are published with: `<topic>_<NAME>`.
    #[must_use]
    pub fn report_key(&self) -> String {
        format!("{}_{}", self.report_topic(), self.name.to_uppercase())
    }

    /// Validated listeners for every configured topic.
    #[must_use]
    pub fn listeners(&self) -> Vec<Listener> {
        self.listeners
            .iter()
            .cloned()
            .map(ListenerConfig::into_listener)
            .collect()
    }

    /// Topics to subscribe to: every configured topic except the reporting topic.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.listeners
            .iter()
            .map(|l| l.topic.clone())
            .filter(|topic| topic != self.report_topic())
            .collect()
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Default log filter for this configuration.
    #[must_use]
    pub const fn log_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_name() -> String {
    "listener".to_string()
}

fn default_brokers() -> String {
    "127.0.0.1:9092".to_string()
}

fn default_offset_reset() -> String {
    "latest".to_string()
}

fn default_security_protocol() -> String {
    "plaintext".to_string()
}

fn default_report_topic() -> String {
    DEFAULT_REPORT_TOPIC.to_string()
}

const fn default_shutdown_timeout() -> u64 {
    30
}
