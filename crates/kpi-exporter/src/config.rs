// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exporter configuration.
//!
//! Per-topic shaping rules plus the InfluxDB connection, loaded from YAML.

use crate::keyfmt::KeyFormat;
use crate::point::{BatchPointsConfig, Precision};
use crate::value::EntryType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How a message is turned into point fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShapeMode {
    /// Declared-field extraction driven by `fields`.
    #[default]
    #[serde(alias = "")]
    None,
    /// Every key is a bucket bound, every value a count.
    Histogram,
    /// Every key is a ranked item, every value its score.
    TopK,
}

impl ShapeMode {
    /// Name as written in the `type` key (`none` for declared fields).
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeMode::None => "none",
            ShapeMode::Histogram => "histogram",
            ShapeMode::TopK => "top-k",
        }
    }

    /// Whole-message modes copy every key of the message.
    pub fn is_whole_message(&self) -> bool {
        !matches!(self, ShapeMode::None)
    }

    fn is_none(&self) -> bool {
        matches!(self, ShapeMode::None)
    }
}

/// Shaping rules for one topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Topic name, also used as the measurement name.
    pub topic: String,

    /// Shaping mode. Takes precedence over `fields` when set.
    #[serde(rename = "type", default, skip_serializing_if = "ShapeMode::is_none")]
    pub shape: ShapeMode,

    /// Bucket key template for histogram and top-k topics.
    #[serde(
        default,
        alias = "key-format",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_format: Option<KeyFormat>,

    /// Declared entry key -> declared type (`number` or `string`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl TopicConfig {
    /// Topic whose messages are histograms.
    pub fn histogram(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            shape: ShapeMode::Histogram,
            ..Default::default()
        }
    }

    /// Topic whose messages are top-k rankings.
    pub fn top_k(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            shape: ShapeMode::TopK,
            ..Default::default()
        }
    }

    /// Topic with declared fields only.
    pub fn declared(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Set the bucket key template.
    pub fn key_format(mut self, format: KeyFormat) -> Self {
        self.key_format = Some(format);
        self
    }

    /// Declare a field.
    pub fn field(mut self, key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        self.fields.insert(key.into(), entry_type.into());
        self
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Topic {} has an empty name",
                index
            )));
        }

        if self.shape.is_whole_message() {
            if !self.fields.is_empty() {
                tracing::warn!(
                    topic = %self.topic,
                    "fields are ignored for {} topics",
                    self.shape.as_str()
                );
            }
            return Ok(());
        }

        if self.fields.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Topic \"{}\" declares no fields and no type",
                self.topic
            )));
        }

        if self.key_format.is_some() {
            tracing::warn!(topic = %self.topic, "key_format is ignored without a type");
        }

        // Unknown types are reported per message at runtime; flag them early too.
        for (key, entry_type) in &self.fields {
            if EntryType::parse(entry_type).is_none() {
                tracing::warn!(
                    topic = %self.topic,
                    "unknown entry type \"{}\" for entry key \"{}\" topic \"{}\"",
                    entry_type,
                    key,
                    self.topic
                );
            }
        }

        Ok(())
    }
}

/// InfluxDB connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    /// Base URL (e.g., "http://localhost:8086").
    pub url: String,
    /// Target database.
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Retention policy. Empty = database default.
    #[serde(default)]
    pub retention_policy: String,
    /// Timestamp precision of written points.
    #[serde(default = "default_precision")]
    pub precision: String,
    /// HTTP request timeout (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_precision() -> String {
    "ns".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl InfluxDbConfig {
    /// Connection with defaults for everything but the address.
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            username: None,
            password: None,
            retention_policy: String::new(),
            precision: default_precision(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Parse a `host:port` or `user:password@host:port` connection string.
    pub fn from_connect_string(connect: &str, database: impl Into<String>) -> Result<Self, ConfigError> {
        let (credentials, address) = match connect.rsplit_once('@') {
            Some((creds, addr)) => (Some(creds), addr),
            None => (None, connect),
        };

        if address.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "InfluxDB connection string {:?} has no address",
                connect
            )));
        }

        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let mut config = Self::new(url, database);
        if let Some(creds) = credentials {
            let (user, password) = creds.split_once(':').unwrap_or((creds, ""));
            config.username = Some(user.to_string());
            config.password = Some(password.to_string());
        }
        Ok(config)
    }

    /// Parameters for batches written to this database.
    pub fn batch_config(&self) -> BatchPointsConfig {
        BatchPointsConfig {
            database: self.database.clone(),
            retention_policy: self.retention_policy.clone(),
            precision: self.precision.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Invalid("InfluxDB url is empty".into()));
        }
        if self.database.is_empty() {
            return Err(ConfigError::Invalid("InfluxDB database is empty".into()));
        }
        self.precision
            .parse::<Precision>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

/// Top-level exporter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// InfluxDB connection settings.
    pub influxdb: InfluxDbConfig,
    /// Per-topic shaping rules.
    #[serde(default)]
    pub topics: Vec<TopicConfig>,
}

impl ExporterConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.influxdb.validate()?;

        if self.topics.is_empty() {
            return Err(ConfigError::Invalid("No topics configured".into()));
        }

        let mut seen = HashSet::new();
        for (i, topic) in self.topics.iter().enumerate() {
            topic.validate(i)?;
            if !seen.insert(topic.topic.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Topic \"{}\" is configured more than once",
                    topic.topic
                )));
            }
        }

        Ok(())
    }

    /// Look up the rules for a topic.
    pub fn topic(&self, name: &str) -> Option<&TopicConfig> {
        self.topics.iter().find(|t| t.topic == name)
    }

    /// Configuration written by `kpi-exporter gen-config`.
    pub fn example() -> Self {
        let padding = KeyFormat::parse("%04d").ok();
        Self {
            influxdb: InfluxDbConfig::new("http://localhost:8086", "kpi"),
            topics: vec![
                TopicConfig {
                    key_format: padding,
                    ..TopicConfig::histogram("request-latency")
                },
                TopicConfig::top_k("top-endpoints"),
                TopicConfig::declared("service-events")
                    .field("count", "number")
                    .field("host", "string"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
influxdb:
  url: "http://localhost:8086"
  database: "kpi"
topics:
  - topic: "events"
    fields:
      count: number
"#;

    const FULL_YAML: &str = r#"
influxdb:
  url: "http://influx.example.com:8086"
  database: "telemetry"
  username: "exporter"
  password: "test-password-placeholder"
  retention_policy: "one_week"
  precision: "ms"
  timeout_ms: 2500
topics:
  - topic: "latency"
    type: histogram
    key_format: "%04d"
  - topic: "ranking"
    type: top-k
  - topic: "legacy"
    type: histogram
    key-format: "%06d"
  - topic: "events"
    fields:
      count: number
      host: string
"#;

    #[test]
    fn test_config_parse_minimal() {
        let config = ExporterConfig::from_yaml(MINIMAL_YAML).expect("parse minimal yaml");

        assert_eq!(config.influxdb.url, "http://localhost:8086");
        assert_eq!(config.influxdb.database, "kpi");
        assert!(config.influxdb.username.is_none());
        assert_eq!(config.influxdb.precision, "ns");
        assert_eq!(config.influxdb.timeout_ms, 10_000);

        assert_eq!(config.topics.len(), 1);
        let events = &config.topics[0];
        assert_eq!(events.topic, "events");
        assert_eq!(events.shape, ShapeMode::None);
        assert!(events.key_format.is_none());
        assert_eq!(events.fields.get("count").map(String::as_str), Some("number"));
    }

    #[test]
    fn test_config_parse_all_fields() {
        let config = ExporterConfig::from_yaml(FULL_YAML).expect("parse full yaml");

        assert_eq!(config.influxdb.username.as_deref(), Some("exporter"));
        assert_eq!(config.influxdb.retention_policy, "one_week");
        assert_eq!(config.influxdb.precision, "ms");
        assert_eq!(config.influxdb.timeout_ms, 2500);

        let latency = config.topic("latency").expect("latency");
        assert_eq!(latency.shape, ShapeMode::Histogram);
        assert_eq!(
            latency.key_format.as_ref().map(KeyFormat::template),
            Some("%04d")
        );

        let ranking = config.topic("ranking").expect("ranking");
        assert_eq!(ranking.shape, ShapeMode::TopK);
        assert!(ranking.key_format.is_none());

        let legacy = config.topic("legacy").expect("legacy");
        assert_eq!(
            legacy.key_format.as_ref().map(KeyFormat::template),
            Some("%06d")
        );

        let events = config.topic("events").expect("events");
        assert_eq!(events.fields.len(), 2);
        assert!(config.topic("missing").is_none());

        let batch = config.influxdb.batch_config();
        assert_eq!(batch.database, "telemetry");
        assert_eq!(batch.retention_policy, "one_week");
        assert_eq!(batch.precision, "ms");
    }

    #[test]
    fn test_config_rejects_bad_key_format() {
        let yaml = r#"
influxdb:
  url: "http://localhost:8086"
  database: "kpi"
topics:
  - topic: "latency"
    type: histogram
    key_format: "%s"
"#;
        assert!(matches!(
            ExporterConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        let mut config = ExporterConfig {
            influxdb: InfluxDbConfig::new("http://localhost:8086", "kpi"),
            topics: Vec::new(),
        };
        assert!(config.validate().is_err()); // No topics

        config.topics.push(TopicConfig::declared("events"));
        assert!(config.validate().is_err()); // No fields, no type

        config.topics[0] = TopicConfig::declared("events").field("count", "number");
        assert!(config.validate().is_ok());

        config.topics.push(TopicConfig::histogram("events"));
        assert!(config.validate().is_err()); // Duplicate

        config.topics.pop();
        config.influxdb.precision = "fortnight".into();
        assert!(config.validate().is_err());

        config.influxdb.precision = "s".into();
        config.influxdb.database.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_entry_type_is_not_a_load_error() {
        let yaml = r#"
influxdb:
  url: "http://localhost:8086"
  database: "kpi"
topics:
  - topic: "events"
    fields:
      bar: mystery
"#;
        let config = ExporterConfig::from_yaml(yaml).expect("parse");
        assert_eq!(config.topics[0].fields["bar"], "mystery");
    }

    #[test]
    fn test_connect_string_with_credentials() {
        let config =
            InfluxDbConfig::from_connect_string("admin:s3cret@10.0.0.5:8086", "kpi").expect("parse");
        assert_eq!(config.url, "http://10.0.0.5:8086");
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.password.as_deref(), Some("s3cret"));
        assert_eq!(config.database, "kpi");
    }

    #[test]
    fn test_connect_string_without_credentials() {
        let config = InfluxDbConfig::from_connect_string("influx:8086", "kpi").expect("parse");
        assert_eq!(config.url, "http://influx:8086");
        assert!(config.username.is_none());
        assert!(config.password.is_none());

        assert!(InfluxDbConfig::from_connect_string("user:pw@", "kpi").is_err());
    }

    #[test]
    fn test_example_round_trips_through_yaml() {
        let example = ExporterConfig::example();
        example.validate().expect("example is valid");

        let yaml = example.to_yaml().expect("serialize");
        assert!(yaml.contains("type: histogram"));
        assert!(yaml.contains("type: top-k"));
        assert!(yaml.contains("%04d"));

        let parsed = ExporterConfig::from_yaml(&yaml).expect("reparse");
        assert_eq!(parsed, example);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("exporter.yaml");
        std::fs::write(&path, MINIMAL_YAML).expect("write");

        let config = ExporterConfig::from_file(&path).expect("load");
        assert_eq!(config.topics.len(), 1);

        let missing = ExporterConfig::from_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
