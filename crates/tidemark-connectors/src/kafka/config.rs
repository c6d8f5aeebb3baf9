//! Kafka change source configuration.
//!
//! [`KafkaSourceConfig`] is parsed from a [`ConnectorConfig`] built from the
//! catalog's source directory entry.

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::ClientConfig;

use crate::config::ConnectorConfig;
use crate::error::ConnectorError;

/// How the consumer subscribes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSubscription {
    /// Explicit topic names.
    Topics(Vec<String>),
    /// Regular expression over topic names.
    Pattern(String),
}

/// Configuration for [`KafkaChangeSource`](super::KafkaChangeSource).
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    /// Kafka broker addresses (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group id.
    pub group_id: String,
    /// Topics or topic pattern.
    pub subscription: TopicSubscription,
    /// Where a group without committed offsets starts.
    pub auto_offset_reset: String,
    /// Consumer session timeout.
    pub session_timeout: Duration,
    /// Timeout for seek calls during rewind.
    pub seek_timeout: Duration,
    /// Additional rdkafka client properties (pass-through).
    pub kafka_properties: HashMap<String, String>,
}

impl Default for KafkaSourceConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: String::new(),
            group_id: String::new(),
            subscription: TopicSubscription::Topics(Vec::new()),
            auto_offset_reset: "earliest".to_string(),
            session_timeout: Duration::from_secs(45),
            seek_timeout: Duration::from_secs(10),
            kafka_properties: HashMap::new(),
        }
    }
}

impl KafkaSourceConfig {
    /// Parses a source config.
    ///
    /// Recognized keys: `bootstrap.servers`, `group.id`, `topics`
    /// (comma-separated) or `topic.pattern`, `auto.offset.reset`,
    /// `session.timeout.ms`, `seek.timeout.ms`, and `kafka.*` pass-through.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::MissingConfig` if required keys are absent,
    /// or `ConnectorError::ConfigurationError` on invalid values.
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, ConnectorError> {
        let mut cfg = Self {
            bootstrap_servers: config.require("bootstrap.servers")?.to_string(),
            group_id: config.require("group.id")?.to_string(),
            ..Self::default()
        };

        let topics = config.get_list("topics");
        cfg.subscription = match (topics.is_empty(), config.get("topic.pattern")) {
            (false, None) => TopicSubscription::Topics(topics),
            (true, Some(p)) if !p.is_empty() => TopicSubscription::Pattern(p.to_string()),
            (false, Some(_)) => {
                return Err(ConnectorError::ConfigurationError(
                    "'topics' and 'topic.pattern' are mutually exclusive".into(),
                ))
            }
            _ => return Err(ConnectorError::MissingConfig("topics".into())),
        };

        if let Some(reset) = config.get("auto.offset.reset") {
            if !matches!(reset, "earliest" | "latest") {
                return Err(ConnectorError::ConfigurationError(format!(
                    "invalid auto.offset.reset: '{reset}' (expected 'earliest' or 'latest')"
                )));
            }
            cfg.auto_offset_reset = reset.to_string();
        }
        if let Some(ms) = config.get_parsed::<u64>("session.timeout.ms")? {
            cfg.session_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = config.get_parsed::<u64>("seek.timeout.ms")? {
            cfg.seek_timeout = Duration::from_millis(ms);
        }
        cfg.kafka_properties = config.properties_with_prefix("kafka.");
        Ok(cfg)
    }

    /// Builds the rdkafka client configuration.
    ///
    /// Offsets are committed manually after each applied batch.
    #[must_use]
    pub fn to_rdkafka_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set("enable.partition.eof", "false");
        for (k, v) in &self.kafka_properties {
            client.set(k, v);
        }
        client
    }
}
