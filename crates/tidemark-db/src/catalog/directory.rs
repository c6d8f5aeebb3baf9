//! Source directory, sync modes and runtime parameters.

use std::fmt;
use std::str::FromStr;

use tidemark_connectors::cdc::debezium::DecoderConfig;
use tidemark_connectors::ConnectorConfig;
use tidemark_core::sql::{quote_literal, render_literal};
use tidemark_core::store::Row;
use tidemark_core::{Error, Result};

use super::ddl::CATALOG_SCHEMA;

/// Per-source streaming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncMode {
    /// Normal streaming with a single consumer.
    #[default]
    NoSync,
    /// Resynchronization window: rows not re-observed are closed on
    /// `end_sync`, and consumption fans out.
    Resync,
}

impl SyncMode {
    /// Persisted form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::NoSync => "nosync",
            SyncMode::Resync => "resync",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nosync" | "normal" => Ok(SyncMode::NoSync),
            "resync" => Ok(SyncMode::Resync),
            other => Err(Error::Catalog(format!("unknown sync mode '{other}'"))),
        }
    }
}

/// A registered upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceEntry {
    /// Source name; stamped into `__source`.
    pub name: String,
    /// Broker bootstrap list.
    pub brokers: String,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Consumer group id.
    pub consumer_group: String,
    /// Schema pass filters (regular expressions).
    pub schema_pass_filter: Vec<String>,
    /// Schema stop filters (regular expressions).
    pub schema_stop_filter: Vec<String>,
    /// Prefix trimmed from upstream schema names.
    pub trim_schema_prefix: Option<String>,
    /// Prefix added to schema names.
    pub add_schema_prefix: Option<String>,
}

impl SourceEntry {
    /// Decoder settings for this source.
    #[must_use]
    pub fn decoder_config(&self, origins: &[String]) -> DecoderConfig {
        DecoderConfig {
            source_name: self.name.clone(),
            origins: origins.to_vec(),
            schema_pass_filter: self.schema_pass_filter.clone(),
            schema_stop_filter: self.schema_stop_filter.clone(),
            trim_schema_prefix: self.trim_schema_prefix.clone(),
            add_schema_prefix: self.add_schema_prefix.clone(),
        }
    }

    /// Broker connector settings for this source.
    #[must_use]
    pub fn connector_config(&self) -> ConnectorConfig {
        let mut config = ConnectorConfig::new("kafka");
        config.set("bootstrap.servers", self.brokers.clone());
        config.set("group.id", self.consumer_group.clone());
        config.set("topics", self.topics.join(","));
        config
    }

    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.text(0)?.to_string(),
            brokers: row.text(1)?.to_string(),
            topics: split(row.get(2), ','),
            consumer_group: row.text(3)?.to_string(),
            schema_pass_filter: split(row.get(4), '\n'),
            schema_stop_filter: split(row.get(5), '\n'),
            trim_schema_prefix: row.get(6).filter(|s| !s.is_empty()).map(str::to_string),
            add_schema_prefix: row.get(7).filter(|s| !s.is_empty()).map(str::to_string),
        })
    }

    pub(crate) fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {CATALOG_SCHEMA}.source (name, brokers, topics, consumer_group, \
             schema_pass_filter, schema_stop_filter, trim_schema_prefix, add_schema_prefix) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}) \
             ON CONFLICT (name) DO UPDATE SET brokers = EXCLUDED.brokers, \
             topics = EXCLUDED.topics, consumer_group = EXCLUDED.consumer_group, \
             schema_pass_filter = EXCLUDED.schema_pass_filter, \
             schema_stop_filter = EXCLUDED.schema_stop_filter, \
             trim_schema_prefix = EXCLUDED.trim_schema_prefix, \
             add_schema_prefix = EXCLUDED.add_schema_prefix",
            quote_literal(&self.name),
            quote_literal(&self.brokers),
            quote_literal(&self.topics.join(",")),
            quote_literal(&self.consumer_group),
            quote_literal(&self.schema_pass_filter.join("\n")),
            quote_literal(&self.schema_stop_filter.join("\n")),
            render_literal(self.trim_schema_prefix.as_deref()),
            render_literal(self.add_schema_prefix.as_deref()),
        )
    }
}

fn split(value: Option<&str>, sep: char) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Runtime parameters ─────────────────────────────────────────────

/// Longest varchar column that keeps a lookup index.
pub const MAX_INDEX_VARCHAR_SIZE: &str = "max_index_varchar_size";

/// Quiet period after which a snapshot is considered complete.
pub const SNAPSHOT_QUIET_HOURS: &str = "snapshot_quiet_hours";

/// Enables the JSON flattening rewrite pass.
pub const JSON_FLATTEN: &str = "json_flatten";

/// Known parameters with their defaults.
pub const PARAMETERS: [(&str, &str); 3] = [
    (MAX_INDEX_VARCHAR_SIZE, "1000"),
    (SNAPSHOT_QUIET_HOURS, "2"),
    (JSON_FLATTEN, "true"),
];

/// Default value of `parameter`, `None` if unknown.
#[must_use]
pub fn default_value(parameter: &str) -> Option<&'static str> {
    PARAMETERS
        .iter()
        .find(|(p, _)| *p == parameter)
        .map(|(_, v)| *v)
}

/// Returns `true` if `value` is acceptable for `parameter`.
#[must_use]
pub fn is_config_parameter_valid(parameter: &str, value: &str) -> bool {
    match parameter {
        MAX_INDEX_VARCHAR_SIZE => value.parse::<i64>().is_ok_and(|n| n > 0),
        SNAPSHOT_QUIET_HOURS => value
            .parse::<f64>()
            .is_ok_and(|h| h.is_finite() && h > 0.0),
        JSON_FLATTEN => matches!(value, "true" | "false"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_round_trip() {
        assert_eq!("resync".parse::<SyncMode>().unwrap(), SyncMode::Resync);
        assert_eq!("NoSync".parse::<SyncMode>().unwrap(), SyncMode::NoSync);
        assert!("paused".parse::<SyncMode>().is_err());
        assert_eq!(SyncMode::default(), SyncMode::NoSync);
    }

    #[test]
    fn test_parameter_validation() {
        assert!(is_config_parameter_valid(MAX_INDEX_VARCHAR_SIZE, "500"));
        assert!(!is_config_parameter_valid(MAX_INDEX_VARCHAR_SIZE, "0"));
        assert!(!is_config_parameter_valid(MAX_INDEX_VARCHAR_SIZE, "abc"));
        assert!(is_config_parameter_valid(SNAPSHOT_QUIET_HOURS, "0.5"));
        assert!(!is_config_parameter_valid(SNAPSHOT_QUIET_HOURS, "-1"));
        assert!(is_config_parameter_valid(JSON_FLATTEN, "false"));
        assert!(!is_config_parameter_valid(JSON_FLATTEN, "yes"));
        assert!(!is_config_parameter_valid("unknown", "1"));
        assert_eq!(default_value(JSON_FLATTEN), Some("true"));
        assert_eq!(default_value("unknown"), None);
    }

    #[test]
    fn test_source_row() {
        let row = Row::new(vec![
            Some("pg1".into()),
            Some("localhost:9092".into()),
            Some("cdc.orders, cdc.customers".into()),
            Some("tidemark".into()),
            Some("^sales".into()),
            Some(String::new()),
            None,
            Some("raw_".into()),
        ]);
        let entry = SourceEntry::from_row(&row).unwrap();
        assert_eq!(entry.topics, vec!["cdc.orders", "cdc.customers"]);
        assert_eq!(entry.schema_pass_filter, vec!["^sales"]);
        assert!(entry.schema_stop_filter.is_empty());
        assert_eq!(entry.trim_schema_prefix, None);
        assert_eq!(entry.add_schema_prefix.as_deref(), Some("raw_"));

        let connector = entry.connector_config();
        assert_eq!(connector.get("topics"), Some("cdc.orders,cdc.customers"));
        assert_eq!(entry.decoder_config(&["eu".into()]).origins, vec!["eu"]);
    }
}
