//! Key/value connector configuration.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ConnectorError;

/// String properties describing one connector instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorConfig {
    connector_type: String,
    properties: HashMap<String, String>,
}

impl ConnectorConfig {
    /// Creates an empty config for `connector_type`.
    #[must_use]
    pub fn new(connector_type: impl Into<String>) -> Self {
        Self {
            connector_type: connector_type.into(),
            properties: HashMap::new(),
        }
    }

    /// Connector type name, e.g. `"kafka"`.
    #[must_use]
    pub fn connector_type(&self) -> &str {
        &self.connector_type
    }

    /// Sets a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Returns a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns a property that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::MissingConfig`] if the key is absent.
    pub fn require(&self, key: &str) -> Result<&str, ConnectorError> {
        self.get(key)
            .ok_or_else(|| ConnectorError::MissingConfig(key.to_string()))
    }

    /// Parses an optional property.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::ConfigurationError`] if the value does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConnectorError> {
        self.get(key)
            .map(|v| {
                v.parse::<T>().map_err(|_| {
                    ConnectorError::ConfigurationError(format!("invalid {key}: '{v}'"))
                })
            })
            .transpose()
    }

    /// Properties whose key starts with `prefix`, with the prefix removed.
    #[must_use]
    pub fn properties_with_prefix(&self, prefix: &str) -> HashMap<String, String> {
        self.properties
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|s| (s.to_string(), v.clone())))
            .collect()
    }

    /// Splits a comma-separated property into trimmed, non-empty items.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_and_get() {
        let mut config = ConnectorConfig::new("kafka");
        config.set("topics", "a, b,,c");
        assert_eq!(config.connector_type(), "kafka");
        assert_eq!(config.require("topics").unwrap(), "a, b,,c");
        assert!(matches!(
            config.require("brokers"),
            Err(ConnectorError::MissingConfig(ref k)) if k == "brokers"
        ));
        assert_eq!(config.get_list("topics"), vec!["a", "b", "c"]);
        assert!(config.get_list("missing").is_empty());
    }

    #[test]
    fn test_get_parsed() {
        let mut config = ConnectorConfig::new("kafka");
        config.set("max.poll.records", "500");
        config.set("bad", "x");
        assert_eq!(config.get_parsed::<usize>("max.poll.records").unwrap(), Some(500));
        assert_eq!(config.get_parsed::<usize>("absent").unwrap(), None);
        assert!(config.get_parsed::<usize>("bad").is_err());
    }

    #[test]
    fn test_prefix_passthrough() {
        let mut config = ConnectorConfig::new("kafka");
        config.set("kafka.session.timeout.ms", "45000");
        config.set("topics", "t");
        let props = config.properties_with_prefix("kafka.");
        assert_eq!(props.len(), 1);
        assert_eq!(props["session.timeout.ms"], "45000");
    }
}
