//! Process configuration for the `tidemark` binary.

use std::time::Duration;

use tidemark_core::store::PgStoreConfig;
use tidemark_core::{Error, Result};

use crate::pipeline::PipelineConfig;

/// Environment variable holding the `PostgreSQL` connection string.
pub const ENV_DATABASE_URL: &str = "TIDEMARK_DATABASE_URL";
/// Environment variable naming the source to consume.
pub const ENV_SOURCE: &str = "TIDEMARK_SOURCE";
/// Environment variable overriding the connection pool size.
pub const ENV_POOL_SIZE: &str = "TIDEMARK_POOL_SIZE";
/// Environment variable overriding the resync consumer count.
pub const ENV_RESYNC_CONSUMERS: &str = "TIDEMARK_RESYNC_CONSUMERS";
/// Environment variable overriding the statement timeout, in seconds.
pub const ENV_STATEMENT_TIMEOUT_SECS: &str = "TIDEMARK_STATEMENT_TIMEOUT_SECS";
/// Environment variable overriding the maximum messages per batch.
pub const ENV_MAX_POLL_RECORDS: &str = "TIDEMARK_MAX_POLL_RECORDS";

/// Configuration of one `tidemark` process.
#[derive(Debug, Clone, Default)]
pub struct DbConfig {
    /// Store connection settings.
    pub store: PgStoreConfig,
    /// Registered source this process consumes.
    pub source: String,
    /// Consumer pipeline settings.
    pub pipeline: PipelineConfig,
}

impl DbConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{key} is not set")))
        };
        let mut config = Self {
            store: PgStoreConfig {
                connection_string: required(ENV_DATABASE_URL)?,
                ..PgStoreConfig::default()
            },
            source: required(ENV_SOURCE)?,
            pipeline: PipelineConfig::default(),
        };

        if let Some(size) = parse::<usize>(&lookup, ENV_POOL_SIZE)? {
            config.store.max_pool_size = size.max(1);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_STATEMENT_TIMEOUT_SECS)? {
            config.store.statement_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse::<usize>(&lookup, ENV_RESYNC_CONSUMERS)? {
            config.pipeline.resync_consumers = n.max(1);
        }
        if let Some(n) = parse::<usize>(&lookup, ENV_MAX_POLL_RECORDS)? {
            config.pipeline.max_poll_records = n.max(1);
        }
        // Each consumer holds one connection; the catalog needs one more.
        config.store.max_pool_size = config
            .store
            .max_pool_size
            .max(config.pipeline.resync_consumers + 1);
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("{key}: invalid value '{raw}'")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_required_variables() {
        let err = DbConfig::from_lookup(lookup(&[(ENV_SOURCE, "pg1")])).unwrap_err();
        assert!(err.to_string().contains(ENV_DATABASE_URL));

        let config = DbConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "host=db user=tidemark"),
            (ENV_SOURCE, "pg1"),
        ]))
        .unwrap();
        assert_eq!(config.source, "pg1");
        assert_eq!(config.store.connection_string, "host=db user=tidemark");
        assert_eq!(config.pipeline.resync_consumers, 4);
        assert_eq!(config.store.max_pool_size, 8);
    }

    #[test]
    fn test_overrides() {
        let config = DbConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://db/tidemark"),
            (ENV_SOURCE, "pg1"),
            (ENV_POOL_SIZE, "2"),
            (ENV_RESYNC_CONSUMERS, "6"),
            (ENV_STATEMENT_TIMEOUT_SECS, "30"),
        ]))
        .unwrap();
        assert_eq!(config.pipeline.resync_consumers, 6);
        assert_eq!(config.store.max_pool_size, 7);
        assert_eq!(config.store.statement_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_number() {
        let err = DbConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://db/tidemark"),
            (ENV_SOURCE, "pg1"),
            (ENV_POOL_SIZE, "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
