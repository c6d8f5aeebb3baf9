//! `PostgreSQL` store over a `deadpool-postgres` connection pool.
//!
//! All statements go through the simple query protocol: literals are
//! already rendered, and text results are all the pipeline consumes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::SimpleQueryMessage;
use tracing::{debug, warn};

use super::{Row, Store, Transaction};
use crate::error::{Error, Result};

/// Connection settings for [`PgStore`].
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    /// Connection string, key-value or URI form.
    pub connection_string: String,

    /// Maximum connections in the pool (default: 8).
    ///
    /// Each consumer task holds at most one connection at a time, plus
    /// one for catalog DDL.
    pub max_pool_size: usize,

    /// Per-statement timeout (default: 5 minutes).
    pub statement_timeout: Duration,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            max_pool_size: 8,
            statement_timeout: Duration::from_secs(300),
        }
    }
}

/// Pooled `PostgreSQL` implementation of [`Store`].
pub struct PgStore {
    pool: deadpool_postgres::Pool,
    statement_timeout: Duration,
    statements: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
}

impl PgStore {
    /// Creates the pool. Connectivity is checked on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the connection string is invalid, or
    /// [`Error::Store`] if the pool cannot be built.
    pub fn new(config: &PgStoreConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .connection_string
            .parse()
            .map_err(|e| Error::Config(format!("invalid connection string: {e}")))?;

        let mgr_config = deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        };
        let mgr =
            deadpool_postgres::Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);

        let pool = deadpool_postgres::Pool::builder(mgr)
            .max_size(config.max_pool_size)
            .build()
            .map_err(|e| Error::store(format!("pool creation failed: {e}")))?;

        Ok(Self {
            pool,
            statement_timeout: config.statement_timeout,
            statements: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Total statements sent.
    #[must_use]
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// Total statements that failed.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    async fn connection(&self) -> Result<deadpool_postgres::Object> {
        Ok(self.pool.get().await?)
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("statement_timeout", &self.statement_timeout)
            .field("statements", &self.statement_count())
            .finish_non_exhaustive()
    }
}

/// Runs `sql` and splits the response into rows and the affected-row count.
async fn simple(
    client: &tokio_postgres::Client,
    sql: &str,
    timeout: Duration,
    counters: (&AtomicU64, &AtomicU64),
) -> Result<(Vec<Row>, u64)> {
    counters.0.fetch_add(1, Ordering::Relaxed);
    debug!(sql, "store statement");
    let messages = tokio::time::timeout(timeout, client.simple_query(sql))
        .await
        .map_err(|_| {
            counters.1.fetch_add(1, Ordering::Relaxed);
            Error::store(format!("statement timed out after {timeout:?}"))
        })?
        .map_err(|e| {
            counters.1.fetch_add(1, Ordering::Relaxed);
            Error::from(e)
        })?;

    let mut rows = Vec::new();
    let mut affected = 0;
    for msg in messages {
        match msg {
            SimpleQueryMessage::Row(row) => {
                let values = (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect();
                rows.push(Row::new(values));
            }
            SimpleQueryMessage::CommandComplete(n) => affected += n,
            _ => {}
        }
    }
    Ok((rows, affected))
}

#[async_trait]
impl Store for PgStore {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let client = self.connection().await?;
        let (rows, _) = simple(
            &client,
            sql,
            self.statement_timeout,
            (&self.statements, &self.errors),
        )
        .await?;
        Ok(rows)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let client = self.connection().await?;
        let (_, n) = simple(
            &client,
            sql,
            self.statement_timeout,
            (&self.statements, &self.errors),
        )
        .await?;
        Ok(n)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let client = self.connection().await?;
        simple(
            &client,
            "BEGIN",
            self.statement_timeout,
            (&self.statements, &self.errors),
        )
        .await?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
            statement_timeout: self.statement_timeout,
            statements: Arc::clone(&self.statements),
            errors: Arc::clone(&self.errors),
        }))
    }
}

/// Transaction pinned to one pooled connection.
struct PgTransaction {
    client: Option<deadpool_postgres::Object>,
    statement_timeout: Duration,
    statements: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
}

impl PgTransaction {
    async fn run(&mut self, sql: &str) -> Result<(Vec<Row>, u64)> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::store("transaction already finished"))?;
        simple(
            client,
            sql,
            self.statement_timeout,
            (&self.statements, &self.errors),
        )
        .await
    }

    async fn finish(mut self: Box<Self>, sql: &str) -> Result<()> {
        let result = self.run(sql).await.map(|_| ());
        match &result {
            Ok(()) => {
                self.client.take();
            }
            Err(e) => {
                // Connection state is unknown; keep it out of the pool.
                warn!(error = %e, statement = sql, "transaction end failed, discarding connection");
                if let Some(obj) = self.client.take() {
                    drop(deadpool_postgres::Object::take(obj));
                }
            }
        }
        result
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.run(sql).await?.0)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        Ok(self.run(sql).await?.1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        // An open transaction must not return to the pool; closing the
        // connection makes the server abort it.
        if let Some(obj) = self.client.take() {
            drop(deadpool_postgres::Object::take(obj));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PgStoreConfig::default();
        assert_eq!(config.max_pool_size, 8);
        assert_eq!(config.statement_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_connection_string() {
        let config = PgStoreConfig {
            connection_string: "host=localhost port=notaport".into(),
            ..PgStoreConfig::default()
        };
        assert!(matches!(PgStore::new(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_pool_builds_without_connecting() {
        let config = PgStoreConfig {
            connection_string: "host=localhost user=tidemark dbname=tidemark".into(),
            ..PgStoreConfig::default()
        };
        let store = PgStore::new(&config).unwrap();
        assert_eq!(store.statement_count(), 0);
        assert_eq!(store.error_count(), 0);
    }
}
