//! Minimal relational store capability.
//!
//! The pipeline only needs to run a query, run a statement and group
//! statements in a transaction. Every statement is plain SQL text with
//! pre-rendered literals, and every result value comes back in text form.

mod postgres;

pub use postgres::{PgStore, PgStoreConfig};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// One result row in text form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<String>>,
}

impl Row {
    /// Creates a row from text values.
    #[must_use]
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// Builds a row of non-null values; convenient for test fixtures.
    #[must_use]
    pub fn of<S: AsRef<str>>(values: &[S]) -> Self {
        Self::new(
            values
                .iter()
                .map(|v| Some(v.as_ref().to_string()))
                .collect(),
        )
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Text value at `idx`; `None` for `NULL` or a missing index.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    /// Non-null text value at `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the value is `NULL` or missing.
    pub fn text(&self, idx: usize) -> Result<&str> {
        self.get(idx)
            .ok_or_else(|| Error::store(format!("unexpected NULL in result column {idx}")))
    }

    /// Integer value at `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the value is not an integer.
    pub fn int(&self, idx: usize) -> Result<Option<i64>> {
        self.get(idx)
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|e| Error::store(format!("column {idx}: '{v}' is not an integer: {e}")))
            })
            .transpose()
    }

    /// Boolean value at `idx`, accepting `PostgreSQL`'s `t`/`f`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the value is not a boolean.
    pub fn bool(&self, idx: usize) -> Result<Option<bool>> {
        self.get(idx)
            .map(|v| match v {
                "t" | "true" => Ok(true),
                "f" | "false" => Ok(false),
                other => Err(Error::store(format!(
                    "column {idx}: '{other}' is not a boolean"
                ))),
            })
            .transpose()
    }
}

/// Statements grouped in one transaction.
///
/// Dropping a transaction without calling [`commit`](Transaction::commit)
/// or [`rollback`](Transaction::rollback) abandons it; nothing is committed.
#[async_trait]
pub trait Transaction: Send {
    /// Runs a query inside the transaction.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Runs a statement inside the transaction, returning affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rolls back the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Relational store used by the catalog and the executor.
#[async_trait]
pub trait Store: Send + Sync {
    /// Runs a query outside any transaction.
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Runs a statement outside any transaction, returning affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
