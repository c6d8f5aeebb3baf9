//! Test doubles for the store capability.
//!
//! [`RecordingStore`] keeps every statement it receives, answers queries
//! from scripted responses and can be told to fail on chosen statements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::store::{Row, Store, Transaction};

type Responder = Box<dyn Fn(&str) -> Option<Vec<Row>> + Send + Sync>;

struct Failure {
    needle: String,
    left: usize,
    make: fn(String) -> Error,
}

#[derive(Default)]
struct Inner {
    log: Vec<String>,
    committed: Vec<String>,
    responders: Vec<Responder>,
    failures: Vec<Failure>,
}

/// In-memory [`Store`] that records SQL instead of running it.
///
/// Statements containing `RETURNING` get a fresh sequential id unless a
/// responder answers them first. Every other query returns no rows.
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl RecordingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers queries containing `needle` with `rows`.
    ///
    /// Responders are consulted newest first.
    pub fn respond(&self, needle: &str, rows: Vec<Row>) {
        let needle = needle.to_string();
        self.respond_with(move |sql| sql.contains(&needle).then(|| rows.clone()));
    }

    /// Installs a responder closure; returning `None` falls through.
    pub fn respond_with<F>(&self, f: F)
    where
        F: Fn(&str) -> Option<Vec<Row>> + Send + Sync + 'static,
    {
        self.inner.lock().responders.insert(0, Box::new(f));
    }

    /// Fails the next `times` statements containing `needle` with a store
    /// error.
    pub fn fail_on(&self, needle: &str, times: usize) {
        self.fail_with(needle, times, |message| Error::Store {
            code: "XX000".to_string(),
            message,
        });
    }

    /// Fails the next `times` statements containing `needle` with the error
    /// `make` builds from a description of the injected failure.
    pub fn fail_with(&self, needle: &str, times: usize, make: fn(String) -> Error) {
        self.inner.lock().failures.push(Failure {
            needle: needle.to_string(),
            left: times,
            make,
        });
    }

    /// Every statement received, including `BEGIN`/`COMMIT`/`ROLLBACK`.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.inner.lock().log.clone()
    }

    /// Statements that took effect: autocommit statements and statements
    /// of committed transactions.
    #[must_use]
    pub fn committed(&self) -> Vec<String> {
        self.inner.lock().committed.clone()
    }

    /// Committed statements containing `needle`.
    #[must_use]
    pub fn committed_matching(&self, needle: &str) -> Vec<String> {
        self.committed()
            .into_iter()
            .filter(|s| s.contains(needle))
            .collect()
    }

    /// Forgets recorded statements; responders stay installed.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.log.clear();
        inner.committed.clear();
    }

    fn run(&self, sql: &str) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock();
        inner.log.push(sql.to_string());
        if let Some(slot) = inner
            .failures
            .iter_mut()
            .find(|f| f.left > 0 && sql.contains(f.needle.as_str()))
        {
            slot.left -= 1;
            return Err((slot.make)(format!("injected failure on '{}'", slot.needle)));
        }
        if let Some(rows) = inner.responders.iter().find_map(|r| r(sql)) {
            return Ok(rows);
        }
        if sql.contains("RETURNING") {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            return Ok(vec![Row::of(&[id.to_string()])]);
        }
        Ok(Vec::new())
    }

    fn commit_all(&self, statements: Vec<String>) {
        self.inner.lock().committed.extend(statements);
    }
}

impl std::fmt::Debug for RecordingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingStore")
            .field("statements", &self.inner.lock().log.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let rows = self.run(sql)?;
        self.commit_all(vec![sql.to_string()]);
        Ok(rows)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.run(sql)?;
        self.commit_all(vec![sql.to_string()]);
        Ok(1)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.run("BEGIN")?;
        Ok(Box::new(RecordingTransaction {
            store: self.clone(),
            pending: Vec::new(),
        }))
    }
}

struct RecordingTransaction {
    store: RecordingStore,
    pending: Vec<String>,
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let rows = self.store.run(sql)?;
        self.pending.push(sql.to_string());
        Ok(rows)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.store.run(sql)?;
        self.pending.push(sql.to_string());
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.store.run("COMMIT")?;
        let RecordingTransaction { store, pending } = *self;
        store.commit_all(pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.store.run("ROLLBACK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_commits() {
        let store = RecordingStore::new();
        store.execute("CREATE SCHEMA a").await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.execute("INSERT INTO a.t VALUES (1)").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            store.statements(),
            vec![
                "CREATE SCHEMA a",
                "BEGIN",
                "INSERT INTO a.t VALUES (1)",
                "COMMIT"
            ]
        );
        assert_eq!(store.committed_matching("INSERT").len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let store = RecordingStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.execute("INSERT INTO a.t VALUES (1)").await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.committed_matching("INSERT").is_empty());
        assert!(store.statements().contains(&"ROLLBACK".to_string()));
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let store = RecordingStore::new();
        store.fail_on("INSERT", 1);
        assert!(store.execute("INSERT 1").await.is_err());
        assert!(store.execute("INSERT 2").await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_failure_kind() {
        let store = RecordingStore::new();
        store.fail_with("INSERT", 1, Error::FatalInvariantViolation);
        let err = store.execute("INSERT 1").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("injected failure on 'INSERT'"));
    }

    #[tokio::test]
    async fn test_responders_and_returning() {
        let store = RecordingStore::new();
        store.respond("FROM x", vec![Row::of(&["7"])]);
        let rows = store.query("SELECT a FROM x").await.unwrap();
        assert_eq!(rows[0].int(0).unwrap(), Some(7));

        let first = store.query("INSERT ... RETURNING id").await.unwrap();
        let second = store.query("INSERT ... RETURNING id").await.unwrap();
        assert_eq!(first[0].int(0).unwrap(), Some(1));
        assert_eq!(second[0].int(0).unwrap(), Some(2));
    }
}
