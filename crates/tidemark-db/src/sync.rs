//! Resynchronization windows.
//!
//! `sync` clears the carry-forward flag on every current row of a source;
//! while the source is re-read every row that is observed again gets the
//! flag back. `end_sync` closes whatever was not re-observed.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use tidemark_connectors::RestartSignal;
use tidemark_core::sql::quote_literal;
use tidemark_core::{Error, Result, TableId, Transaction};

use crate::catalog::{Catalog, SyncMode};
use crate::exec::timestamp_literal;

/// Outcome of [`SyncControl::end_sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndSyncReport {
    /// Tables swept.
    pub tables: usize,
    /// Current rows removed because they were not re-observed.
    pub rows_closed: u64,
}

/// Starts and ends resync windows for sources.
#[derive(Debug, Clone)]
pub struct SyncControl {
    catalog: Arc<Catalog>,
    restart: Arc<RestartSignal>,
}

impl SyncControl {
    /// Creates a controller that restarts the pipeline through `restart`.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, restart: Arc<RestartSignal>) -> Self {
        Self { catalog, restart }
    }

    /// Opens a resync window for `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] for unknown sources,
    /// [`Error::TransactionFailure`] if clearing the flags failed, or
    /// [`Error::Store`] if the mode could not be persisted.
    pub async fn sync(&self, source: &str) -> Result<()> {
        if self.catalog.source(source).is_none() {
            return Err(Error::Catalog(format!("source '{source}' is not registered")));
        }
        self.catalog.set_sync_mode(source, SyncMode::Resync).await?;

        let tables = self.catalog.tables_of_source(source);
        for table in &tables {
            let statements = [
                format!(
                    "UPDATE {} SET __cf = FALSE WHERE __source = {}",
                    table.current_sql(),
                    quote_literal(source)
                ),
                format!(
                    "UPDATE {} SET __cf = FALSE WHERE __current AND __source = {}",
                    table.history_sql(),
                    quote_literal(source)
                ),
            ];
            self.run(table, &statements).await?;
        }
        info!(source, tables = tables.len(), "resync started");
        self.restart.request();
        Ok(())
    }

    /// Closes the resync window of `source`.
    ///
    /// Every row still unconfirmed is closed at the current time and
    /// removed from the current relation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] if `source` is not resyncing,
    /// [`Error::TransactionFailure`] if a sweep failed, or
    /// [`Error::Store`] if the mode could not be persisted.
    pub async fn end_sync(&self, source: &str) -> Result<EndSyncReport> {
        if self.catalog.sync_mode(source) != SyncMode::Resync {
            return Err(Error::Catalog(format!("source '{source}' is not resyncing")));
        }
        let now = timestamp_literal(Utc::now());
        let tables = self.catalog.tables_of_source(source);
        let mut report = EndSyncReport {
            tables: tables.len(),
            ..EndSyncReport::default()
        };
        for table in &tables {
            let statements = [
                format!(
                    "UPDATE {} AS h SET __end = GREATEST(h.__start, {now}), __current = FALSE \
                     FROM {} AS c WHERE c.__id = h.__id AND h.__current AND NOT c.__cf \
                     AND c.__source = {}",
                    table.history_sql(),
                    table.current_sql(),
                    quote_literal(source)
                ),
                format!(
                    "DELETE FROM {} WHERE NOT __cf AND __source = {}",
                    table.current_sql(),
                    quote_literal(source)
                ),
            ];
            report.rows_closed += self.run(table, &statements).await?;
        }

        self.catalog.set_sync_mode(source, SyncMode::NoSync).await?;
        self.catalog.request_maintenance();
        self.restart.request();
        info!(source, tables = report.tables, rows_closed = report.rows_closed, "resync ended");
        Ok(report)
    }

    /// Runs `statements` in one transaction; returns rows affected by the
    /// last one.
    async fn run(&self, table: &TableId, statements: &[String]) -> Result<u64> {
        let mut tx = self.catalog.store().begin().await?;
        let mut affected = 0;
        for sql in statements {
            match tx.execute(sql).await {
                Ok(n) => affected = n,
                Err(e) => {
                    rollback(tx).await;
                    return Err(Error::TransactionFailure(format!("{table}: {e}")));
                }
            }
        }
        tx.commit()
            .await
            .map_err(|e| Error::TransactionFailure(format!("{table}: {e}")))?;
        Ok(affected)
    }
}

async fn rollback(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "rollback failed");
    }
}
