//! Bitemporal execution of command lists.
//!
//! ```text
//!   CommandList ──► partition_runs ──► per run:
//!                                        ensure table (+ parent)
//!                                        schema delta via Catalog
//!                                        history partitions
//!                                        BEGIN
//!                                          Merge / Delete / Truncate
//!                                        COMMIT (or ROLLBACK)
//! ```
//!
//! Schema changes run before the data transaction and are never rolled
//! back with it; every schema change is a widening, so a retried run finds
//! its columns already in place.

mod runs;
pub mod statements;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Datelike;
use tracing::{debug, warn};

use tidemark_core::types::PG_VARCHAR_LIMIT;
use tidemark_core::{
    compute_delta, incoming_columns, ColumnType, Command, DataType, Error, IncomingColumn, Op,
    Result, TableId, Transaction,
};

use crate::catalog::Catalog;

pub use runs::{partition_runs, Run};
pub use statements::{timestamp_literal, RowScope};

/// Delta passes before a run gives up and is retried.
const MAX_SCHEMA_PASSES: usize = 4;

/// Counters for one [`Executor::execute`] call.
///
/// Only committed runs are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Runs committed.
    pub runs: u64,
    /// New versions written.
    pub versions: u64,
    /// Merges identical to the current row.
    pub unchanged: u64,
    /// Identical merges that re-confirmed a row during a resync.
    pub confirmed: u64,
    /// Tables touched by deletes and truncates.
    pub closed: u64,
    /// Commands skipped because they could not address a row.
    pub skipped: u64,
}

impl ExecStats {
    fn absorb(&mut self, other: &ExecStats) {
        self.runs += other.runs;
        self.versions += other.versions;
        self.unchanged += other.unchanged;
        self.confirmed += other.confirmed;
        self.closed += other.closed;
        self.skipped += other.skipped;
    }
}

/// Applies command lists to the store.
#[derive(Debug, Clone)]
pub struct Executor {
    catalog: Arc<Catalog>,
}

impl Executor {
    /// Creates an executor writing through `catalog`'s store.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Executes `commands` run by run.
    ///
    /// Runs before a failing one stay committed; callers redeliver the
    /// whole list, which is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionFailure`] if a run was rolled back,
    /// [`Error::FatalInvariantViolation`] or [`Error::SchemaConflict`] for
    /// unrecoverable states, or the catalog's error if schema preparation
    /// failed.
    pub async fn execute(&self, commands: &[Command]) -> Result<ExecStats> {
        let mut stats = ExecStats::default();
        for run in partition_runs(commands) {
            self.prepare_run(&run).await?;
            let run_stats = self.write_run(&run).await?;
            stats.absorb(&run_stats);
        }
        Ok(stats)
    }

    async fn prepare_run(&self, run: &Run<'_>) -> Result<()> {
        let Some(table) = run.merge_table else {
            return Ok(());
        };
        let Some(first) = run.merges().next() else {
            return Ok(());
        };
        self.ensure_table(table, &first.source, first.parent.as_ref())
            .await?;

        let merges: Vec<&Command> = run.merges().collect();
        let incoming = incoming_columns(merges.iter().copied());
        self.settle_schema(table, &merges, &incoming).await?;

        let years: BTreeSet<i32> = merges.iter().map(|c| c.source_timestamp.year()).collect();
        for year in years {
            self.catalog.add_part_year_if_not_exists(table, year).await?;
        }
        Ok(())
    }

    /// Applies the delta until the catalog holds every incoming value.
    ///
    /// Another consumer may change the same column between planning and
    /// applying, so each pass is planned against the catalog as it is now.
    async fn settle_schema(
        &self,
        table: &TableId,
        merges: &[&Command],
        incoming: &[IncomingColumn],
    ) -> Result<()> {
        for pass in 0..MAX_SCHEMA_PASSES {
            let delta = compute_delta(table, incoming, |name| self.catalog.column(table, name))?;
            if delta.is_empty() {
                return Ok(());
            }
            if pass > 0 {
                debug!(%table, pass, changes = delta.len(), "schema moved concurrently, replanning");
            }
            for change in &delta {
                if change.is_new_column {
                    let is_key = merges
                        .iter()
                        .any(|c| c.column(&change.name).is_some_and(|col| col.primary_key > 0));
                    self.catalog
                        .add_column(table, &change.name, change.new_column_type(), is_key)
                        .await?;
                } else {
                    self.catalog
                        .update_column(table, &change.name, change.new_column_type())
                        .await?;
                }
            }
        }
        Err(Error::TransactionFailure(format!(
            "schema of {table} did not settle after {MAX_SCHEMA_PASSES} passes"
        )))
    }

    async fn ensure_table(
        &self,
        table: &TableId,
        source: &str,
        parent: Option<&TableId>,
    ) -> Result<()> {
        if self.catalog.table_exists(table) {
            return Ok(());
        }
        if let Some(parent) = parent {
            if !self.catalog.table_exists(parent) {
                self.catalog.add_table_entry(parent, source, None).await?;
            }
        }
        self.catalog.add_table_entry(table, source, parent).await
    }

    async fn write_run(&self, run: &Run<'_>) -> Result<ExecStats> {
        let mut stats = ExecStats::default();
        let mut tx = self.catalog.store().begin().await?;
        let written = self.write_commands(tx.as_mut(), run, &mut stats).await;
        match written {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| Error::TransactionFailure(format!("commit failed: {e}")))?;
                stats.runs = 1;
                debug!(commands = run.commands.len(), versions = stats.versions, "run committed");
                Ok(stats)
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                if err.is_fatal() {
                    Err(err)
                } else {
                    Err(Error::TransactionFailure(err.to_string()))
                }
            }
        }
    }

    async fn write_commands(
        &self,
        tx: &mut dyn Transaction,
        run: &Run<'_>,
        stats: &mut ExecStats,
    ) -> Result<()> {
        for cmd in run.commands {
            match cmd.op {
                Op::Merge => self.write_merge(tx, cmd, stats).await?,
                Op::Delete => {
                    let key = cmd.primary_key();
                    if key.is_empty() {
                        warn!(table = %cmd.table, "delete without key columns skipped");
                        stats.skipped += 1;
                        continue;
                    }
                    let scope = RowScope::Keyed {
                        origin: &cmd.origin,
                        key: &key,
                    };
                    self.close_rows(tx, cmd, scope, stats).await?;
                }
                Op::Truncate => self.close_rows(tx, cmd, RowScope::All, stats).await?,
            }
        }
        Ok(())
    }

    async fn write_merge(
        &self,
        tx: &mut dyn Transaction,
        cmd: &Command,
        stats: &mut ExecStats,
    ) -> Result<()> {
        if cmd.primary_key().is_empty() {
            warn!(table = %cmd.table, "merge without key columns skipped");
            stats.skipped += 1;
            return Ok(());
        }
        let tracked = self.catalog.columns(&cmd.table);
        check_varchar_sizes(cmd, &tracked)?;

        let ts = timestamp_literal(cmd.source_timestamp);
        let rows = tx
            .query(&statements::select_current(cmd, &tracked, &ts))
            .await?;
        let Some(row) = rows.first() else {
            insert_version(tx, cmd, &ts).await?;
            stats.versions += 1;
            return Ok(());
        };

        let id = row
            .int(0)?
            .ok_or_else(|| Error::store("current row without __id"))?;
        let start = tidemark_core::sql::quote_literal(row.text(1)?);
        let cf = row.bool(2)?.unwrap_or(false);
        let identical = row.bool(3)?.unwrap_or(false);

        if identical {
            if cf {
                stats.unchanged += 1;
            } else {
                tx.execute(&statements::confirm_current(&cmd.table, id)).await?;
                tx.execute(&statements::confirm_history(&cmd.table, id)).await?;
                stats.confirmed += 1;
            }
            return Ok(());
        }

        tx.execute(&statements::close_version(&cmd.table, id, &start))
            .await?;
        tx.execute(&statements::delete_current(&cmd.table, id))
            .await?;
        insert_version(tx, cmd, &start).await?;
        stats.versions += 1;
        Ok(())
    }

    /// Closes matching rows of `cmd.table` and of every table derived from
    /// it that carries the key columns.
    async fn close_rows(
        &self,
        tx: &mut dyn Transaction,
        cmd: &Command,
        scope: RowScope<'_>,
        stats: &mut ExecStats,
    ) -> Result<()> {
        let ts = timestamp_literal(cmd.source_timestamp);
        let mut targets = vec![cmd.table.clone()];
        targets.extend(self.catalog.descendant_tables(&cmd.table));

        for table in targets {
            if !self.catalog.table_exists(&table) {
                continue;
            }
            let carries_key = match scope {
                RowScope::Keyed { key, .. } => key
                    .iter()
                    .all(|c| self.catalog.column(&table, &c.name).is_some()),
                RowScope::All => true,
            };
            if !carries_key {
                debug!(%table, "table lacks key columns, not closed");
                continue;
            }
            tx.execute(&statements::close_matching(&table, scope, &ts))
                .await?;
            tx.execute(&statements::delete_matching(&table, scope))
                .await?;
            stats.closed += 1;
        }
        Ok(())
    }
}

async fn insert_version(tx: &mut dyn Transaction, cmd: &Command, start: &str) -> Result<()> {
    let rows = tx.query(&statements::insert_history(cmd, start)).await?;
    let id = rows
        .first()
        .map(|r| r.int(0))
        .transpose()?
        .flatten()
        .ok_or_else(|| Error::store(format!("insert into {} returned no __id", cmd.table)))?;
    tx.execute(&statements::insert_current(cmd, id, start)).await?;
    Ok(())
}

/// Fails if a value would not fit its recorded column.
///
/// The schema delta sizes columns before any write, so a violation means
/// the catalog and the data disagree.
fn check_varchar_sizes(cmd: &Command, tracked: &[(String, ColumnType)]) -> Result<()> {
    for col in &cmd.columns {
        let Some(raw) = col.raw.as_deref() else {
            continue;
        };
        let Some((_, recorded)) = tracked.iter().find(|(name, _)| *name == col.name) else {
            return Err(Error::FatalInvariantViolation(format!(
                "column {}.{} is not tracked",
                cmd.table, col.name
            )));
        };
        if recorded.data_type != DataType::Varchar || recorded.size > PG_VARCHAR_LIMIT {
            continue;
        }
        let len = i64::try_from(raw.chars().count()).unwrap_or(i64::MAX);
        if len > recorded.size {
            return Err(Error::FatalInvariantViolation(format!(
                "value of length {len} exceeds {}.{} varchar({})",
                cmd.table, col.name, recorded.size
            )));
        }
    }
    Ok(())
}
