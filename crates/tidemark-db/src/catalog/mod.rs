//! Catalog of tracked tables, columns, indexes, partitions and settings.
//!
//! The catalog mirrors persisted metadata in memory. It is hydrated by one
//! scan at startup; afterwards every mutation runs its DDL or directory
//! statement first and updates the in-memory state only once the store
//! accepted it, all while holding the DDL lock. Reads take a short
//! `RwLock` read guard and never wait for DDL.
//!
//! Column, index and partition facts are read back from `PostgreSQL`'s own
//! catalogs on startup, so the DDL itself is the persisted record.

mod ddl;
mod directory;
mod forest;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tidemark_core::delta::{is_widening, resolve_widening};
use tidemark_core::store::Row;
use tidemark_core::types::is_reserved_column;
use tidemark_core::{ColumnType, DataType, Error, Result, Store, TableId};

pub use ddl::{index_name, is_indexable, normalize, CATALOG_SCHEMA, OPEN_END};
pub use directory::{
    default_value, is_config_parameter_valid, SourceEntry, SyncMode, JSON_FLATTEN,
    MAX_INDEX_VARCHAR_SIZE, PARAMETERS, SNAPSHOT_QUIET_HOURS,
};
pub use forest::{TableEntry, TableForest};

#[derive(Debug, Default)]
struct CatalogState {
    forest: TableForest,
    /// User columns per table, in creation order.
    columns: HashMap<TableId, Vec<(String, ColumnType)>>,
    /// `(schema, index name)`.
    indexes: HashSet<(String, String)>,
    part_years: HashMap<TableId, BTreeSet<i32>>,
    config: HashMap<String, String>,
    json_paths: HashMap<(TableId, String, String), String>,
    sources: BTreeMap<String, SourceEntry>,
    origins: BTreeSet<String>,
    sync_modes: HashMap<String, SyncMode>,
    last_snapshot: Option<Instant>,
}

/// In-process mirror of the persisted catalog.
pub struct Catalog {
    store: Arc<dyn Store>,
    /// Serializes every mutation.
    ddl: tokio::sync::Mutex<()>,
    state: RwLock<CatalogState>,
    maintenance: AtomicBool,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Catalog")
            .field("tables", &state.forest.len())
            .field("sources", &state.sources.len())
            .finish_non_exhaustive()
    }
}

/// Prefixes a store error message with what the catalog was doing.
fn context(err: Error, what: &str) -> Error {
    match err {
        Error::Store { code, message } => Error::Store {
            code,
            message: format!("{what}: {message}"),
        },
        other => other,
    }
}

impl Catalog {
    /// Creates the persisted catalog if needed and hydrates from it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if a bootstrap or hydration statement fails,
    /// or [`Error::Catalog`] if the persisted table directory is
    /// inconsistent.
    pub async fn open(store: Arc<dyn Store>) -> Result<Self> {
        for sql in ddl::bootstrap() {
            store
                .execute(&sql)
                .await
                .map_err(|e| context(e, "bootstrap catalog"))?;
        }
        let state = hydrate(store.as_ref()).await?;
        info!(
            tables = state.forest.len(),
            sources = state.sources.len(),
            partitions = state.part_years.values().map(BTreeSet::len).sum::<usize>(),
            "catalog hydrated"
        );
        Ok(Self {
            store,
            ddl: tokio::sync::Mutex::new(()),
            state: RwLock::new(state),
            maintenance: AtomicBool::new(false),
        })
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn run_ddl(&self, statements: &[String], what: &str) -> Result<()> {
        let mut tx = self.store.begin().await.map_err(|e| context(e, what))?;
        for sql in statements {
            if let Err(e) = tx.execute(sql).await {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback after failed DDL also failed");
                }
                return Err(context(e, what));
            }
        }
        tx.commit().await.map_err(|e| context(e, what))
    }

    // ── Tables ──────────────────────────────────────────────────────

    /// Returns `true` if `table` is tracked.
    #[must_use]
    pub fn table_exists(&self, table: &TableId) -> bool {
        self.state.read().forest.contains(table)
    }

    /// Entry of a tracked table.
    #[must_use]
    pub fn table_entry(&self, table: &TableId) -> Option<TableEntry> {
        self.state.read().forest.get(table).cloned()
    }

    /// Every tracked table.
    #[must_use]
    pub fn tables(&self) -> Vec<TableId> {
        self.state.read().forest.tables().cloned().collect()
    }

    /// Tracked tables created by `source`.
    #[must_use]
    pub fn tables_of_source(&self, source: &str) -> Vec<TableId> {
        let state = self.state.read();
        state
            .forest
            .tables()
            .filter(|t| state.forest.get(t).is_some_and(|e| e.source == source))
            .cloned()
            .collect()
    }

    /// Creates the schema, both relations and the directory row of `table`.
    ///
    /// A table that already exists is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] if `parent` is not tracked or the edge
    /// would create a cycle, or [`Error::Store`] if DDL fails.
    pub async fn add_table_entry(
        &self,
        table: &TableId,
        source: &str,
        parent: Option<&TableId>,
    ) -> Result<()> {
        let _ddl = self.ddl.lock().await;
        if self.table_exists(table) {
            return Ok(());
        }
        self.state.read().forest.validate(table, parent)?;

        let mut statements = ddl::create_table(table);
        statements.push(ddl::insert_base_table(table, source, parent));
        self.run_ddl(&statements, &format!("create table {table}"))
            .await?;

        let mut state = self.state.write();
        state.forest.insert(table.clone(), source, parent.cloned())?;
        state.columns.entry(table.clone()).or_default();
        state.indexes.insert((
            table.schema.clone(),
            index_name(&table.history_name(), "__id"),
        ));
        info!(%table, source, parent = ?parent.map(ToString::to_string), "table created");
        Ok(())
    }

    /// Every table derived from `table`, parents before children.
    #[must_use]
    pub fn descendant_tables(&self, table: &TableId) -> Vec<TableId> {
        self.state.read().forest.descendants(table)
    }

    // ── Columns ─────────────────────────────────────────────────────

    /// Recorded type of a user column.
    #[must_use]
    pub fn column(&self, table: &TableId, name: &str) -> Option<ColumnType> {
        self.state
            .read()
            .columns
            .get(table)
            .and_then(|cols| cols.iter().find(|(n, _)| n == name).map(|(_, t)| *t))
    }

    /// User columns of `table` in creation order.
    #[must_use]
    pub fn columns(&self, table: &TableId) -> Vec<(String, ColumnType)> {
        self.state
            .read()
            .columns
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Adds a user column to both relations, indexing it on the current
    /// relation when `index` is set and the type is indexable.
    ///
    /// If a concurrent caller already added the column, the call widens it
    /// to hold `ty` instead when needed. A varchar column is sized to the
    /// longest text form of `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] for untracked tables or reserved names,
    /// or [`Error::Store`] if DDL fails.
    pub async fn add_column(
        &self,
        table: &TableId,
        name: &str,
        ty: ColumnType,
        index: bool,
    ) -> Result<()> {
        let _ddl = self.ddl.lock().await;
        if !self.table_exists(table) {
            return Err(Error::Catalog(format!("table {table} is not tracked")));
        }
        if is_reserved_column(name) {
            return Err(Error::Catalog(format!(
                "column name '{name}' is reserved"
            )));
        }
        let ty = normalize(ty);
        if let Some(existing) = self.column(table, name) {
            if let Some(target) = resolve_widening(existing, ty, ty.text_width(), false) {
                self.update_column_locked(table, name, target).await?;
            }
            return Ok(());
        }

        let indexed = index && is_indexable(ty, self.max_index_varchar_size());
        let mut statements = ddl::add_column(table, name, ty);
        if indexed {
            statements.push(ddl::create_index(table, name));
        }
        self.run_ddl(&statements, &format!("add column {table}.{name}"))
            .await?;

        let mut state = self.state.write();
        state
            .columns
            .entry(table.clone())
            .or_default()
            .push((name.to_string(), ty));
        if indexed {
            state
                .indexes
                .insert((table.schema.clone(), index_name(&table.table, name)));
        }
        debug!(%table, column = name, %ty, indexed, "column added");
        Ok(())
    }

    /// Widens a user column on both relations, returning the applied type.
    ///
    /// Changing the type family casts existing values. A conversion into
    /// varchar is sized to the longest text already stored in the history
    /// relation when that exceeds `ty`. The lookup index is dropped when the
    /// new type is no longer indexable. A column that is already at least
    /// as wide as `ty` is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaConflict`] if `ty` would narrow the column,
    /// [`Error::Catalog`] for unknown columns, or [`Error::Store`] if DDL
    /// fails.
    pub async fn update_column(
        &self,
        table: &TableId,
        name: &str,
        ty: ColumnType,
    ) -> Result<ColumnType> {
        let _ddl = self.ddl.lock().await;
        self.update_column_locked(table, name, normalize(ty)).await
    }

    async fn update_column_locked(
        &self,
        table: &TableId,
        name: &str,
        ty: ColumnType,
    ) -> Result<ColumnType> {
        let current = self
            .column(table, name)
            .ok_or_else(|| Error::Catalog(format!("column {table}.{name} does not exist")))?;
        // A varchar column absorbs other types by their text form.
        let ty = if current.data_type == DataType::Varchar && ty.data_type != DataType::Varchar {
            normalize(ColumnType::varchar(current.size.max(ty.text_width())))
        } else {
            ty
        };
        if is_widening(ty, current) {
            return Ok(current);
        }
        if !is_widening(current, ty) {
            return Err(Error::SchemaConflict {
                table: table.to_string(),
                column: name.to_string(),
                message: format!("cannot change {current} to {ty}"),
            });
        }

        let cast = current.data_type != ty.data_type;
        let mut applied = ty;
        if cast && ty.data_type == DataType::Varchar {
            let rows = self
                .store
                .query(&ddl::max_text_length(table, name))
                .await
                .map_err(|e| context(e, &format!("measure {table}.{name}")))?;
            let observed = match rows.first() {
                Some(row) => row.int(0)?.unwrap_or(0),
                None => 0,
            };
            applied = normalize(ColumnType::varchar(observed.max(ty.size)));
        }

        let drop_index = self.index_exists(table, name)
            && !is_indexable(applied, self.max_index_varchar_size());
        let mut statements = Vec::new();
        if drop_index {
            statements.push(ddl::drop_index(table, name));
        }
        statements.extend(ddl::alter_column_type(table, name, applied, cast));
        self.run_ddl(&statements, &format!("alter column {table}.{name}"))
            .await?;

        let mut state = self.state.write();
        if let Some(slot) = state
            .columns
            .get_mut(table)
            .and_then(|cols| cols.iter_mut().find(|(n, _)| n == name))
        {
            slot.1 = applied;
        }
        if drop_index {
            state
                .indexes
                .remove(&(table.schema.clone(), index_name(&table.table, name)));
        }
        info!(%table, column = name, from = %current, to = %applied, drop_index, "column widened");
        Ok(applied)
    }

    /// Drops a user column from both relations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] for unknown columns or [`Error::Store`]
    /// if DDL fails.
    pub async fn delete_column(&self, table: &TableId, name: &str) -> Result<()> {
        let _ddl = self.ddl.lock().await;
        if self.column(table, name).is_none() {
            return Err(Error::Catalog(format!(
                "column {table}.{name} does not exist"
            )));
        }
        let had_index = self.index_exists(table, name);
        let mut statements = Vec::new();
        if had_index {
            statements.push(ddl::drop_index(table, name));
        }
        statements.extend(ddl::drop_column(table, name));
        self.run_ddl(&statements, &format!("drop column {table}.{name}"))
            .await?;

        let mut state = self.state.write();
        if let Some(cols) = state.columns.get_mut(table) {
            cols.retain(|(n, _)| n != name);
        }
        state
            .indexes
            .remove(&(table.schema.clone(), index_name(&table.table, name)));
        info!(%table, column = name, "column dropped");
        Ok(())
    }

    // ── Indexes ─────────────────────────────────────────────────────

    /// Returns `true` if the current relation has a lookup index on `column`.
    #[must_use]
    pub fn index_exists(&self, table: &TableId, column: &str) -> bool {
        self.state
            .read()
            .indexes
            .contains(&(table.schema.clone(), index_name(&table.table, column)))
    }

    /// Creates the lookup index on `column` unless it exists. Returns
    /// whether an index was created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] for unknown or unindexable columns, or
    /// [`Error::Store`] if DDL fails.
    pub async fn add_index_if_not_exists(&self, table: &TableId, column: &str) -> Result<bool> {
        let _ddl = self.ddl.lock().await;
        if self.index_exists(table, column) {
            return Ok(false);
        }
        let ty = self
            .column(table, column)
            .ok_or_else(|| Error::Catalog(format!("column {table}.{column} does not exist")))?;
        if !is_indexable(ty, self.max_index_varchar_size()) {
            return Err(Error::Catalog(format!(
                "column {table}.{column} of type {ty} cannot be indexed"
            )));
        }
        self.run_ddl(
            &[ddl::create_index(table, column)],
            &format!("index {table}.{column}"),
        )
        .await?;
        self.state
            .write()
            .indexes
            .insert((table.schema.clone(), index_name(&table.table, column)));
        Ok(true)
    }

    /// Drops the lookup index on `column` if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if DDL fails.
    pub async fn drop_index(&self, table: &TableId, column: &str) -> Result<()> {
        let _ddl = self.ddl.lock().await;
        if !self.index_exists(table, column) {
            return Ok(());
        }
        self.run_ddl(
            &[ddl::drop_index(table, column)],
            &format!("drop index {table}.{column}"),
        )
        .await?;
        self.state
            .write()
            .indexes
            .remove(&(table.schema.clone(), index_name(&table.table, column)));
        Ok(())
    }

    // ── Partitions ──────────────────────────────────────────────────

    /// Returns `true` if the history partition for `year` exists.
    #[must_use]
    pub fn part_year_exists(&self, table: &TableId, year: i32) -> bool {
        self.state
            .read()
            .part_years
            .get(table)
            .is_some_and(|years| years.contains(&year))
    }

    /// Creates the history partition for `year` unless it exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] for untracked tables or [`Error::Store`]
    /// if DDL fails.
    pub async fn add_part_year_if_not_exists(&self, table: &TableId, year: i32) -> Result<()> {
        if self.part_year_exists(table, year) {
            return Ok(());
        }
        let _ddl = self.ddl.lock().await;
        if self.part_year_exists(table, year) {
            return Ok(());
        }
        if !self.table_exists(table) {
            return Err(Error::Catalog(format!("table {table} is not tracked")));
        }
        self.run_ddl(
            &[ddl::create_partition(table, year)],
            &format!("partition {table} {year}"),
        )
        .await?;
        self.state
            .write()
            .part_years
            .entry(table.clone())
            .or_default()
            .insert(year);
        debug!(%table, year, "history partition created");
        Ok(())
    }

    // ── Configuration ───────────────────────────────────────────────

    /// Returns `true` if `value` is acceptable for `parameter`.
    #[must_use]
    pub fn is_config_parameter_valid(parameter: &str, value: &str) -> bool {
        is_config_parameter_valid(parameter, value)
    }

    /// Current value of `parameter`, falling back to its default.
    #[must_use]
    pub fn get_config(&self, parameter: &str) -> Option<String> {
        self.state
            .read()
            .config
            .get(parameter)
            .cloned()
            .or_else(|| default_value(parameter).map(str::to_string))
    }

    /// Persists a runtime parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown parameters or invalid values,
    /// or [`Error::Store`] if the update fails.
    pub async fn set_config(&self, parameter: &str, value: &str) -> Result<()> {
        if !is_config_parameter_valid(parameter, value) {
            return Err(Error::Config(format!(
                "invalid value '{value}' for parameter '{parameter}'"
            )));
        }
        let _ddl = self.ddl.lock().await;
        self.store
            .execute(&ddl::upsert_config(parameter, value))
            .await
            .map_err(|e| context(e, &format!("set {parameter}")))?;
        self.state
            .write()
            .config
            .insert(parameter.to_string(), value.to_string());
        info!(parameter, value, "configuration updated");
        Ok(())
    }

    /// Longest varchar column that keeps a lookup index.
    #[must_use]
    pub fn max_index_varchar_size(&self) -> i64 {
        self.get_config(MAX_INDEX_VARCHAR_SIZE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000)
    }

    /// Quiet period, in hours, that marks a snapshot complete.
    #[must_use]
    pub fn snapshot_quiet_hours(&self) -> f64 {
        self.get_config(SNAPSHOT_QUIET_HOURS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(2.0)
    }

    /// Whether the JSON flattening pass is enabled.
    #[must_use]
    pub fn json_flatten(&self) -> bool {
        self.get_config(JSON_FLATTEN).as_deref() != Some("false")
    }

    // ── JSON paths ──────────────────────────────────────────────────

    /// Target table for the JSON at `path` inside `table.column`.
    #[must_use]
    pub fn json_path_lookup(&self, table: &TableId, column: &str, path: &str) -> Option<String> {
        self.state
            .read()
            .json_paths
            .get(&(table.clone(), column.to_string(), path.to_string()))
            .cloned()
    }

    /// Maps the JSON at `path` inside `table.column` to table `target` in
    /// the same schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] for malformed paths or [`Error::Store`]
    /// if the update fails.
    pub async fn add_json_path_rule(
        &self,
        table: &TableId,
        column: &str,
        path: &str,
        target: &str,
    ) -> Result<()> {
        if !(path == "$" || path.starts_with("$.")) || target.is_empty() {
            return Err(Error::Catalog(format!(
                "invalid JSON path rule {table}.{column} {path} -> {target}"
            )));
        }
        let _ddl = self.ddl.lock().await;
        self.store
            .execute(&ddl::upsert_json_path(table, column, path, target))
            .await
            .map_err(|e| context(e, "add JSON path rule"))?;
        self.state.write().json_paths.insert(
            (table.clone(), column.to_string(), path.to_string()),
            target.to_string(),
        );
        Ok(())
    }

    // ── Snapshot tracking ───────────────────────────────────────────

    /// Notes that a snapshot-tagged event was just seen.
    pub fn record_snapshot_event(&self) {
        self.state.write().last_snapshot = Some(Instant::now());
    }

    /// Hours since the last snapshot-tagged event, `None` if none was seen
    /// since the last reset.
    #[must_use]
    pub fn hours_since_last_snapshot_record(&self) -> Option<f64> {
        self.state
            .read()
            .last_snapshot
            .map(|at| at.elapsed().as_secs_f64() / 3600.0)
    }

    /// Forgets the last snapshot-tagged event.
    pub fn reset_last_snapshot_record(&self) {
        self.state.write().last_snapshot = None;
    }

    // ── Sources, origins, sync ──────────────────────────────────────

    /// Registers or replaces a source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] for an empty name or [`Error::Store`] if
    /// the update fails.
    pub async fn add_source(&self, entry: SourceEntry) -> Result<()> {
        if entry.name.is_empty() {
            return Err(Error::Catalog("source name must not be empty".into()));
        }
        let _ddl = self.ddl.lock().await;
        self.store
            .execute(&entry.upsert_sql())
            .await
            .map_err(|e| context(e, &format!("register source {}", entry.name)))?;
        info!(source = %entry.name, topics = ?entry.topics, "source registered");
        self.state.write().sources.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// A registered source.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<SourceEntry> {
        self.state.read().sources.get(name).cloned()
    }

    /// Every registered source.
    #[must_use]
    pub fn sources(&self) -> Vec<SourceEntry> {
        self.state.read().sources.values().cloned().collect()
    }

    /// Registers an origin tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] for an empty name or [`Error::Store`] if
    /// the update fails.
    pub async fn add_origin(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Catalog("origin name must not be empty".into()));
        }
        let _ddl = self.ddl.lock().await;
        self.store
            .execute(&ddl::insert_origin(name))
            .await
            .map_err(|e| context(e, &format!("register origin {name}")))?;
        self.state.write().origins.insert(name.to_string());
        Ok(())
    }

    /// Every registered origin tag.
    #[must_use]
    pub fn origins(&self) -> Vec<String> {
        self.state.read().origins.iter().cloned().collect()
    }

    /// Sync mode of `source`.
    #[must_use]
    pub fn sync_mode(&self, source: &str) -> SyncMode {
        self.state
            .read()
            .sync_modes
            .get(source)
            .copied()
            .unwrap_or_default()
    }

    /// Persists the sync mode of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the update fails.
    pub async fn set_sync_mode(&self, source: &str, mode: SyncMode) -> Result<()> {
        let _ddl = self.ddl.lock().await;
        self.store
            .execute(&ddl::upsert_sync_mode(source, mode.as_str()))
            .await
            .map_err(|e| context(e, &format!("set sync mode of {source}")))?;
        self.state
            .write()
            .sync_modes
            .insert(source.to_string(), mode);
        info!(source, %mode, "sync mode changed");
        Ok(())
    }

    /// Asks the coordinator to run maintenance before the next generation.
    pub fn request_maintenance(&self) {
        self.maintenance.store(true, Ordering::Release);
    }

    /// Takes a pending maintenance request.
    pub fn take_maintenance_request(&self) -> bool {
        self.maintenance.swap(false, Ordering::AcqRel)
    }
}

// ── Hydration ──────────────────────────────────────────────────────

async fn hydrate(store: &dyn Store) -> Result<CatalogState> {
    let mut state = CatalogState::default();

    for row in store.query(ddl::SELECT_CONFIG).await? {
        let (parameter, value) = (row.text(0)?, row.text(1)?);
        if is_config_parameter_valid(parameter, value) {
            state.config.insert(parameter.to_string(), value.to_string());
        } else {
            warn!(parameter, value, "ignoring invalid persisted parameter");
        }
    }
    for row in store.query(ddl::SELECT_SOURCES).await? {
        let entry = SourceEntry::from_row(&row)?;
        state.sources.insert(entry.name.clone(), entry);
    }
    for row in store.query(ddl::SELECT_ORIGINS).await? {
        state.origins.insert(row.text(0)?.to_string());
    }
    for row in store.query(ddl::SELECT_SYNC).await? {
        state
            .sync_modes
            .insert(row.text(0)?.to_string(), row.text(1)?.parse()?);
    }

    load_forest(&mut state.forest, store.query(ddl::SELECT_BASE_TABLES).await?)?;

    for row in store.query(ddl::SELECT_JSON_PATHS).await? {
        let table = TableId::new(row.text(0)?, row.text(1)?);
        state.json_paths.insert(
            (table, row.text(2)?.to_string(), row.text(3)?.to_string()),
            row.text(4)?.to_string(),
        );
    }

    let schemas: BTreeSet<String> = state.forest.tables().map(|t| t.schema.clone()).collect();
    if schemas.is_empty() {
        return Ok(state);
    }
    let schemas: Vec<&str> = schemas.iter().map(String::as_str).collect();

    for row in store.query(&ddl::select_columns(&schemas)).await? {
        let table = TableId::new(row.text(0)?, row.text(1)?);
        let column = row.text(2)?;
        if !state.forest.contains(&table) || is_reserved_column(column) {
            continue;
        }
        let Some(ty) = ColumnType::from_information_schema(row.text(3)?, row.int(4)?) else {
            warn!(%table, column, data_type = row.text(3)?, "ignoring column of unsupported type");
            continue;
        };
        state
            .columns
            .entry(table)
            .or_default()
            .push((column.to_string(), ty));
    }
    for table in state.forest.tables() {
        state.columns.entry(table.clone()).or_default();
    }

    for row in store.query(&ddl::select_indexes(&schemas)).await? {
        state
            .indexes
            .insert((row.text(0)?.to_string(), row.text(1)?.to_string()));
    }

    for row in store.query(&ddl::select_partitions(&schemas)).await? {
        let (schema, parent, child) = (row.text(0)?, row.text(1)?, row.text(2)?);
        let Some(table_name) = parent.strip_suffix(tidemark_core::types::HISTORY_SUFFIX) else {
            continue;
        };
        let table = TableId::new(schema, table_name);
        if !state.forest.contains(&table) {
            continue;
        }
        if let Some(year) = child
            .strip_prefix(parent)
            .and_then(|y| y.parse::<i32>().ok())
        {
            state.part_years.entry(table).or_default().insert(year);
        }
    }
    Ok(state)
}

/// Inserts directory rows so that parents always precede their children.
fn load_forest(forest: &mut TableForest, rows: Vec<Row>) -> Result<()> {
    let mut pending: Vec<(TableId, String, Option<TableId>)> = Vec::with_capacity(rows.len());
    for row in rows {
        let table = TableId::new(row.text(0)?, row.text(1)?);
        let source = row.get(2).unwrap_or_default().to_string();
        let parent = match (row.get(3), row.get(4)) {
            (Some(s), Some(t)) => Some(TableId::new(s, t)),
            _ => None,
        };
        pending.push((table, source, parent));
    }
    while !pending.is_empty() {
        let before = pending.len();
        let mut rest = Vec::new();
        for (table, source, parent) in pending {
            if parent.as_ref().map_or(true, |p| forest.contains(p)) {
                forest.insert(table, &source, parent)?;
            } else {
                rest.push((table, source, parent));
            }
        }
        if rest.len() == before {
            let orphans: Vec<String> = rest.iter().map(|(t, _, _)| t.to_string()).collect();
            return Err(Error::Catalog(format!(
                "tables with untracked parents: {}",
                orphans.join(", ")
            )));
        }
        pending = rest;
    }
    Ok(())
}
