//! DDL and directory statements issued by the catalog.

use tidemark_core::sql::{quote_ident, quote_literal, render_literal};
use tidemark_core::types::{PG_VARCHAR_LIMIT, UNBOUNDED_VARCHAR};
use tidemark_core::{ColumnType, DataType, TableId};

/// Schema holding the persisted catalog.
pub const CATALOG_SCHEMA: &str = "tidemark";

/// Catalog layout version written to `tidemark.init`.
pub const CATALOG_VERSION: i32 = 1;

/// `__end` of rows that are still open.
pub const OPEN_END: &str = "'9999-12-31 00:00:00+00'";

/// Statements creating the persisted catalog; each is idempotent.
#[must_use]
pub fn bootstrap() -> Vec<String> {
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {CATALOG_SCHEMA}"),
        format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG_SCHEMA}.init (\
             version integer NOT NULL, \
             created timestamp with time zone NOT NULL DEFAULT now())"
        ),
        format!(
            "INSERT INTO {CATALOG_SCHEMA}.init (version) SELECT {CATALOG_VERSION} \
             WHERE NOT EXISTS (SELECT 1 FROM {CATALOG_SCHEMA}.init)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG_SCHEMA}.source (\
             name varchar(63) PRIMARY KEY, \
             brokers text NOT NULL, \
             topics text NOT NULL, \
             consumer_group text NOT NULL, \
             schema_pass_filter text NOT NULL DEFAULT '', \
             schema_stop_filter text NOT NULL DEFAULT '', \
             trim_schema_prefix text, \
             add_schema_prefix text)"
        ),
        format!("CREATE TABLE IF NOT EXISTS {CATALOG_SCHEMA}.origin (name varchar(63) PRIMARY KEY)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG_SCHEMA}.base_table (\
             id serial PRIMARY KEY, \
             schema_name varchar(63) NOT NULL, \
             table_name varchar(63) NOT NULL, \
             source_name varchar(63) NOT NULL DEFAULT '', \
             transformed boolean NOT NULL DEFAULT FALSE, \
             parent_schema_name varchar(63), \
             parent_table_name varchar(63), \
             UNIQUE (schema_name, table_name))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG_SCHEMA}.config (\
             parameter varchar(63) PRIMARY KEY, \
             value text NOT NULL)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG_SCHEMA}.jsonpath (\
             schema_name varchar(63) NOT NULL, \
             table_name varchar(63) NOT NULL, \
             column_name varchar(63) NOT NULL, \
             path text NOT NULL, \
             target_table varchar(63) NOT NULL, \
             PRIMARY KEY (schema_name, table_name, column_name, path))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG_SCHEMA}.sync (\
             source_name varchar(63) PRIMARY KEY, \
             mode varchar(15) NOT NULL)"
        ),
    ]
}

/// Name of the index on `column` of relation `relation`.
#[must_use]
pub fn index_name(relation: &str, column: &str) -> String {
    format!("{relation}_{column}_idx")
}

/// Rounds a type to the size `PostgreSQL` will report back for it.
#[must_use]
pub fn normalize(ty: ColumnType) -> ColumnType {
    match ty.data_type {
        DataType::Integer => ColumnType::new(
            DataType::Integer,
            match ty.size {
                i64::MIN..=2 => 2,
                3..=4 => 4,
                _ => 8,
            },
        ),
        DataType::Float => ColumnType::new(DataType::Float, if ty.size <= 4 { 4 } else { 8 }),
        DataType::Varchar if ty.size > PG_VARCHAR_LIMIT => ColumnType::varchar(UNBOUNDED_VARCHAR),
        DataType::Varchar => ColumnType::varchar(ty.size.max(1)),
        other => ColumnType::unsized_type(other),
    }
}

/// Returns `true` if a btree index on a column of type `ty` is allowed.
#[must_use]
pub fn is_indexable(ty: ColumnType, max_index_varchar_size: i64) -> bool {
    match ty.data_type {
        DataType::Json => false,
        DataType::Varchar => ty.size <= max_index_varchar_size,
        _ => true,
    }
}

/// Schema, history relation with its `__id` index, and current relation.
#[must_use]
pub fn create_table(table: &TableId) -> Vec<String> {
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&table.schema)),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             __id bigserial NOT NULL, \
             __start timestamp with time zone NOT NULL, \
             __end timestamp with time zone NOT NULL, \
             __current boolean NOT NULL, \
             __source varchar(63) NOT NULL, \
             __origin varchar(63) NOT NULL DEFAULT '', \
             __cf boolean NOT NULL DEFAULT TRUE) \
             PARTITION BY RANGE (__start)",
            table.history_sql()
        ),
        create_index_on(&table.schema, &table.history_name(), "__id"),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             __id bigint NOT NULL, \
             __start timestamp with time zone NOT NULL, \
             __source varchar(63) NOT NULL, \
             __origin varchar(63) NOT NULL DEFAULT '', \
             __cf boolean NOT NULL DEFAULT TRUE)",
            table.current_sql()
        ),
    ]
}

/// Directory row of a tracked table.
#[must_use]
pub fn insert_base_table(table: &TableId, source: &str, parent: Option<&TableId>) -> String {
    format!(
        "INSERT INTO {CATALOG_SCHEMA}.base_table \
         (schema_name, table_name, source_name, transformed, parent_schema_name, parent_table_name) \
         VALUES ({}, {}, {}, {}, {}, {}) \
         ON CONFLICT (schema_name, table_name) DO NOTHING",
        quote_literal(&table.schema),
        quote_literal(&table.table),
        quote_literal(source),
        if parent.is_some() { "TRUE" } else { "FALSE" },
        render_literal(parent.map(|p| p.schema.as_str())),
        render_literal(parent.map(|p| p.table.as_str())),
    )
}

/// Adds a column to both relations.
#[must_use]
pub fn add_column(table: &TableId, column: &str, ty: ColumnType) -> Vec<String> {
    [table.history_sql(), table.current_sql()]
        .into_iter()
        .map(|rel| {
            format!(
                "ALTER TABLE {rel} ADD COLUMN IF NOT EXISTS {} {}",
                quote_ident(column),
                ty.sql_type()
            )
        })
        .collect()
}

/// Changes a column's type on both relations, casting when `cast` is set.
#[must_use]
pub fn alter_column_type(table: &TableId, column: &str, ty: ColumnType, cast: bool) -> Vec<String> {
    let col = quote_ident(column);
    let sql_type = ty.sql_type();
    [table.history_sql(), table.current_sql()]
        .into_iter()
        .map(|rel| {
            if cast {
                format!("ALTER TABLE {rel} ALTER COLUMN {col} TYPE {sql_type} USING {col}::{sql_type}")
            } else {
                format!("ALTER TABLE {rel} ALTER COLUMN {col} TYPE {sql_type}")
            }
        })
        .collect()
}

/// Drops a column from both relations.
#[must_use]
pub fn drop_column(table: &TableId, column: &str) -> Vec<String> {
    [table.history_sql(), table.current_sql()]
        .into_iter()
        .map(|rel| format!("ALTER TABLE {rel} DROP COLUMN IF EXISTS {}", quote_ident(column)))
        .collect()
}

/// Longest text form of `column` ever stored in the history relation.
#[must_use]
pub fn max_text_length(table: &TableId, column: &str) -> String {
    format!(
        "SELECT COALESCE(MAX(LENGTH({}::text)), 0) FROM {}",
        quote_ident(column),
        table.history_sql()
    )
}

fn create_index_on(schema: &str, relation: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}.{} ({})",
        quote_ident(&index_name(relation, column)),
        quote_ident(schema),
        quote_ident(relation),
        quote_ident(column)
    )
}

/// Index on `column` of the current relation.
#[must_use]
pub fn create_index(table: &TableId, column: &str) -> String {
    create_index_on(&table.schema, &table.table, column)
}

/// Drops the index on `column` of the current relation.
#[must_use]
pub fn drop_index(table: &TableId, column: &str) -> String {
    format!(
        "DROP INDEX IF EXISTS {}.{}",
        quote_ident(&table.schema),
        quote_ident(&index_name(&table.table, column))
    )
}

/// History partition holding rows whose `__start` falls in `year`.
#[must_use]
pub fn create_partition(table: &TableId, year: i32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF {} \
         FOR VALUES FROM ('{year:04}-01-01 00:00:00+00') TO ('{:04}-01-01 00:00:00+00')",
        table.partition_sql(year),
        table.history_sql(),
        year + 1
    )
}

/// Upserts one runtime parameter.
#[must_use]
pub fn upsert_config(parameter: &str, value: &str) -> String {
    format!(
        "INSERT INTO {CATALOG_SCHEMA}.config (parameter, value) VALUES ({}, {}) \
         ON CONFLICT (parameter) DO UPDATE SET value = EXCLUDED.value",
        quote_literal(parameter),
        quote_literal(value)
    )
}

/// Upserts one JSON flattening rule.
#[must_use]
pub fn upsert_json_path(table: &TableId, column: &str, path: &str, target: &str) -> String {
    format!(
        "INSERT INTO {CATALOG_SCHEMA}.jsonpath \
         (schema_name, table_name, column_name, path, target_table) \
         VALUES ({}, {}, {}, {}, {}) \
         ON CONFLICT (schema_name, table_name, column_name, path) \
         DO UPDATE SET target_table = EXCLUDED.target_table",
        quote_literal(&table.schema),
        quote_literal(&table.table),
        quote_literal(column),
        quote_literal(path),
        quote_literal(target)
    )
}

/// Upserts the sync mode of a source.
#[must_use]
pub fn upsert_sync_mode(source: &str, mode: &str) -> String {
    format!(
        "INSERT INTO {CATALOG_SCHEMA}.sync (source_name, mode) VALUES ({}, {}) \
         ON CONFLICT (source_name) DO UPDATE SET mode = EXCLUDED.mode",
        quote_literal(source),
        quote_literal(mode)
    )
}

/// Registers an origin tag.
#[must_use]
pub fn insert_origin(name: &str) -> String {
    format!(
        "INSERT INTO {CATALOG_SCHEMA}.origin (name) VALUES ({}) ON CONFLICT (name) DO NOTHING",
        quote_literal(name)
    )
}

// ── Hydration queries ──────────────────────────────────────────────

pub(crate) const SELECT_CONFIG: &str = "SELECT parameter, value FROM tidemark.config";

pub(crate) const SELECT_SOURCES: &str = "SELECT name, brokers, topics, consumer_group, \
     schema_pass_filter, schema_stop_filter, trim_schema_prefix, add_schema_prefix \
     FROM tidemark.source ORDER BY name";

pub(crate) const SELECT_ORIGINS: &str = "SELECT name FROM tidemark.origin ORDER BY name";

pub(crate) const SELECT_SYNC: &str = "SELECT source_name, mode FROM tidemark.sync";

pub(crate) const SELECT_BASE_TABLES: &str = "SELECT schema_name, table_name, source_name, \
     parent_schema_name, parent_table_name FROM tidemark.base_table ORDER BY id";

pub(crate) const SELECT_JSON_PATHS: &str =
    "SELECT schema_name, table_name, column_name, path, target_table FROM tidemark.jsonpath";

fn schema_list(schemas: &[&str]) -> String {
    schemas
        .iter()
        .map(|s| quote_literal(s))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn select_columns(schemas: &[&str]) -> String {
    format!(
        "SELECT table_schema, table_name, column_name, data_type, character_maximum_length \
         FROM information_schema.columns WHERE table_schema IN ({}) \
         ORDER BY table_schema, table_name, ordinal_position",
        schema_list(schemas)
    )
}

pub(crate) fn select_indexes(schemas: &[&str]) -> String {
    format!(
        "SELECT n.nspname, i.relname FROM pg_index x \
         JOIN pg_class i ON i.oid = x.indexrelid \
         JOIN pg_class t ON t.oid = x.indrelid \
         JOIN pg_namespace n ON n.oid = t.relnamespace \
         WHERE n.nspname IN ({})",
        schema_list(schemas)
    )
}

pub(crate) fn select_partitions(schemas: &[&str]) -> String {
    format!(
        "SELECT n.nspname, p.relname, c.relname FROM pg_inherits h \
         JOIN pg_class c ON c.oid = h.inhrelid \
         JOIN pg_class p ON p.oid = h.inhparent \
         JOIN pg_namespace n ON n.oid = p.relnamespace \
         WHERE n.nspname IN ({})",
        schema_list(schemas)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableId {
        TableId::new("src", "orders")
    }

    #[test]
    fn test_create_table_statements() {
        let stmts = create_table(&orders());
        assert_eq!(stmts.len(), 4);
        assert_eq!(stmts[0], "CREATE SCHEMA IF NOT EXISTS \"src\"");
        assert!(stmts[1].starts_with("CREATE TABLE IF NOT EXISTS \"src\".\"orders__\""));
        assert!(stmts[1].ends_with("PARTITION BY RANGE (__start)"));
        assert_eq!(
            stmts[2],
            "CREATE INDEX IF NOT EXISTS \"orders_____id_idx\" ON \"src\".\"orders__\" (\"__id\")"
        );
        assert!(stmts[3].starts_with("CREATE TABLE IF NOT EXISTS \"src\".\"orders\""));
    }

    #[test]
    fn test_partition_bounds() {
        assert_eq!(
            create_partition(&orders(), 2024),
            "CREATE TABLE IF NOT EXISTS \"src\".\"orders__2024\" PARTITION OF \"src\".\"orders__\" \
             FOR VALUES FROM ('2024-01-01 00:00:00+00') TO ('2025-01-01 00:00:00+00')"
        );
    }

    #[test]
    fn test_alter_with_cast() {
        let stmts = alter_column_type(&orders(), "total", ColumnType::new(DataType::Float, 8), true);
        assert_eq!(
            stmts[0],
            "ALTER TABLE \"src\".\"orders__\" ALTER COLUMN \"total\" TYPE double precision \
             USING \"total\"::double precision"
        );
        assert!(stmts[1].starts_with("ALTER TABLE \"src\".\"orders\" "));
        let plain = alter_column_type(&orders(), "name", ColumnType::varchar(40), false);
        assert_eq!(
            plain[1],
            "ALTER TABLE \"src\".\"orders\" ALTER COLUMN \"name\" TYPE varchar(40)"
        );
    }

    #[test]
    fn test_base_table_row() {
        let sql = insert_base_table(
            &TableId::new("src", "orders_lines"),
            "pg1",
            Some(&orders()),
        );
        assert!(sql.contains("VALUES ('src', 'orders_lines', 'pg1', TRUE, 'src', 'orders')"));
        let root = insert_base_table(&orders(), "pg1", None);
        assert!(root.contains("FALSE, NULL, NULL)"));
    }

    #[test]
    fn test_normalize_sizes() {
        assert_eq!(normalize(ColumnType::new(DataType::Integer, 3)).size, 4);
        assert_eq!(normalize(ColumnType::new(DataType::Float, 6)).size, 8);
        assert_eq!(normalize(ColumnType::varchar(0)).size, 1);
        assert_eq!(
            normalize(ColumnType::varchar(PG_VARCHAR_LIMIT + 40)).size,
            UNBOUNDED_VARCHAR
        );
        assert_eq!(normalize(ColumnType::new(DataType::Uuid, 16)).size, 0);
    }

    #[test]
    fn test_indexable() {
        assert!(is_indexable(ColumnType::varchar(1000), 1000));
        assert!(!is_indexable(ColumnType::varchar(1001), 1000));
        assert!(!is_indexable(ColumnType::unsized_type(DataType::Json), 1000));
        assert!(is_indexable(ColumnType::unsized_type(DataType::Uuid), 1000));
    }
}
