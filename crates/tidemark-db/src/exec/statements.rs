//! Data statements for bitemporal writes.
//!
//! Every value is the literal rendered by the command model; nothing here
//! reinterprets source values.

use chrono::{DateTime, Utc};

use tidemark_core::sql::{quote_ident, quote_literal};
use tidemark_core::{ColumnType, Command, CommandColumn, TableId};

use crate::catalog::OPEN_END;

/// Renders an instant as a `timestamptz` literal.
#[must_use]
pub fn timestamp_literal(ts: DateTime<Utc>) -> String {
    format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.6f+00"))
}

fn key_predicate(prefix: &str, key: &[&CommandColumn]) -> String {
    key.iter()
        .map(|c| format!(" AND {prefix}{} = {}", quote_ident(&c.name), c.literal))
        .collect()
}

/// Looks up the current row of the command's entity.
///
/// Returns `__id`, the start a new version would get (never before the
/// open row's start), `__cf`, and whether every tracked column equals the
/// incoming value. Tracked columns missing from the command must be
/// `NULL` to count as equal.
#[must_use]
pub fn select_current(cmd: &Command, tracked: &[(String, ColumnType)], ts: &str) -> String {
    let identity: Vec<String> = tracked
        .iter()
        .map(|(name, _)| match cmd.column(name) {
            Some(c) => format!("{} IS NOT DISTINCT FROM {}", quote_ident(name), c.literal),
            None => format!("{} IS NULL", quote_ident(name)),
        })
        .collect();
    let identity = if identity.is_empty() {
        "TRUE".to_string()
    } else {
        identity.join(" AND ")
    };
    format!(
        "SELECT __id, GREATEST(__start, {ts}), __cf, ({identity}) FROM {} \
         WHERE __origin = {}{}",
        cmd.table.current_sql(),
        quote_literal(&cmd.origin),
        key_predicate("", &cmd.primary_key())
    )
}

/// Sets the carry-forward flag on the current row.
#[must_use]
pub fn confirm_current(table: &TableId, id: i64) -> String {
    format!("UPDATE {} SET __cf = TRUE WHERE __id = {id}", table.current_sql())
}

/// Sets the carry-forward flag on the open history row.
#[must_use]
pub fn confirm_history(table: &TableId, id: i64) -> String {
    format!(
        "UPDATE {} SET __cf = TRUE WHERE __id = {id} AND __current",
        table.history_sql()
    )
}

/// Closes one open history row at `end`.
#[must_use]
pub fn close_version(table: &TableId, id: i64, end: &str) -> String {
    format!(
        "UPDATE {} SET __end = {end}, __current = FALSE WHERE __id = {id} AND __current",
        table.history_sql()
    )
}

/// Removes one current row.
#[must_use]
pub fn delete_current(table: &TableId, id: i64) -> String {
    format!("DELETE FROM {} WHERE __id = {id}", table.current_sql())
}

fn user_columns(cmd: &Command) -> (String, String) {
    let names: String = cmd
        .columns
        .iter()
        .map(|c| format!(", {}", quote_ident(&c.name)))
        .collect();
    let values: String = cmd.columns.iter().map(|c| format!(", {}", c.literal)).collect();
    (names, values)
}

/// Inserts a new open history row starting at `start`, returning `__id`.
#[must_use]
pub fn insert_history(cmd: &Command, start: &str) -> String {
    let (names, values) = user_columns(cmd);
    format!(
        "INSERT INTO {} (__start, __end, __current, __source, __origin, __cf{names}) \
         VALUES ({start}, {OPEN_END}, TRUE, {}, {}, TRUE{values}) RETURNING __id",
        cmd.table.history_sql(),
        quote_literal(&cmd.source),
        quote_literal(&cmd.origin),
    )
}

/// Inserts the current row mirroring history row `id`.
#[must_use]
pub fn insert_current(cmd: &Command, id: i64, start: &str) -> String {
    let (names, values) = user_columns(cmd);
    format!(
        "INSERT INTO {} (__id, __start, __source, __origin, __cf{names}) \
         VALUES ({id}, {start}, {}, {}, TRUE{values})",
        cmd.table.current_sql(),
        quote_literal(&cmd.source),
        quote_literal(&cmd.origin),
    )
}

/// Current rows addressed by a delete or a truncate.
#[derive(Debug, Clone, Copy)]
pub enum RowScope<'a> {
    /// Rows of `origin` whose key columns equal the command's.
    Keyed {
        /// Origin the rows were written for.
        origin: &'a str,
        /// Key columns with their literals.
        key: &'a [&'a CommandColumn],
    },
    /// Every current row, whatever its origin.
    All,
}

impl RowScope<'_> {
    fn predicate(&self, prefix: &str) -> Option<String> {
        match self {
            RowScope::Keyed { origin, key } => Some(format!(
                "{prefix}__origin = {}{}",
                quote_literal(origin),
                key_predicate(prefix, key)
            )),
            RowScope::All => None,
        }
    }
}

/// Closes the open history rows behind the current rows in `scope`.
#[must_use]
pub fn close_matching(table: &TableId, scope: RowScope<'_>, ts: &str) -> String {
    let mut sql = format!(
        "UPDATE {} AS h SET __end = GREATEST(h.__start, {ts}), __current = FALSE \
         FROM {} AS c WHERE c.__id = h.__id AND h.__current",
        table.history_sql(),
        table.current_sql(),
    );
    if let Some(predicate) = scope.predicate("c.") {
        sql.push_str(" AND ");
        sql.push_str(&predicate);
    }
    sql
}

/// Removes the current rows in `scope`.
#[must_use]
pub fn delete_matching(table: &TableId, scope: RowScope<'_>) -> String {
    match scope.predicate("") {
        Some(predicate) => format!("DELETE FROM {} WHERE {predicate}", table.current_sql()),
        None => format!("DELETE FROM {}", table.current_sql()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::{DataType, Op};

    fn cmd() -> Command {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut cmd = Command::new(Op::Merge, TableId::new("src", "orders"), ts);
        cmd.source = "pg1".into();
        cmd.origin = "eu".into();
        cmd.columns = vec![
            CommandColumn::new(
                "id",
                ColumnType::unsized_type(DataType::Uuid),
                Some("5b1f1c3e-8f0a-4e43-9d4e-0c6b1d2f3a4b".into()),
            )
            .with_primary_key(1),
            CommandColumn::new("total", ColumnType::new(DataType::Float, 8), Some("9.5".into())),
        ];
        cmd
    }

    #[test]
    fn test_timestamp_literal() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_000).unwrap();
        assert_eq!(timestamp_literal(ts), "'2023-11-14 22:13:20.000123+00'");
    }

    #[test]
    fn test_select_current_identity() {
        let tracked = vec![
            ("id".to_string(), ColumnType::unsized_type(DataType::Uuid)),
            ("total".to_string(), ColumnType::new(DataType::Float, 8)),
            ("note".to_string(), ColumnType::varchar(10)),
        ];
        let sql = select_current(&cmd(), &tracked, "'2023-11-14 22:13:20.000000+00'");
        assert_eq!(
            sql,
            "SELECT __id, GREATEST(__start, '2023-11-14 22:13:20.000000+00'), __cf, \
             (\"id\" IS NOT DISTINCT FROM '5b1f1c3e-8f0a-4e43-9d4e-0c6b1d2f3a4b' AND \
             \"total\" IS NOT DISTINCT FROM '9.5' AND \"note\" IS NULL) \
             FROM \"src\".\"orders\" WHERE __origin = 'eu' \
             AND \"id\" = '5b1f1c3e-8f0a-4e43-9d4e-0c6b1d2f3a4b'"
        );
    }

    #[test]
    fn test_insert_history_returns_id() {
        let sql = insert_history(&cmd(), "'2023-11-14 22:13:20+00'");
        assert!(sql.starts_with(
            "INSERT INTO \"src\".\"orders__\" (__start, __end, __current, __source, __origin, __cf, \"id\", \"total\")"
        ));
        assert!(sql.contains("'9999-12-31 00:00:00+00', TRUE, 'pg1', 'eu', TRUE, '5b1f"));
        assert!(sql.ends_with("RETURNING __id"));
    }

    #[test]
    fn test_close_matching_scoped_to_key_and_origin() {
        let c = cmd();
        let key = c.primary_key();
        let scope = RowScope::Keyed { origin: "eu", key: &key };
        let sql = close_matching(&c.table, scope, "'2024-01-01 00:00:00.000000+00'");
        assert!(sql.starts_with("UPDATE \"src\".\"orders__\" AS h SET __end = GREATEST(h.__start, "));
        assert!(sql.ends_with("c.__origin = 'eu' AND c.\"id\" = '5b1f1c3e-8f0a-4e43-9d4e-0c6b1d2f3a4b'"));
        assert_eq!(
            delete_matching(&c.table, scope),
            "DELETE FROM \"src\".\"orders\" WHERE __origin = 'eu' AND \"id\" = '5b1f1c3e-8f0a-4e43-9d4e-0c6b1d2f3a4b'"
        );
    }

    #[test]
    fn test_truncate_scope_ignores_origin() {
        let table = TableId::new("src", "orders");
        let close = close_matching(&table, RowScope::All, "'2024-01-01 00:00:00.000000+00'");
        assert!(close.ends_with("WHERE c.__id = h.__id AND h.__current"));
        assert!(!close.contains("__origin"));
        assert_eq!(delete_matching(&table, RowScope::All), "DELETE FROM \"src\".\"orders\"");
    }
}
