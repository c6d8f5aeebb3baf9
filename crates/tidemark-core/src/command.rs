//! Typed row-level change commands.
//!
//! A [`Command`] is produced once per decoded change event and carries every
//! value pre-rendered as a SQL literal, so nothing downstream reinterprets
//! raw source values.

use chrono::{DateTime, Utc};

use crate::sql::render_literal;
use crate::types::{ColumnType, DataType, TableId};

/// Kind of row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Insert or update of one entity.
    Merge,
    /// Removal of one entity.
    Delete,
    /// Removal of every entity of the table.
    Truncate,
}

/// One column value of a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommandColumn {
    /// Column name.
    pub name: String,
    /// Implied type of the value.
    pub data_type: DataType,
    /// Implied size of the value.
    pub type_size: i64,
    /// Text form of the value, `None` for SQL `NULL`.
    pub raw: Option<String>,
    /// Rendered SQL literal: `NULL` or a quoted string.
    pub literal: String,
    /// Ordinal in the primary key, 0 if not a key column.
    pub primary_key: u16,
}

impl CommandColumn {
    /// Creates a column, rendering its literal from `raw`.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType, raw: Option<String>) -> Self {
        let literal = render_literal(raw.as_deref());
        Self {
            name: name.into(),
            data_type: ty.data_type,
            type_size: ty.size,
            raw,
            literal,
            primary_key: 0,
        }
    }

    /// Marks this column as the `rank`-th primary key column.
    #[must_use]
    pub fn with_primary_key(mut self, rank: u16) -> Self {
        self.primary_key = rank;
        self
    }

    /// Implied type and size.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        ColumnType::new(self.data_type, self.type_size)
    }

    /// Returns `true` if the value is SQL `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }
}

/// One logical row-level change.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Change kind.
    pub op: Op,
    /// Target table.
    pub table: TableId,
    /// Origin tag; empty when the source has no origins.
    pub origin: String,
    /// Source name the event was read from.
    pub source: String,
    /// Time the change happened upstream.
    pub source_timestamp: DateTime<Utc>,
    /// Event was emitted by the source's initial snapshot.
    pub snapshot: bool,
    /// Table this one was derived from by flattening.
    pub parent: Option<TableId>,
    /// Column values; for deletes only the key columns.
    pub columns: Vec<CommandColumn>,
}

impl Command {
    /// Creates a command with no columns.
    #[must_use]
    pub fn new(op: Op, table: TableId, source_timestamp: DateTime<Utc>) -> Self {
        Self {
            op,
            table,
            origin: String::new(),
            source: String::new(),
            source_timestamp,
            snapshot: false,
            parent: None,
            columns: Vec::new(),
        }
    }

    /// Primary key columns ordered by rank.
    #[must_use]
    pub fn primary_key(&self) -> Vec<&CommandColumn> {
        let mut pk: Vec<&CommandColumn> =
            self.columns.iter().filter(|c| c.primary_key > 0).collect();
        pk.sort_by_key(|c| c.primary_key);
        pk
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&CommandColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Ordered commands from one poll cycle.
pub type CommandList = Vec<Command>;

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    #[test]
    fn test_literal_rendered_once() {
        let c = CommandColumn::new("name", ColumnType::varchar(6), Some("O'Hara".into()));
        assert_eq!(c.literal, "'O''Hara'");
        let n = CommandColumn::new("name", ColumnType::varchar(0), None);
        assert_eq!(n.literal, "NULL");
        assert!(n.is_null());
    }

    #[test]
    fn test_primary_key_ordered_by_rank() {
        let mut cmd = Command::new(Op::Merge, TableId::new("s", "t"), ts());
        cmd.columns = vec![
            CommandColumn::new("b", ColumnType::varchar(1), Some("x".into())).with_primary_key(2),
            CommandColumn::new("v", ColumnType::varchar(1), Some("y".into())),
            CommandColumn::new("a", ColumnType::varchar(1), Some("z".into())).with_primary_key(1),
        ];
        let names: Vec<&str> = cmd.primary_key().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(cmd.column("v").is_some());
        assert!(cmd.column("w").is_none());
    }
}
