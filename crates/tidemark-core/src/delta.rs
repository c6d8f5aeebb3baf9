//! Schema delta engine.
//!
//! Compares the column types implied by a run of merge commands with the
//! types recorded in the catalog and produces the ordered list of column
//! additions and widenings needed before the run can be written.
//!
//! Types move along a fixed lattice: sizes grow inside the integer, float
//! and varchar families, integers widen into floats, both numeric families
//! widen into `numeric`, and anything that cannot be reconciled becomes
//! varchar. A column is never narrowed.

use std::collections::HashMap;

use crate::command::{Command, Op};
use crate::error::{Error, Result};
use crate::types::{ColumnType, DataType, TableId};

/// Planned change to one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaColumnSchema {
    /// Column does not exist yet.
    pub is_new_column: bool,
    /// Column name.
    pub name: String,
    /// Recorded type; equals `new_type` for new columns.
    pub old_type: DataType,
    /// Type after the change.
    pub new_type: DataType,
    /// Recorded size; 0 for new columns.
    pub old_size: i64,
    /// Size after the change.
    ///
    /// For a conversion into varchar this is the length required by the
    /// incoming values only; the catalog raises it to the longest value
    /// already stored.
    pub new_size: i64,
}

impl DeltaColumnSchema {
    fn new_column(name: &str, ty: ColumnType) -> Self {
        Self {
            is_new_column: true,
            name: name.to_string(),
            old_type: ty.data_type,
            new_type: ty.data_type,
            old_size: 0,
            new_size: ty.size,
        }
    }

    fn change(name: &str, old: ColumnType, new: ColumnType) -> Self {
        Self {
            is_new_column: false,
            name: name.to_string(),
            old_type: old.data_type,
            new_type: new.data_type,
            old_size: old.size,
            new_size: new.size,
        }
    }

    /// Type and size after the change.
    #[must_use]
    pub fn new_column_type(&self) -> ColumnType {
        ColumnType::new(self.new_type, self.new_size)
    }

    /// Type and size before the change.
    #[must_use]
    pub fn old_column_type(&self) -> ColumnType {
        ColumnType::new(self.old_type, self.old_size)
    }

    /// Returns `true` if the change alters the type family, requiring a cast.
    #[must_use]
    pub fn is_cast(&self) -> bool {
        !self.is_new_column && self.old_type != self.new_type
    }
}

/// Widest type observed for one column across a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingColumn {
    /// Column name.
    pub name: String,
    /// Widest implied type.
    pub ty: ColumnType,
    /// Longest text form of any value, in characters.
    pub text_len: i64,
    /// Every value seen for this column was `NULL`.
    pub all_null: bool,
}

/// Collects the widest implied type per column over the merges in `commands`.
///
/// Columns keep the order of first appearance. Deletes and truncates carry
/// no schema and are ignored.
#[must_use]
pub fn incoming_columns<'a, I>(commands: I) -> Vec<IncomingColumn>
where
    I: IntoIterator<Item = &'a Command>,
{
    let mut out: Vec<IncomingColumn> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for cmd in commands.into_iter().filter(|c| c.op == Op::Merge) {
        for col in &cmd.columns {
            let text_len = col
                .raw
                .as_deref()
                .map_or(0, |s| i64::try_from(s.chars().count()).unwrap_or(i64::MAX));
            let seen = IncomingColumn {
                name: col.name.clone(),
                ty: col.column_type(),
                text_len,
                all_null: col.is_null(),
            };
            match index.get(&col.name) {
                Some(&i) => out[i] = combine_incoming(&out[i], &seen),
                None => {
                    index.insert(col.name.clone(), out.len());
                    out.push(seen);
                }
            }
        }
    }
    out
}

fn combine_incoming(a: &IncomingColumn, b: &IncomingColumn) -> IncomingColumn {
    let text_len = a.text_len.max(b.text_len);
    let ty = if a.all_null {
        b.ty
    } else if b.all_null {
        a.ty
    } else {
        resolve_widening(a.ty, b.ty, text_len, false).unwrap_or(a.ty)
    };
    let ty = if ty.data_type == DataType::Varchar {
        ColumnType::varchar(ty.size.max(text_len))
    } else {
        ty
    };
    IncomingColumn {
        name: a.name.clone(),
        ty,
        text_len,
        all_null: a.all_null && b.all_null,
    }
}

// ── Widening lattice ───────────────────────────────────────────────

/// Resolves the type a column must have to hold both `existing` and
/// `incoming` values. Returns `None` when `existing` already suffices.
///
/// `incoming_len` is the longest text form among the incoming values and
/// sizes any fallback to varchar. A run whose values are all `NULL` never
/// changes an existing column.
#[must_use]
pub fn resolve_widening(
    existing: ColumnType,
    incoming: ColumnType,
    incoming_len: i64,
    incoming_all_null: bool,
) -> Option<ColumnType> {
    use DataType::{Float, Integer, Numeric, Varchar};

    if incoming_all_null {
        return None;
    }
    let target = match (existing.data_type, incoming.data_type) {
        (a, b) if a == b => ColumnType::new(a, existing.size.max(incoming.size)),
        (Integer, Float) => ColumnType::new(Float, incoming.size.max(8)),
        (Float, Integer) | (Numeric, Integer | Float) => existing,
        (Integer | Float, Numeric) => ColumnType::unsized_type(Numeric),
        (Varchar, _) => ColumnType::varchar(existing.size.max(incoming_len)),
        (_, Varchar) => ColumnType::varchar(incoming.size.max(incoming_len)),
        _ => ColumnType::varchar(incoming_len),
    };
    (target != existing).then_some(target)
}

/// Returns `true` if a column may move from `old` to `new`.
#[must_use]
pub fn is_widening(old: ColumnType, new: ColumnType) -> bool {
    use DataType::{Float, Integer, Numeric, Varchar};

    match (old.data_type, new.data_type) {
        (a, b) if a == b => new.size >= old.size,
        (Integer, Float | Numeric) | (Float, Numeric) | (_, Varchar) => true,
        _ => false,
    }
}

/// Computes the ordered delta for `table`.
///
/// `existing` reports the recorded type of a column, or `None` if the
/// column does not exist. New columns come first, in incoming order,
/// followed by changes to existing columns.
///
/// # Errors
///
/// Returns [`Error::SchemaConflict`] if a planned change would narrow a
/// column.
pub fn compute_delta<F>(
    table: &TableId,
    incoming: &[IncomingColumn],
    existing: F,
) -> Result<Vec<DeltaColumnSchema>>
where
    F: Fn(&str) -> Option<ColumnType>,
{
    let mut added = Vec::new();
    let mut changed = Vec::new();
    for col in incoming {
        match existing(&col.name) {
            None => {
                let ty = if col.ty.data_type == DataType::Varchar {
                    ColumnType::varchar(col.ty.size.max(col.text_len))
                } else {
                    col.ty
                };
                added.push(DeltaColumnSchema::new_column(&col.name, ty));
            }
            Some(old) => {
                if let Some(new) = resolve_widening(old, col.ty, col.text_len, col.all_null) {
                    if !is_widening(old, new) {
                        return Err(Error::SchemaConflict {
                            table: table.to_string(),
                            column: col.name.clone(),
                            message: format!("cannot change {old} to {new}"),
                        });
                    }
                    changed.push(DeltaColumnSchema::change(&col.name, old, new));
                }
            }
        }
    }
    added.extend(changed);
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> ColumnType {
        ColumnType::new(DataType::Integer, n)
    }

    fn float(n: i64) -> ColumnType {
        ColumnType::new(DataType::Float, n)
    }

    fn numeric() -> ColumnType {
        ColumnType::unsized_type(DataType::Numeric)
    }

    fn uuid() -> ColumnType {
        ColumnType::unsized_type(DataType::Uuid)
    }

    fn widen(old: ColumnType, new: ColumnType, len: i64) -> Option<ColumnType> {
        resolve_widening(old, new, len, false)
    }

    #[test]
    fn test_varchar_sizes() {
        assert_eq!(widen(ColumnType::varchar(10), ColumnType::varchar(5), 5), None);
        assert_eq!(widen(ColumnType::varchar(10), ColumnType::varchar(10), 10), None);
        assert_eq!(
            widen(ColumnType::varchar(10), ColumnType::varchar(30), 30),
            Some(ColumnType::varchar(30))
        );
    }

    #[test]
    fn test_numeric_families() {
        assert_eq!(widen(int(2), int(8), 5), Some(int(8)));
        assert_eq!(widen(int(8), int(4), 5), None);
        assert_eq!(widen(float(4), float(8), 5), Some(float(8)));
        assert_eq!(widen(int(4), float(4), 5), Some(float(8)));
        assert_eq!(widen(int(4), numeric(), 5), Some(numeric()));
        assert_eq!(widen(float(8), numeric(), 5), Some(numeric()));
        assert_eq!(widen(numeric(), int(8), 5), None);
        assert_eq!(widen(numeric(), float(8), 5), None);
        assert_eq!(widen(float(8), int(8), 5), None);
    }

    #[test]
    fn test_varchar_absorbs_other_types() {
        assert_eq!(widen(ColumnType::varchar(10), int(8), 4), None);
        assert_eq!(
            widen(ColumnType::varchar(10), uuid(), 36),
            Some(ColumnType::varchar(36))
        );
    }

    #[test]
    fn test_incompatible_falls_back_to_varchar() {
        let b = ColumnType::unsized_type(DataType::Boolean);
        assert_eq!(widen(b, int(4), 7), Some(ColumnType::varchar(7)));
        assert_eq!(
            widen(uuid(), ColumnType::varchar(3), 3),
            Some(ColumnType::varchar(3))
        );
    }

    #[test]
    fn test_null_never_downgrades() {
        assert_eq!(
            resolve_widening(uuid(), ColumnType::varchar(0), 0, true),
            None
        );
    }

    #[test]
    fn test_is_widening_rejects_narrowing() {
        assert!(is_widening(int(2), int(4)));
        assert!(!is_widening(int(8), int(4)));
        assert!(!is_widening(numeric(), int(8)));
        assert!(is_widening(uuid(), ColumnType::varchar(36)));
    }

    #[test]
    fn test_compute_delta_orders_new_columns_first() {
        let table = TableId::new("src", "orders");
        let incoming = vec![
            IncomingColumn {
                name: "qty".into(),
                ty: int(8),
                text_len: 3,
                all_null: false,
            },
            IncomingColumn {
                name: "id".into(),
                ty: uuid(),
                text_len: 36,
                all_null: false,
            },
            IncomingColumn {
                name: "note".into(),
                ty: ColumnType::varchar(12),
                text_len: 12,
                all_null: false,
            },
        ];
        let delta = compute_delta(&table, &incoming, |name| match name {
            "qty" => Some(int(4)),
            "note" => Some(ColumnType::varchar(40)),
            _ => None,
        })
        .unwrap();

        assert_eq!(delta.len(), 2);
        assert!(delta[0].is_new_column);
        assert_eq!(delta[0].name, "id");
        assert!(!delta[1].is_new_column);
        assert_eq!(delta[1].name, "qty");
        assert_eq!(delta[1].old_column_type(), int(4));
        assert_eq!(delta[1].new_column_type(), int(8));
        assert!(!delta[1].is_cast());
    }

    #[test]
    fn test_compute_delta_empty_catalog() {
        let table = TableId::new("src", "orders");
        let incoming = vec![
            IncomingColumn {
                name: "id".into(),
                ty: uuid(),
                text_len: 36,
                all_null: false,
            },
            IncomingColumn {
                name: "total".into(),
                ty: float(8),
                text_len: 6,
                all_null: false,
            },
        ];
        let delta = compute_delta(&table, &incoming, |_| None).unwrap();
        assert_eq!(delta.len(), 2);
        assert!(delta.iter().all(|d| d.is_new_column));
    }

    #[test]
    fn test_monotonic_over_sequence() {
        let sequence = [
            int(2),
            int(8),
            int(4),
            float(4),
            numeric(),
            int(2),
            ColumnType::unsized_type(DataType::Boolean),
            int(8),
        ];
        let mut current = sequence[0];
        for next in &sequence[1..] {
            if let Some(t) = widen(current, *next, 10) {
                assert!(is_widening(current, t), "{current} -> {t}");
                current = t;
            }
        }
        assert_eq!(current.data_type, DataType::Varchar);
    }

    #[test]
    fn test_incoming_columns_takes_widest() {
        use crate::command::CommandColumn;
        use chrono::Utc;

        let table = TableId::new("s", "t");
        let mut a = Command::new(Op::Merge, table.clone(), Utc::now());
        a.columns = vec![CommandColumn::new(
            "name",
            ColumnType::varchar(3),
            Some("abc".into()),
        )];
        let mut b = Command::new(Op::Merge, table.clone(), Utc::now());
        b.columns = vec![CommandColumn::new(
            "name",
            ColumnType::varchar(7),
            Some("abcdefg".into()),
        )];
        let d = Command::new(Op::Delete, table, Utc::now());

        let cols = incoming_columns([&a, &d, &b]);
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].ty, ColumnType::varchar(7));
        assert_eq!(cols[0].text_len, 7);
        assert!(!cols[0].all_null);
    }
}
