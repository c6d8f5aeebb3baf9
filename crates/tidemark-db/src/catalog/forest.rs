//! Parent/child forest of tracked tables.
//!
//! Raw ingested tables are roots. Tables derived by flattening nested JSON
//! hang below the table they were derived from. Deletes and truncates fan
//! out along these edges.

use std::collections::{BTreeMap, BTreeSet};

use tidemark_core::{Error, Result, TableId};

/// Catalog record of one tracked table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Table was derived by the rewrite pass.
    pub transformed: bool,
    /// Table this one was derived from.
    pub parent: Option<TableId>,
    /// Tables derived from this one.
    pub children: BTreeSet<TableId>,
    /// Source that created the table.
    pub source: String,
}

/// Explicit DAG of [`TableEntry`] keyed by [`TableId`], kept acyclic.
#[derive(Debug, Clone, Default)]
pub struct TableForest {
    entries: BTreeMap<TableId, TableEntry>,
}

impl TableForest {
    /// Creates an empty forest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `table` is tracked.
    #[must_use]
    pub fn contains(&self, table: &TableId) -> bool {
        self.entries.contains_key(table)
    }

    /// Entry of `table`.
    #[must_use]
    pub fn get(&self, table: &TableId) -> Option<&TableEntry> {
        self.entries.get(table)
    }

    /// Number of tracked tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no table is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracked tables in `(schema, table)` order.
    pub fn tables(&self) -> impl Iterator<Item = &TableId> {
        self.entries.keys()
    }

    /// Checks that `table` can be added below `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] if the parent is unknown or the edge
    /// would close a cycle.
    pub fn validate(&self, table: &TableId, parent: Option<&TableId>) -> Result<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        if parent == table {
            return Err(Error::Catalog(format!("{table} cannot be its own parent")));
        }
        if !self.entries.contains_key(parent) {
            return Err(Error::Catalog(format!(
                "parent {parent} of {table} is not tracked"
            )));
        }
        let mut cursor = Some(parent);
        while let Some(t) = cursor {
            if t == table {
                return Err(Error::Catalog(format!(
                    "adding {table} below {parent} would create a cycle"
                )));
            }
            cursor = self.entries.get(t).and_then(|e| e.parent.as_ref());
        }
        Ok(())
    }

    /// Adds `table`. Adding an already tracked table is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] if [`validate`](Self::validate) fails.
    pub fn insert(&mut self, table: TableId, source: &str, parent: Option<TableId>) -> Result<()> {
        if self.entries.contains_key(&table) {
            return Ok(());
        }
        self.validate(&table, parent.as_ref())?;
        if let Some(p) = &parent {
            if let Some(entry) = self.entries.get_mut(p) {
                entry.children.insert(table.clone());
            }
        }
        self.entries.insert(
            table,
            TableEntry {
                transformed: parent.is_some(),
                parent,
                children: BTreeSet::new(),
                source: source.to_string(),
            },
        );
        Ok(())
    }

    /// Every table below `table`, parents before children.
    ///
    /// Depth-first; siblings are visited in `(schema, table)` order.
    #[must_use]
    pub fn descendants(&self, table: &TableId) -> Vec<TableId> {
        let mut out = Vec::new();
        let mut stack: Vec<&TableId> = match self.entries.get(table) {
            Some(e) => e.children.iter().rev().collect(),
            None => return out,
        };
        while let Some(t) = stack.pop() {
            out.push(t.clone());
            if let Some(e) = self.entries.get(t) {
                stack.extend(e.children.iter().rev());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> TableId {
        TableId::new("s", name)
    }

    fn forest() -> TableForest {
        let mut f = TableForest::new();
        f.insert(t("orders"), "src", None).unwrap();
        f.insert(t("orders_lines"), "src", Some(t("orders"))).unwrap();
        f.insert(t("orders_addr"), "src", Some(t("orders"))).unwrap();
        f.insert(t("orders_lines_tax"), "src", Some(t("orders_lines")))
            .unwrap();
        f.insert(t("customers"), "src", None).unwrap();
        f
    }

    #[test]
    fn test_descendants_depth_first() {
        let f = forest();
        assert_eq!(
            f.descendants(&t("orders")),
            vec![t("orders_addr"), t("orders_lines"), t("orders_lines_tax")]
        );
        assert!(f.descendants(&t("customers")).is_empty());
        assert!(f.descendants(&t("missing")).is_empty());
    }

    #[test]
    fn test_entry_flags() {
        let f = forest();
        let lines = f.get(&t("orders_lines")).unwrap();
        assert!(lines.transformed);
        assert_eq!(lines.parent, Some(t("orders")));
        assert!(!f.get(&t("orders")).unwrap().transformed);
        assert_eq!(f.len(), 5);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut f = TableForest::new();
        let err = f.insert(t("child"), "src", Some(t("nope"))).unwrap_err();
        assert!(matches!(err, Error::Catalog(_)));
        assert!(f.is_empty());
    }

    #[test]
    fn test_cycle_rejected() {
        let f = forest();
        assert!(f.validate(&t("orders"), Some(&t("orders_lines_tax"))).is_err());
        assert!(f.validate(&t("orders"), Some(&t("orders"))).is_err());
        assert!(f.validate(&t("new"), Some(&t("orders_lines_tax"))).is_ok());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut f = forest();
        f.insert(t("orders_lines"), "other", None).unwrap();
        assert_eq!(f.get(&t("orders_lines")).unwrap().source, "src");
        assert_eq!(f.get(&t("orders")).unwrap().children.len(), 2);
    }
}
