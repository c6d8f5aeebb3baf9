//! JSON flattening into derived tables.
//!
//! A `Json` column of a root table can be mapped to a derived table with a
//! rule `(table, column, "$") -> target`. Each merge then also writes the
//! object's scalar fields, keyed by the root's primary key, into
//! `schema.target`. Nested objects are flattened the same way when a rule
//! exists for their path (`"$.field"`, `"$.field.inner"`, ...).

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use tidemark_connectors::cdc::debezium::json_typed_value;
use tidemark_core::types::is_reserved_column;
use tidemark_core::{Command, CommandColumn, DataType, Op, TableId};

use crate::catalog::Catalog;

/// Expands merges with mapped `Json` columns into derived-table commands.
#[derive(Debug, Clone)]
pub struct JsonRewriter {
    catalog: Arc<Catalog>,
}

/// What one flattening step works on.
struct Scope<'a> {
    root: &'a Command,
    column: &'a str,
    key: &'a [CommandColumn],
}

impl JsonRewriter {
    /// Creates a rewriter reading rules from `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Returns `commands` with derived commands inserted right after the
    /// merge they came from. A no-op when `json_flatten` is off.
    #[must_use]
    pub fn rewrite(&self, commands: Vec<Command>) -> Vec<Command> {
        if !self.catalog.json_flatten() {
            return commands;
        }
        let mut out = Vec::with_capacity(commands.len());
        for cmd in commands {
            let mut derived = Vec::new();
            if cmd.op == Op::Merge && cmd.parent.is_none() {
                self.derive(&cmd, &mut derived);
            }
            out.push(cmd);
            out.append(&mut derived);
        }
        out
    }

    fn derive(&self, root: &Command, out: &mut Vec<Command>) {
        let key: Vec<CommandColumn> = root.primary_key().into_iter().cloned().collect();
        if key.is_empty() {
            return;
        }
        for col in root.columns.iter().filter(|c| c.data_type == DataType::Json) {
            let Some(target) = self.catalog.json_path_lookup(&root.table, &col.name, "$") else {
                continue;
            };
            let value = match col.raw.as_deref().map(serde_json::from_str::<Value>) {
                None => Value::Null,
                Some(Ok(v)) => v,
                Some(Err(e)) => {
                    warn!(table = %root.table, column = %col.name, error = %e, "unparsable json, not flattened");
                    continue;
                }
            };
            let scope = Scope {
                root,
                column: &col.name,
                key: &key,
            };
            self.flatten(&scope, &root.table, "$", &target, &value, out);
        }
    }

    fn flatten(
        &self,
        scope: &Scope<'_>,
        parent: &TableId,
        path: &str,
        target: &str,
        value: &Value,
        out: &mut Vec<Command>,
    ) {
        let table = TableId::new(scope.root.table.schema.clone(), target);
        let Value::Object(fields) = value else {
            debug!(%table, path, "mapped value is not an object, closing derived rows");
            out.push(derived_command(scope, Op::Delete, &table, parent));
            return;
        };

        let mut cmd = derived_command(scope, Op::Merge, &table, parent);
        let nested = self.collect_fields(scope, path, fields, &mut cmd);
        out.push(cmd);
        for (child_path, child_target, child) in nested {
            self.flatten(scope, &table, &child_path, &child_target, child, out);
        }
    }

    /// Adds the scalar fields of `fields` to `cmd`; returns the nested
    /// values that have their own rule.
    fn collect_fields<'v>(
        &self,
        scope: &Scope<'_>,
        path: &str,
        fields: &'v Map<String, Value>,
        cmd: &mut Command,
    ) -> Vec<(String, String, &'v Value)> {
        let mut nested = Vec::new();
        for (name, value) in fields {
            if is_reserved_column(name) || scope.key.iter().any(|k| k.name == *name) {
                continue;
            }
            let child_path = format!("{path}.{name}");
            if let Some(target) =
                self.catalog
                    .json_path_lookup(&scope.root.table, scope.column, &child_path)
            {
                nested.push((child_path, target, value));
                continue;
            }
            if value.is_null() {
                continue;
            }
            let typed = json_typed_value(value);
            cmd.columns
                .push(CommandColumn::new(name.clone(), typed.ty, typed.text));
        }
        nested
    }
}

fn derived_command(scope: &Scope<'_>, op: Op, table: &TableId, parent: &TableId) -> Command {
    let root = scope.root;
    let mut cmd = Command::new(op, table.clone(), root.source_timestamp);
    cmd.origin.clone_from(&root.origin);
    cmd.source.clone_from(&root.source);
    cmd.snapshot = root.snapshot;
    cmd.parent = Some(parent.clone());
    cmd.columns = scope.key.to_vec();
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tidemark_core::testing::RecordingStore;
    use tidemark_core::ColumnType;

    use crate::catalog::JSON_FLATTEN;

    fn order(doc: Option<&str>) -> Command {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let mut cmd = Command::new(Op::Merge, TableId::new("shop", "orders"), ts);
        cmd.source = "pg1".into();
        cmd.origin = "eu".into();
        cmd.columns = vec![
            CommandColumn::new("id", ColumnType::new(DataType::Integer, 8), Some("42".into()))
                .with_primary_key(1),
            CommandColumn::new(
                "doc",
                ColumnType::unsized_type(DataType::Json),
                doc.map(str::to_string),
            ),
        ];
        cmd
    }

    async fn rewriter() -> (JsonRewriter, Arc<Catalog>) {
        let catalog = Arc::new(Catalog::open(Arc::new(RecordingStore::new())).await.unwrap());
        let orders = TableId::new("shop", "orders");
        catalog
            .add_json_path_rule(&orders, "doc", "$", "orders_doc")
            .await
            .unwrap();
        catalog
            .add_json_path_rule(&orders, "doc", "$.shipping", "orders_shipping")
            .await
            .unwrap();
        (JsonRewriter::new(catalog.clone()), catalog)
    }

    #[tokio::test]
    async fn test_object_becomes_derived_merges() {
        let (rw, _) = rewriter().await;
        let doc = r#"{"id": 1, "status": "paid", "qty": 3, "note": null, "__x": 1,
                      "tags": ["a"], "shipping": {"city": "Oslo", "meta": {"k": 1}}}"#;
        let out = rw.rewrite(vec![order(Some(doc))]);
        assert_eq!(out.len(), 3);

        let doc_cmd = &out[1];
        assert_eq!(doc_cmd.table, TableId::new("shop", "orders_doc"));
        assert_eq!(doc_cmd.parent, Some(TableId::new("shop", "orders")));
        assert_eq!(doc_cmd.origin, "eu");
        let names: Vec<&str> = doc_cmd.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "qty", "status", "tags"]);
        assert_eq!(doc_cmd.column("id").unwrap().raw.as_deref(), Some("42"));
        assert_eq!(doc_cmd.column("tags").unwrap().data_type, DataType::Json);

        let ship = &out[2];
        assert_eq!(ship.table, TableId::new("shop", "orders_shipping"));
        assert_eq!(ship.parent, Some(TableId::new("shop", "orders_doc")));
        assert_eq!(ship.column("meta").unwrap().data_type, DataType::Json);
        assert_eq!(ship.primary_key().len(), 1);
    }

    #[tokio::test]
    async fn test_null_document_deletes_derived() {
        let (rw, _) = rewriter().await;
        let out = rw.rewrite(vec![order(None)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].op, Op::Delete);
        assert_eq!(out[1].table.table, "orders_doc");
        assert_eq!(out[1].columns.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_is_identity() {
        let (rw, catalog) = rewriter().await;
        catalog.set_config(JSON_FLATTEN, "false").await.unwrap();
        let input = vec![order(Some(r#"{"status": "paid"}"#))];
        assert_eq!(rw.rewrite(input.clone()), input);
    }

    #[tokio::test]
    async fn test_unmapped_and_derived_commands_untouched() {
        let (rw, _) = rewriter().await;
        let mut other = order(Some(r#"{"a": 1}"#));
        other.table = TableId::new("shop", "invoices");
        let mut derived = order(Some(r#"{"a": 1}"#));
        derived.parent = Some(TableId::new("shop", "x"));
        let out = rw.rewrite(vec![other, derived]);
        assert_eq!(out.len(), 2);
    }
}
