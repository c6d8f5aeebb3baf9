//! Debezium envelope → [`Command`] decoder.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use tidemark_core::sql::sanitize_text;
use tidemark_core::types::is_reserved_column;
use tidemark_core::{Command, CommandColumn, Error, Op, Result, TableId};

use super::envelope::{Enveloped, FieldSchema, SourceInfo};
use super::filter::SchemaRouting;
use super::values::{typed_value, TypedValue};
use crate::connector::SourceMessage;

/// Routing settings of one source.
#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    /// Source name stamped on every command.
    pub source_name: String,
    /// Known origin tags, detected as `<origin>_` schema prefixes.
    pub origins: Vec<String>,
    /// Regular expressions; a schema must match one when non-empty.
    pub schema_pass_filter: Vec<String>,
    /// Regular expressions; a schema matching any is dropped.
    pub schema_stop_filter: Vec<String>,
    /// Prefix removed from schema names.
    pub trim_schema_prefix: Option<String>,
    /// Prefix prepended to schema names.
    pub add_schema_prefix: Option<String>,
}

/// Decodes Debezium JSON messages into commands.
#[derive(Debug)]
pub struct DebeziumDecoder {
    source_name: String,
    routing: SchemaRouting,
    /// Reserved-name columns already warned about.
    skipped: Mutex<HashSet<String>>,
}

impl DebeziumDecoder {
    /// Creates a decoder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a schema filter does not compile.
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        Ok(Self {
            source_name: config.source_name.clone(),
            routing: SchemaRouting::new(
                &config.origins,
                &config.schema_pass_filter,
                &config.schema_stop_filter,
                config.trim_schema_prefix.as_deref(),
                config.add_schema_prefix.as_deref(),
            )?,
            skipped: Mutex::new(HashSet::new()),
        })
    }

    /// Decodes one message.
    ///
    /// Returns `Ok(None)` for tombstones and for filtered schemas.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the envelope is structurally invalid.
    pub fn decode(&self, msg: &SourceMessage) -> Result<Option<Command>> {
        match self.decode_envelope(msg) {
            Err(e) if e.is_filter_reject() => {
                trace!(reason = %e, topic = %msg.topic, offset = msg.offset, "change event filtered");
                Ok(None)
            }
            other => other,
        }
    }

    fn decode_envelope(&self, msg: &SourceMessage) -> Result<Option<Command>> {
        let Some(bytes) = msg.value.as_deref().filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let env = Enveloped::parse(bytes)?;
        if env.payload.is_null() {
            return Ok(None);
        }
        let payload = env
            .payload
            .as_object()
            .ok_or_else(|| Error::Parse("payload is not an object".into()))?;

        let op_code = payload
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Parse("missing 'op'".into()))?;
        let op = match op_code {
            "c" | "r" | "u" => Op::Merge,
            "d" => Op::Delete,
            "t" => Op::Truncate,
            other => return Err(Error::Parse(format!("unknown op '{other}'"))),
        };

        let source: SourceInfo = payload
            .get("source")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::Parse(format!("invalid 'source': {e}")))?
            .ok_or_else(|| Error::Parse("missing 'source'".into()))?;
        let upstream = source
            .namespace()
            .ok_or_else(|| Error::Parse("'source' has neither 'schema' nor 'db'".into()))?;
        let table = source
            .table
            .clone()
            .ok_or_else(|| Error::Parse("'source' has no 'table'".into()))?;
        let route = self.routing.route(upstream)?;

        let ts_ms = source
            .ts_ms
            .or_else(|| payload.get("ts_ms").and_then(Value::as_i64));
        let timestamp = ts_ms
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        let mut cmd = Command::new(op, TableId::new(route.schema, table), timestamp);
        cmd.origin = route.origin;
        cmd.source.clone_from(&self.source_name);
        cmd.snapshot = op_code == "r" || source.is_snapshot();

        match op {
            Op::Merge => {
                let key = key_fields(msg)?;
                let after = payload
                    .get("after")
                    .and_then(Value::as_object)
                    .ok_or_else(|| Error::Parse("merge without 'after'".into()))?;
                cmd.columns = self.row_columns(env.member_schema("after"), after, &key, &cmd.table)?;
                check_key(&cmd, &key)?;
            }
            Op::Delete => {
                let key = key_fields(msg)?;
                cmd.columns = key
                    .into_iter()
                    .zip(1_u16..)
                    .map(|((name, value), rank)| column(name, value).with_primary_key(rank))
                    .collect();
                check_key_values(&cmd)?;
            }
            Op::Truncate => {}
        }
        Ok(Some(cmd))
    }

    fn row_columns(
        &self,
        schema: Option<&FieldSchema>,
        row: &Map<String, Value>,
        key: &[(String, TypedValue)],
        table: &TableId,
    ) -> Result<Vec<CommandColumn>> {
        let rank_of = |name: &str| {
            key.iter()
                .position(|(k, _)| k == name)
                .and_then(|p| u16::try_from(p + 1).ok())
                .unwrap_or(0)
        };

        let names: Vec<&str> = match schema {
            Some(s) if !s.fields.is_empty() => {
                s.fields.iter().filter_map(|f| f.field.as_deref()).collect()
            }
            _ => row.keys().map(String::as_str).collect(),
        };

        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            if is_reserved_column(name) {
                self.warn_skipped(table, name);
                continue;
            }
            let value = row.get(name).unwrap_or(&Value::Null);
            let typed = typed_value(schema.and_then(|s| s.member(name)), value)?;
            columns.push(column(name.to_string(), typed).with_primary_key(rank_of(name)));
        }
        Ok(columns)
    }

    fn warn_skipped(&self, table: &TableId, column: &str) {
        let key = format!("{table}.{column}");
        if self.skipped.lock().insert(key) {
            warn!(%table, column, "skipping column with reserved name");
        }
    }
}

fn column(name: String, typed: TypedValue) -> CommandColumn {
    CommandColumn::new(name, typed.ty, typed.text.as_deref().map(sanitize_text))
}

/// Key fields in key-schema order.
fn key_fields(msg: &SourceMessage) -> Result<Vec<(String, TypedValue)>> {
    let bytes = msg
        .key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::Parse("message has no key".into()))?;
    let env = Enveloped::parse(bytes)?;
    let payload = env
        .payload
        .as_object()
        .ok_or_else(|| Error::Parse("key payload is not an object".into()))?;

    let names: Vec<String> = match &env.schema {
        Some(s) if !s.fields.is_empty() => {
            s.fields.iter().filter_map(|f| f.field.clone()).collect()
        }
        _ => payload.keys().cloned().collect(),
    };
    if names.is_empty() {
        return Err(Error::Parse("key has no fields".into()));
    }
    names
        .into_iter()
        .map(|name| {
            if is_reserved_column(&name) {
                return Err(Error::Parse(format!("key column '{name}' uses a reserved name")));
            }
            let value = payload.get(&name).unwrap_or(&Value::Null);
            let schema = env.schema.as_ref().and_then(|s| s.member(&name));
            let typed = typed_value(schema, value)?;
            Ok((name, typed))
        })
        .collect()
}

fn check_key(cmd: &Command, key: &[(String, TypedValue)]) -> Result<()> {
    for (name, _) in key {
        if cmd.column(name).is_none() {
            return Err(Error::Parse(format!(
                "{}: key column '{name}' missing from row",
                cmd.table
            )));
        }
    }
    check_key_values(cmd)
}

fn check_key_values(cmd: &Command) -> Result<()> {
    match cmd.primary_key().into_iter().find(|c| c.is_null()) {
        Some(c) => Err(Error::Parse(format!(
            "{}: key column '{}' is null",
            cmd.table, c.name
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemark_core::{ColumnType, DataType};

    fn message(key: Option<Value>, value: Option<Value>) -> SourceMessage {
        SourceMessage {
            key: key.map(|k| k.to_string().into_bytes()),
            value: value.map(|v| v.to_string().into_bytes()),
            topic: "dbserver.public.orders".into(),
            partition: 0,
            offset: 1,
        }
    }

    fn key(id: &str) -> Value {
        json!({
            "schema": {"type": "struct", "fields": [{"type": "string", "optional": false, "field": "id"}]},
            "payload": {"id": id}
        })
    }

    fn envelope(op: &str, schema: &str, after: Value) -> Value {
        json!({
            "schema": {
                "type": "struct",
                "fields": [
                    {"type": "struct", "field": "before", "optional": true, "fields": []},
                    {"type": "struct", "field": "after", "optional": true, "fields": [
                        {"type": "string", "optional": false, "field": "id"},
                        {"type": "double", "optional": true, "field": "total"},
                        {"type": "string", "optional": true, "field": "note"},
                        {"type": "int64", "optional": true, "name": "io.debezium.time.MicroTimestamp", "field": "placed_at"}
                    ]},
                    {"type": "struct", "field": "source", "fields": []},
                    {"type": "string", "field": "op"},
                    {"type": "int64", "optional": true, "field": "ts_ms"}
                ]
            },
            "payload": {
                "before": null,
                "after": after,
                "source": {"db": "shop", "schema": schema, "table": "orders", "snapshot": "false", "ts_ms": 1_700_000_000_000_i64},
                "op": op,
                "ts_ms": 1_700_000_000_500_i64
            }
        })
    }

    const ID: &str = "0b8e3f4c-8a6e-4f0e-9c11-2f3a4b5c6d7e";

    fn decoder() -> DebeziumDecoder {
        DebeziumDecoder::new(&DecoderConfig {
            source_name: "src1".into(),
            origins: vec!["east".into()],
            schema_stop_filter: vec!["^audit$".into()],
            ..DecoderConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_decode_merge() {
        let after = json!({"id": ID, "total": 12.5, "note": "it's", "placed_at": 1_700_000_000_000_000_i64});
        let cmd = decoder()
            .decode(&message(Some(key(ID)), Some(envelope("c", "src", after))))
            .unwrap()
            .unwrap();

        assert_eq!(cmd.op, Op::Merge);
        assert_eq!(cmd.table, TableId::new("src", "orders"));
        assert_eq!(cmd.source, "src1");
        assert_eq!(cmd.origin, "");
        assert!(!cmd.snapshot);
        assert_eq!(cmd.source_timestamp.timestamp_millis(), 1_700_000_000_000);

        let names: Vec<&str> = cmd.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "total", "note", "placed_at"]);

        let id = cmd.column("id").unwrap();
        assert_eq!(id.data_type, DataType::Uuid);
        assert_eq!(id.primary_key, 1);
        let total = cmd.column("total").unwrap();
        assert_eq!(total.column_type(), ColumnType::new(DataType::Float, 8));
        assert_eq!(total.literal, "'12.5'");
        assert_eq!(total.primary_key, 0);
        assert_eq!(cmd.column("note").unwrap().literal, "'it''s'");
        assert_eq!(
            cmd.column("placed_at").unwrap().raw.as_deref(),
            Some("2023-11-14 22:13:20")
        );
    }

    #[test]
    fn test_nul_characters_are_stripped_from_raw_text() {
        let after = json!({"id": ID, "total": 1.0, "note": "a\u{0}b", "placed_at": null});
        let cmd = decoder()
            .decode(&message(Some(key(ID)), Some(envelope("c", "src", after))))
            .unwrap()
            .unwrap();
        let note = cmd.column("note").unwrap();
        assert_eq!(note.raw.as_deref(), Some("ab"));
        assert_eq!(note.literal, "'ab'");
    }

    #[test]
    fn test_decode_snapshot_read() {
        let after = json!({"id": ID, "total": 1.0, "note": null, "placed_at": null});
        let cmd = decoder()
            .decode(&message(Some(key(ID)), Some(envelope("r", "src", after))))
            .unwrap()
            .unwrap();
        assert!(cmd.snapshot);
        assert_eq!(cmd.column("note").unwrap().column_type(), ColumnType::varchar(0));
        assert_eq!(cmd.column("note").unwrap().literal, "NULL");
    }

    #[test]
    fn test_decode_delete_uses_key() {
        let mut env = envelope("d", "src", Value::Null);
        env["payload"]["before"] = json!({"id": ID, "total": 3.0});
        let cmd = decoder()
            .decode(&message(Some(key(ID)), Some(env)))
            .unwrap()
            .unwrap();
        assert_eq!(cmd.op, Op::Delete);
        assert_eq!(cmd.columns.len(), 1);
        assert_eq!(cmd.columns[0].name, "id");
        assert_eq!(cmd.columns[0].primary_key, 1);
    }

    #[test]
    fn test_decode_truncate() {
        let cmd = decoder()
            .decode(&message(None, Some(envelope("t", "src", Value::Null))))
            .unwrap()
            .unwrap();
        assert_eq!(cmd.op, Op::Truncate);
        assert!(cmd.columns.is_empty());
    }

    #[test]
    fn test_tombstone_is_dropped() {
        assert!(decoder().decode(&message(Some(key(ID)), None)).unwrap().is_none());
        let wrapped_null = json!({"schema": null, "payload": null});
        assert!(decoder()
            .decode(&message(Some(key(ID)), Some(wrapped_null)))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_filtered_schema_is_dropped() {
        let after = json!({"id": ID, "total": 1.0, "note": "x", "placed_at": null});
        let out = decoder()
            .decode(&message(Some(key(ID)), Some(envelope("c", "audit", after))))
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_origin_detection() {
        let after = json!({"id": ID, "total": 1.0, "note": "x", "placed_at": null});
        let cmd = decoder()
            .decode(&message(Some(key(ID)), Some(envelope("u", "east_src", after))))
            .unwrap()
            .unwrap();
        assert_eq!(cmd.origin, "east");
        assert_eq!(cmd.table.schema, "src");
    }

    #[test]
    fn test_structural_errors() {
        let d = decoder();
        let after = json!({"id": ID, "total": 1.0, "note": "x", "placed_at": null});

        let missing_key = message(None, Some(envelope("c", "src", after.clone())));
        assert!(matches!(d.decode(&missing_key), Err(Error::Parse(_))));

        let mut bad_op = envelope("x", "src", after.clone());
        bad_op["payload"]["op"] = json!("x");
        assert!(matches!(
            d.decode(&message(Some(key(ID)), Some(bad_op))),
            Err(Error::Parse(_))
        ));

        let mut no_source = envelope("c", "src", after);
        no_source["payload"]
            .as_object_mut()
            .unwrap()
            .remove("source");
        assert!(matches!(
            d.decode(&message(Some(key(ID)), Some(no_source))),
            Err(Error::Parse(_))
        ));

        let null_key = json!({"id": null, "total": 1.0, "note": "x", "placed_at": null});
        assert!(matches!(
            d.decode(&message(Some(key(ID)), Some(envelope("c", "src", null_key)))),
            Err(Error::Parse(_))
        ));

        let garbage = SourceMessage {
            key: None,
            value: Some(b"not json".to_vec()),
            topic: "t".into(),
            partition: 0,
            offset: 0,
        };
        assert!(matches!(d.decode(&garbage), Err(Error::Parse(_))));
    }

    #[test]
    fn test_reserved_columns_skipped() {
        let msg = SourceMessage {
            key: Some(br#"{"id": 1}"#.to_vec()),
            value: Some(
                json!({
                    "after": {"id": 1, "__start": "x", "name": "n"},
                    "source": {"schema": "s", "table": "t"},
                    "op": "c"
                })
                .to_string()
                .into_bytes(),
            ),
            topic: "t".into(),
            partition: 0,
            offset: 0,
        };
        let cmd = decoder().decode(&msg).unwrap().unwrap();
        assert!(cmd.column("__start").is_none());
        assert_eq!(cmd.column("id").unwrap().primary_key, 1);
        assert_eq!(
            cmd.column("id").unwrap().column_type(),
            ColumnType::new(DataType::Integer, 8)
        );
    }
}
