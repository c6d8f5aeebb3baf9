//! Debezium envelope structures.
//!
//! With the JSON converter's schemas enabled every message is
//! `{"schema": ..., "payload": ...}`; without them the payload is the whole
//! message and types are inferred from JSON values alone.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use tidemark_core::{Error, Result};

/// Kafka Connect schema of one field or struct.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FieldSchema {
    /// Connect type: `int32`, `string`, `struct`, ...
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Logical type name such as `io.debezium.time.MicroTimestamp`.
    #[serde(default)]
    pub name: Option<String>,
    /// Field name within the enclosing struct.
    #[serde(default)]
    pub field: Option<String>,
    /// Whether the field may be `null`.
    #[serde(default)]
    pub optional: bool,
    /// Struct members.
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    /// Logical type parameters, e.g. decimal `scale`.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

impl FieldSchema {
    /// Looks up a struct member by field name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.field.as_deref() == Some(name))
    }

    /// String form of a parameter.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<String> {
        self.parameters.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// A message split into its schema and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Enveloped {
    /// Schema, if the converter embedded one.
    pub schema: Option<FieldSchema>,
    /// Payload value.
    pub payload: Value,
}

impl Enveloped {
    /// Parses message bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the bytes are not JSON or the schema is
    /// malformed.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::Parse(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    fn from_value(mut value: Value) -> Result<Self> {
        let wrapped = value
            .as_object()
            .is_some_and(|o| o.contains_key("payload") && o.contains_key("schema"));
        if !wrapped {
            return Ok(Self {
                schema: None,
                payload: value,
            });
        }
        let schema = match value.get_mut("schema").map(Value::take) {
            Some(Value::Null) | None => None,
            Some(s) => Some(
                serde_json::from_value(s)
                    .map_err(|e| Error::Parse(format!("invalid schema: {e}")))?,
            ),
        };
        let payload = value.get_mut("payload").map(Value::take).unwrap_or_default();
        Ok(Self { schema, payload })
    }

    /// Schema of a top-level payload member.
    #[must_use]
    pub fn member_schema(&self, name: &str) -> Option<&FieldSchema> {
        self.schema.as_ref().and_then(|s| s.member(name))
    }
}

/// Fields of the `source` block that routing needs.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SourceInfo {
    /// Upstream database name.
    #[serde(default)]
    pub db: Option<String>,
    /// Upstream schema name; absent for `MySQL`.
    #[serde(default)]
    pub schema: Option<String>,
    /// Upstream table name.
    #[serde(default)]
    pub table: Option<String>,
    /// Snapshot marker: `true`, `first`, `last`, `incremental` or `false`.
    #[serde(default)]
    pub snapshot: Option<Value>,
    /// Time of the change upstream, milliseconds since the epoch.
    #[serde(default)]
    pub ts_ms: Option<i64>,
}

impl SourceInfo {
    /// Returns `true` if the event came from a snapshot.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        match &self.snapshot {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty() && s != "false",
            _ => false,
        }
    }

    /// Schema name used for routing: `schema`, falling back to `db`.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.schema.as_deref().or(self.db.as_deref())
    }
}
