//! Field type inference and value rendering.
//!
//! Connect types and Debezium logical type names decide the column type;
//! the value is rendered to the text form `PostgreSQL` accepts for it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveTime};
use serde_json::Value;

use tidemark_core::{ColumnType, DataType, Error, Result};

use super::envelope::FieldSchema;

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

// ── Logical type names ─────────────────────────────────────────────

const DBZ_DATE: &str = "io.debezium.time.Date";
const DBZ_TIME: &str = "io.debezium.time.Time";
const DBZ_MICRO_TIME: &str = "io.debezium.time.MicroTime";
const DBZ_NANO_TIME: &str = "io.debezium.time.NanoTime";
const DBZ_TIMESTAMP: &str = "io.debezium.time.Timestamp";
const DBZ_MICRO_TIMESTAMP: &str = "io.debezium.time.MicroTimestamp";
const DBZ_NANO_TIMESTAMP: &str = "io.debezium.time.NanoTimestamp";
const DBZ_ZONED_TIMESTAMP: &str = "io.debezium.time.ZonedTimestamp";
const DBZ_ZONED_TIME: &str = "io.debezium.time.ZonedTime";
const DBZ_JSON: &str = "io.debezium.data.Json";
const DBZ_UUID: &str = "io.debezium.data.Uuid";
const DBZ_VARIABLE_DECIMAL: &str = "io.debezium.data.VariableScaleDecimal";
const CONNECT_DECIMAL: &str = "org.apache.kafka.connect.data.Decimal";
const CONNECT_DATE: &str = "org.apache.kafka.connect.data.Date";
const CONNECT_TIME: &str = "org.apache.kafka.connect.data.Time";
const CONNECT_TIMESTAMP: &str = "org.apache.kafka.connect.data.Timestamp";

/// Inferred type and text form of one field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedValue {
    /// Column type implied by the value.
    pub ty: ColumnType,
    /// Text form, `None` for `NULL`.
    pub text: Option<String>,
}

/// Infers the type of `value` from its schema, or from the value itself
/// when the message carries no schema.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the value does not match its declared type.
pub fn typed_value(schema: Option<&FieldSchema>, value: &Value) -> Result<TypedValue> {
    match schema {
        Some(s) => from_schema(s, value),
        None => Ok(json_typed_value(value)),
    }
}

fn from_schema(schema: &FieldSchema, value: &Value) -> Result<TypedValue> {
    let ty = column_type(schema);
    if value.is_null() {
        let ty = if ty.data_type == DataType::Varchar {
            ColumnType::varchar(0)
        } else {
            ty
        };
        return Ok(TypedValue { ty, text: None });
    }

    let field = schema.field.as_deref().unwrap_or("?");
    let bad = |what: &str| Error::Parse(format!("field '{field}': expected {what}, got {value}"));

    let text = match schema.name.as_deref() {
        Some(DBZ_DATE | CONNECT_DATE) => {
            let days = value.as_i64().ok_or_else(|| bad("epoch days"))?;
            render_date(days).ok_or_else(|| bad("a valid date"))?
        }
        Some(DBZ_TIME | CONNECT_TIME) => {
            let ms = value.as_i64().ok_or_else(|| bad("milliseconds"))?;
            render_time(ms.saturating_mul(1_000_000)).ok_or_else(|| bad("a valid time"))?
        }
        Some(DBZ_MICRO_TIME) => {
            let us = value.as_i64().ok_or_else(|| bad("microseconds"))?;
            render_time(us.saturating_mul(1_000)).ok_or_else(|| bad("a valid time"))?
        }
        Some(DBZ_NANO_TIME) => {
            let ns = value.as_i64().ok_or_else(|| bad("nanoseconds"))?;
            render_time(ns).ok_or_else(|| bad("a valid time"))?
        }
        Some(DBZ_TIMESTAMP | CONNECT_TIMESTAMP) => {
            let ms = value.as_i64().ok_or_else(|| bad("epoch milliseconds"))?;
            render_timestamp(DateTime::from_timestamp_millis(ms)).ok_or_else(|| bad("a timestamp"))?
        }
        Some(DBZ_MICRO_TIMESTAMP) => {
            let us = value.as_i64().ok_or_else(|| bad("epoch microseconds"))?;
            render_timestamp(DateTime::from_timestamp_micros(us)).ok_or_else(|| bad("a timestamp"))?
        }
        Some(DBZ_NANO_TIMESTAMP) => {
            let ns = value.as_i64().ok_or_else(|| bad("epoch nanoseconds"))?;
            let secs = ns.div_euclid(1_000_000_000);
            let nanos = u32::try_from(ns.rem_euclid(1_000_000_000)).unwrap_or(0);
            render_timestamp(DateTime::from_timestamp(secs, nanos)).ok_or_else(|| bad("a timestamp"))?
        }
        Some(CONNECT_DECIMAL) => match value {
            Value::String(s) if schema.kind == "bytes" => {
                let scale = schema
                    .parameter("scale")
                    .and_then(|s| s.parse::<u32>().ok())
                    .unwrap_or(0);
                decode_decimal(s, scale).ok_or_else(|| bad("a base64 decimal"))?
            }
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return Err(bad("a decimal")),
        },
        Some(DBZ_VARIABLE_DECIMAL) => {
            let scale = value
                .get("scale")
                .and_then(Value::as_u64)
                .and_then(|s| u32::try_from(s).ok())
                .ok_or_else(|| bad("a decimal scale"))?;
            let digits = value
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| bad("decimal bytes"))?;
            decode_decimal(digits, scale).ok_or_else(|| bad("a base64 decimal"))?
        }
        _ => match value {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) | Value::Null => value.to_string(),
        },
    };

    let ty = refine(ty, &text);
    Ok(TypedValue {
        ty,
        text: Some(text),
    })
}

/// Narrows a string-typed column to `uuid` when the value is one, and sizes
/// varchar columns to the value.
fn refine(ty: ColumnType, text: &str) -> ColumnType {
    if ty.data_type != DataType::Varchar {
        return ty;
    }
    if is_uuid(text) {
        return ColumnType::unsized_type(DataType::Uuid);
    }
    ColumnType::varchar(char_len(text))
}

/// Column type declared by a field schema.
#[must_use]
pub fn column_type(schema: &FieldSchema) -> ColumnType {
    let named = match schema.name.as_deref() {
        Some(DBZ_DATE | CONNECT_DATE) => Some(DataType::Date),
        Some(DBZ_TIME | DBZ_MICRO_TIME | DBZ_NANO_TIME | CONNECT_TIME) => Some(DataType::Time),
        Some(
            DBZ_TIMESTAMP | DBZ_MICRO_TIMESTAMP | DBZ_NANO_TIMESTAMP | CONNECT_TIMESTAMP,
        ) => Some(DataType::Timestamp),
        Some(DBZ_ZONED_TIMESTAMP) => Some(DataType::TimestampTz),
        Some(DBZ_ZONED_TIME) => Some(DataType::TimeTz),
        Some(DBZ_JSON) => Some(DataType::Json),
        Some(DBZ_UUID) => Some(DataType::Uuid),
        Some(CONNECT_DECIMAL | DBZ_VARIABLE_DECIMAL) => Some(DataType::Numeric),
        _ => None,
    };
    if let Some(t) = named {
        return ColumnType::unsized_type(t);
    }
    match schema.kind.as_str() {
        "boolean" => ColumnType::unsized_type(DataType::Boolean),
        "int8" | "int16" => ColumnType::new(DataType::Integer, 2),
        "int32" => ColumnType::new(DataType::Integer, 4),
        "int64" => ColumnType::new(DataType::Integer, 8),
        "float" | "float32" => ColumnType::new(DataType::Float, 4),
        "double" | "float64" => ColumnType::new(DataType::Float, 8),
        "struct" | "array" | "map" => ColumnType::unsized_type(DataType::Json),
        _ => ColumnType::varchar(0),
    }
}

/// Infers type and text of a schemaless JSON value.
///
/// Integers are `Integer(8)`, other numbers `Float(8)`, strings go through
/// the same UUID detection as schema-typed strings, and objects and arrays
/// are `Json`.
#[must_use]
pub fn json_typed_value(value: &Value) -> TypedValue {
    match value {
        Value::Null => TypedValue {
            ty: ColumnType::varchar(0),
            text: None,
        },
        Value::Bool(b) => TypedValue {
            ty: ColumnType::unsized_type(DataType::Boolean),
            text: Some(b.to_string()),
        },
        Value::Number(n) => {
            let ty = if n.is_i64() || n.is_u64() {
                ColumnType::new(DataType::Integer, 8)
            } else {
                ColumnType::new(DataType::Float, 8)
            };
            TypedValue {
                ty,
                text: Some(n.to_string()),
            }
        }
        Value::String(s) => TypedValue {
            ty: refine(ColumnType::varchar(0), s),
            text: Some(s.clone()),
        },
        Value::Array(_) | Value::Object(_) => TypedValue {
            ty: ColumnType::unsized_type(DataType::Json),
            text: Some(value.to_string()),
        },
    }
}

// ── Rendering ──────────────────────────────────────────────────────

fn char_len(s: &str) -> i64 {
    i64::try_from(s.chars().count()).unwrap_or(i64::MAX)
}

/// Returns `true` for the canonical hyphenated UUID form.
#[must_use]
pub fn is_uuid(s: &str) -> bool {
    s.len() == 36 && uuid::Uuid::try_parse(s).is_ok()
}

fn render_date(days: i64) -> Option<String> {
    let days = i32::try_from(days).ok()?;
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn render_time(nanos_of_day: i64) -> Option<String> {
    let secs = u32::try_from(nanos_of_day.div_euclid(1_000_000_000)).ok()?;
    let nanos = u32::try_from(nanos_of_day.rem_euclid(1_000_000_000)).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .map(|t| t.format("%H:%M:%S%.f").to_string())
}

fn render_timestamp(ts: Option<DateTime<chrono::Utc>>) -> Option<String> {
    ts.map(|t| t.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
}

/// Decodes a Connect decimal: base64 of a big-endian two's complement
/// unscaled integer of any length.
#[must_use]
pub fn decode_decimal(encoded: &str, scale: u32) -> Option<String> {
    let bytes = BASE64.decode(encoded).ok()?;
    let first = *bytes.first()?;
    let negative = first & 0x80 != 0;
    let magnitude = if negative {
        twos_complement_magnitude(&bytes)
    } else {
        bytes
    };
    Some(format_scaled(negative, &magnitude_digits(magnitude), scale))
}

/// Magnitude of a negative big-endian two's complement integer.
fn twos_complement_magnitude(bytes: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = bytes.iter().map(|b| !b).collect();
    for byte in out.iter_mut().rev() {
        let (sum, carry) = byte.overflowing_add(1);
        *byte = sum;
        if !carry {
            break;
        }
    }
    out
}

/// Decimal digits of a big-endian unsigned integer.
fn magnitude_digits(mut value: Vec<u8>) -> String {
    const CHUNK: u32 = 1_000_000_000;

    let mut chunks: Vec<u32> = Vec::new();
    loop {
        let start = value.iter().position(|b| *b != 0).unwrap_or(value.len());
        value.drain(..start);
        if value.is_empty() {
            break;
        }
        let mut rem: u64 = 0;
        for byte in &mut value {
            let acc = (rem << 8) | u64::from(*byte);
            // acc < CHUNK * 256, so the quotient fits a byte
            *byte = u8::try_from(acc / u64::from(CHUNK)).unwrap_or(u8::MAX);
            rem = acc % u64::from(CHUNK);
        }
        chunks.push(u32::try_from(rem).unwrap_or(0));
    }

    let Some((most, rest)) = chunks.split_last() else {
        return "0".to_string();
    };
    let mut digits = most.to_string();
    for chunk in rest.iter().rev() {
        digits.push_str(&format!("{chunk:09}"));
    }
    digits
}

fn format_scaled(negative: bool, digits: &str, scale: u32) -> String {
    let sign = if negative && digits != "0" { "-" } else { "" };
    let scale = scale as usize;
    if scale == 0 {
        return format!("{sign}{digits}");
    }
    let padded = if digits.len() <= scale {
        format!("{}{digits}", "0".repeat(scale - digits.len() + 1))
    } else {
        digits.to_string()
    };
    let (int, frac) = padded.split_at(padded.len() - scale);
    format!("{sign}{int}.{frac}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(kind: &str, name: Option<&str>) -> FieldSchema {
        FieldSchema {
            kind: kind.into(),
            name: name.map(String::from),
            field: Some("f".into()),
            ..FieldSchema::default()
        }
    }

    #[test]
    fn test_integer_sizes() {
        let v = typed_value(Some(&schema("int16", None)), &json!(7)).unwrap();
        assert_eq!(v.ty, ColumnType::new(DataType::Integer, 2));
        let v = typed_value(Some(&schema("int64", None)), &json!(7)).unwrap();
        assert_eq!(v.ty, ColumnType::new(DataType::Integer, 8));
        assert_eq!(v.text.as_deref(), Some("7"));
    }

    #[test]
    fn test_micro_timestamp() {
        let v = typed_value(
            Some(&schema("int64", Some(DBZ_MICRO_TIMESTAMP))),
            &json!(1_700_000_000_123_456_i64),
        )
        .unwrap();
        assert_eq!(v.ty.data_type, DataType::Timestamp);
        assert_eq!(v.text.as_deref(), Some("2023-11-14 22:13:20.123456"));
    }

    #[test]
    fn test_date_and_time() {
        let v = typed_value(Some(&schema("int32", Some(DBZ_DATE))), &json!(19_000)).unwrap();
        assert_eq!(v.text.as_deref(), Some("2022-01-08"));
        let v = typed_value(
            Some(&schema("int64", Some(DBZ_MICRO_TIME))),
            &json!(3_723_000_000_i64),
        )
        .unwrap();
        assert_eq!(v.ty.data_type, DataType::Time);
        assert_eq!(v.text.as_deref(), Some("01:02:03"));
    }

    #[test]
    fn test_zoned_timestamp_passes_through() {
        let v = typed_value(
            Some(&schema("string", Some(DBZ_ZONED_TIMESTAMP))),
            &json!("2024-03-01T10:00:00Z"),
        )
        .unwrap();
        assert_eq!(v.ty.data_type, DataType::TimestampTz);
        assert_eq!(v.text.as_deref(), Some("2024-03-01T10:00:00Z"));
    }

    #[test]
    fn test_string_uuid_detection() {
        let id = "0b8e3f4c-8a6e-4f0e-9c11-2f3a4b5c6d7e";
        let v = typed_value(Some(&schema("string", None)), &json!(id)).unwrap();
        assert_eq!(v.ty.data_type, DataType::Uuid);
        let v = typed_value(Some(&schema("string", None)), &json!("hello")).unwrap();
        assert_eq!(v.ty, ColumnType::varchar(5));
    }

    #[test]
    fn test_null_string_is_empty_varchar() {
        let v = typed_value(Some(&schema("string", None)), &Value::Null).unwrap();
        assert_eq!(v.ty, ColumnType::varchar(0));
        assert!(v.text.is_none());
        let v = typed_value(Some(&schema("int32", None)), &Value::Null).unwrap();
        assert_eq!(v.ty, ColumnType::new(DataType::Integer, 4));
    }

    #[test]
    fn test_decimal() {
        let mut s = schema("bytes", Some(CONNECT_DECIMAL));
        s.parameters.insert("scale".into(), json!("2"));
        // 12345 = 0x3039
        let v = typed_value(Some(&s), &json!("MDk=")).unwrap();
        assert_eq!(v.ty.data_type, DataType::Numeric);
        assert_eq!(v.text.as_deref(), Some("123.45"));
        // -1 = 0xFF
        assert_eq!(decode_decimal("/w==", 3).as_deref(), Some("-0.001"));
    }

    #[test]
    fn test_decimal_wider_than_i128() {
        let mut s = schema("bytes", Some(CONNECT_DECIMAL));
        s.parameters.insert("scale".into(), json!("2"));
        // 19 bytes, 45 digits
        let v = typed_value(Some(&s), &json!("BYk25SetZ57DqpLvW3x08eLfeQ==")).unwrap();
        assert_eq!(v.ty.data_type, DataType::Numeric);
        assert_eq!(
            v.text.as_deref(),
            Some("1234567890123456789012345678901234567890123.45")
        );
        assert_eq!(
            decode_decimal("+nbJGthSmGE8VW0QpIOLDh0ghw==", 2).as_deref(),
            Some("-1234567890123456789012345678901234567890123.45")
        );
    }

    #[test]
    fn test_decimal_around_128_bits() {
        assert_eq!(
            decode_decimal("AQAAAAAAAAAAAAAAAAAAAAA=", 0).as_deref(),
            Some("340282366920938463463374607431768211456")
        );
        assert_eq!(
            decode_decimal("/3////////////////////8=", 0).as_deref(),
            Some("-170141183460469231731687303715884105729")
        );
        assert_eq!(decode_decimal("AAAA", 4).as_deref(), Some("0.0000"));
        assert_eq!(decode_decimal("", 0), None);
    }

    #[test]
    fn test_struct_is_json() {
        let v = typed_value(Some(&schema("struct", None)), &json!({"a": 1})).unwrap();
        assert_eq!(v.ty.data_type, DataType::Json);
        assert_eq!(v.text.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_schemaless_inference() {
        assert_eq!(
            typed_value(None, &json!(1.5)).unwrap().ty,
            ColumnType::new(DataType::Float, 8)
        );
        assert_eq!(
            typed_value(None, &json!(true)).unwrap().ty.data_type,
            DataType::Boolean
        );
        assert_eq!(
            typed_value(None, &json!([1, 2])).unwrap().ty.data_type,
            DataType::Json
        );
    }

    #[test]
    fn test_type_mismatch_is_parse_error() {
        let r = typed_value(Some(&schema("int32", Some(DBZ_DATE))), &json!("soon"));
        assert!(matches!(r, Err(Error::Parse(_))));
    }
}
