//! Debezium JSON envelope decoder.
//!
//! Converts one broker message into at most one [`Command`]:
//!
//! ```text
//! (key bytes, value bytes)
//!      │
//!      ▼
//! ┌──────────────────────────────────────────┐
//! │             DebeziumDecoder              │
//! │  ┌────────────┐   ┌──────────────────┐   │
//! │  │ Enveloped  │   │  SchemaRouting   │   │
//! │  │ (schema +  │   │ (origin, pass/   │   │
//! │  │  payload)  │   │  stop, prefixes) │   │
//! │  └────────────┘   └──────────────────┘   │
//! │         │                  │             │
//! │         ▼                  ▼             │
//! │  ┌────────────────────────────────────┐  │
//! │  │ typed_value: Connect type + logical│  │
//! │  │ name → ColumnType + rendered text  │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//!      │
//!      ▼
//!  Command { op, table, origin, columns[] }
//! ```
//!
//! Tombstones and filtered schemas decode to `None`; structurally invalid
//! envelopes are [`Error::Parse`](tidemark_core::Error::Parse).
//!
//! [`Command`]: tidemark_core::Command

mod decoder;
mod envelope;
mod filter;
mod values;

pub use decoder::{DebeziumDecoder, DecoderConfig};
pub use envelope::{Enveloped, FieldSchema, SourceInfo};
pub use filter::{Route, SchemaRouting};
pub use values::{
    column_type, decode_decimal, is_uuid, json_typed_value, typed_value, TypedValue,
};
