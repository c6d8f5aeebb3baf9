//! CDC envelope decoding.
//!
//! Turns raw change messages into typed commands.
//!
//! # Supported Formats
//!
//! - **Debezium**: JSON envelopes with `before`/`after`/`source`/`op`,
//!   with or without embedded Kafka Connect schemas

/// Debezium JSON envelope decoder.
pub mod debezium;
