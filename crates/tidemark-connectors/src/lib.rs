//! # Tidemark Connectors
//!
//! Upstream change sources and the CDC envelope decoder that turns their
//! messages into commands.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Key/value connector configuration
pub mod config;

/// Change source trait, batch positions and the restart signal
pub mod connector;

/// Connector error types
pub mod error;

/// Change Data Capture envelope decoding
pub mod cdc;

/// Kafka change source
#[cfg(feature = "kafka")]
pub mod kafka;

/// In-memory change source for tests
pub mod testing;

pub use config::ConnectorConfig;
pub use connector::{
    BatchPositions, ChangeSource, PartitionOffset, PollLimits, RestartSignal, SourceFactory,
    SourceMessage,
};
pub use error::ConnectorError;
