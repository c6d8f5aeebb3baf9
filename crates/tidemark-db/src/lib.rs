//! # Tidemark DB
//!
//! Applies CDC change streams to a bitemporal `PostgreSQL` store whose
//! schema follows the source:
//!
//! - [`catalog`]: tracked tables, columns, indexes, partitions, sources and
//!   runtime parameters, mirrored in memory
//! - [`exec`]: run partitioning and transactional bitemporal writes
//! - [`rewrite`]: JSON flattening into derived tables
//! - [`sync`]: resynchronization windows (`sync` / `end_sync`)
//! - [`pipeline`]: the stream coordinator and its consumer tasks
//! - [`config`]: process configuration for the binary

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod exec;
pub mod pipeline;
pub mod rewrite;
pub mod sync;

pub use catalog::{Catalog, SourceEntry, SyncMode};
pub use config::DbConfig;
pub use exec::{ExecStats, Executor};
pub use pipeline::{PipelineConfig, StreamCoordinator};
pub use rewrite::JsonRewriter;
pub use sync::{EndSyncReport, SyncControl};
