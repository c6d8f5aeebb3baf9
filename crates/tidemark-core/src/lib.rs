//! # Tidemark Core
//!
//! Data model and planning primitives shared by the Tidemark crates:
//!
//! - [`types`]: table identifiers and the logical column type lattice
//! - [`command`]: typed row-level change commands with pre-rendered literals
//! - [`delta`]: the schema delta engine deciding column additions and widenings
//! - [`store`]: the minimal relational store capability and its `PostgreSQL`
//!   implementation
//! - [`error`]: the error taxonomy threaded through every layer

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod delta;
pub mod error;
pub mod sql;
pub mod store;
pub mod testing;
pub mod types;

pub use command::{Command, CommandColumn, CommandList, Op};
pub use delta::{compute_delta, incoming_columns, DeltaColumnSchema, IncomingColumn};
pub use error::{Error, Result};
pub use store::{Row, Store, Transaction};
pub use types::{ColumnType, DataType, TableId};
