//! Error taxonomy shared by every layer of the ingestion pipeline.
//!
//! Each variant corresponds to one way a batch can fail and carries enough
//! context for the coordinator to decide between dropping an event,
//! retrying the batch, or stopping the process.

use thiserror::Error;

/// Result alias used throughout Tidemark.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while decoding, planning or applying change events.
#[derive(Debug, Error)]
pub enum Error {
    /// The change envelope is structurally invalid.
    #[error("parse error: {0}")]
    Parse(String),

    /// The event was excluded by a configured schema filter.
    ///
    /// Never surfaced to the coordinator: decoders translate it into
    /// "no command".
    #[error("filtered: {0}")]
    FilterReject(String),

    /// No safe widening exists for a column.
    #[error("schema conflict on {table}.{column}: {message}")]
    SchemaConflict {
        /// Qualified table name.
        table: String,
        /// Column name.
        column: String,
        /// What could not be reconciled.
        message: String,
    },

    /// A statement inside a run failed and the run was rolled back.
    #[error("transaction failed: {0}")]
    TransactionFailure(String),

    /// An internal invariant does not hold; the process must stop.
    #[error("fatal invariant violation: {0}")]
    FatalInvariantViolation(String),

    /// The relational store reported an error.
    #[error("store error [{code}]: {message}")]
    Store {
        /// SQLSTATE code, or `"-----"` when the failure has none.
        code: String,
        /// Store-provided message.
        message: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A catalog lookup or mutation was rejected.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// The upstream change source failed.
    #[error("source error: {0}")]
    Source(String),
}

impl Error {
    /// Creates a store error without a SQLSTATE code.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            code: "-----".to_string(),
            message: message.into(),
        }
    }

    /// Returns `true` if the process must stop rather than retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::FatalInvariantViolation(_) | Error::SchemaConflict { .. }
        )
    }

    /// Returns `true` if the error only means "skip this event".
    #[must_use]
    pub fn is_filter_reject(&self) -> bool {
        matches!(self, Error::FilterReject(_))
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => Error::Store {
                code: db.code().code().to_string(),
                message: db.message().to_string(),
            },
            None => Error::store(err.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Error::store(format!("connection pool: {err}"))
    }
}
