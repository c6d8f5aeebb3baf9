//! Connector error types.

use thiserror::Error;

/// Errors raised by change sources and their configuration.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A required configuration key is missing.
    #[error("missing config: {0}")]
    MissingConfig(String),

    /// A configuration value is invalid.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Could not connect to or subscribe at the broker.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Reading from the broker failed.
    #[error("read error: {0}")]
    ReadError(String),

    /// Committing or seeking offsets failed.
    #[error("offset error: {0}")]
    OffsetError(String),

    /// The source was used after `close()`.
    #[error("source closed")]
    Closed,
}

impl From<ConnectorError> for tidemark_core::Error {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::MissingConfig(_) | ConnectorError::ConfigurationError(_) => {
                tidemark_core::Error::Config(err.to_string())
            }
            other => tidemark_core::Error::Source(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ConnectorError::MissingConfig("topics".into());
        assert_eq!(err.to_string(), "missing config: topics");
    }

    #[test]
    fn test_into_core_error() {
        let core: tidemark_core::Error = ConnectorError::MissingConfig("brokers".into()).into();
        assert!(matches!(core, tidemark_core::Error::Config(_)));

        let core: tidemark_core::Error = ConnectorError::ReadError("eof".into()).into();
        assert!(matches!(core, tidemark_core::Error::Source(ref m) if m.contains("eof")));
    }
}
