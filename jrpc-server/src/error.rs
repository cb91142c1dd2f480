//! Server error types.

use crate::config::ConfigError;
use jrpc_protocol::{ProtocolError, TransportError};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("method already registered: {0}")]
    DuplicateMethod(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("server shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::DuplicateMethod("echo".to_string());
        assert_eq!(err.to_string(), "method already registered: echo");

        let err = ServerError::from(TransportError::Closed);
        assert_eq!(err.to_string(), "transport error: transport closed");
    }
}
