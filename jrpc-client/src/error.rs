//! Client error types.

use jrpc_protocol::{ErrorCode, ErrorObject, ProtocolError, TransportError};
use thiserror::Error;

/// Client errors.
///
/// `Timeout`, `Cancelled` and `Closed` are raised locally and never carry a
/// server error object; `Rpc` is the error a server answered with.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request {id} timed out")]
    Timeout { id: u64 },

    #[error("request {id} cancelled")]
    Cancelled { id: u64 },

    #[error("client closed")]
    Closed,

    #[error("{0}")]
    Rpc(ErrorObject),
}

impl ClientError {
    /// Returns the server's error code, if the server answered with an error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Rpc(obj) => Some(obj.code),
            _ => None,
        }
    }

    pub fn is_method_not_found(&self) -> bool {
        self.code() == Some(ErrorCode::MethodNotFound)
    }

    /// Returns the server's error object, if any.
    pub fn error_object(&self) -> Option<&ErrorObject> {
        match self {
            ClientError::Rpc(obj) => Some(obj),
            _ => None,
        }
    }
}

impl From<ErrorObject> for ClientError {
    fn from(obj: ErrorObject) -> Self {
        ClientError::Rpc(obj)
    }
}
