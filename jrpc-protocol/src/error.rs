//! Protocol error types and JSON-RPC error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or envelope handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes: expected 'JRPC', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("invalid frame flags: {0:#x}")]
    InvalidFlags(u8),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// Errors raised by a transport while moving frames.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport closed")]
    Closed,

    #[error("send cancelled")]
    Cancelled,

    #[error("inbound frame source already taken")]
    InboundTaken,

    #[error("HTTP status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("{0}")]
    Other(String),
}

/// JSON-RPC error codes.
///
/// The reserved protocol codes are fixed by JSON-RPC 2.0; anything else is
/// carried through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError,
    Other(i64),
}

impl ErrorCode {
    /// Returns the numeric wire value.
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError => -32000,
            ErrorCode::Other(code) => *code,
        }
    }

    /// Returns the canonical message for reserved codes.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerError => "Server error",
            ErrorCode::Other(_) => "Application error",
        }
    }

    /// Returns whether this code lies in the range reserved for protocol errors.
    pub fn is_reserved(&self) -> bool {
        self.code() <= -32000
    }

    /// Returns a stable label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::Other(_) => "OTHER",
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32000 => ErrorCode::ServerError,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_codes() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(ErrorCode::InvalidParams.code(), -32602);
        assert_eq!(ErrorCode::InternalError.code(), -32603);
        assert_eq!(ErrorCode::ServerError.code(), -32000);

        assert!(ErrorCode::ServerError.is_reserved());
        assert!(!ErrorCode::Other(42).is_reserved());
    }

    #[test]
    fn test_error_code_from_i64() {
        assert_eq!(ErrorCode::from(-32601), ErrorCode::MethodNotFound);
        assert_eq!(ErrorCode::from(-32000), ErrorCode::ServerError);
        assert_eq!(ErrorCode::from(7), ErrorCode::Other(7));
        assert_eq!(ErrorCode::from(-32050), ErrorCode::Other(-32050));
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::InvalidParams).unwrap();
        assert_eq!(json, "-32602");

        let parsed: ErrorCode = serde_json::from_str("-32700").unwrap();
        assert_eq!(parsed, ErrorCode::ParseError);

        let parsed: ErrorCode = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, ErrorCode::Other(12));
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            ErrorCode::MethodNotFound.to_string(),
            "Method not found (-32601)"
        );
        assert_eq!(ErrorCode::Other(3).to_string(), "Application error (3)");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidMagic(*b"XXXX");
        assert!(err.to_string().contains("magic"));

        let err = ProtocolError::UnsupportedVersion(9);
        assert!(err.to_string().contains('9'));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::CrcMismatch {
            expected: 0xABC,
            actual: 0xDEF,
        };
        let msg = err.to_string();
        assert!(msg.contains("abc") || msg.contains("ABC"));

        let err = ProtocolError::InvalidEnvelope("missing method".to_string());
        assert!(err.to_string().contains("missing method"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Http {
            status: 503,
            body: "server closed".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP status 503: server closed");
        assert_eq!(TransportError::Cancelled.to_string(), "send cancelled");
    }
}
