//! # jrpc-client
//!
//! Client library for jrpc.
//!
//! This crate provides:
//! - Concurrent calls over one transport, correlated by request id
//! - Per-call timeouts and cancellation
//! - Fire-and-forget notifications
//! - Persistent TCP and WebSocket transports, and an HTTP transport

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod pending;
pub mod tcp;
pub mod ws;

pub use client::{Client, IntoParams, PendingReply};
pub use config::ClientConfig;
pub use error::ClientError;
pub use http::HttpClientTransport;
pub use tcp::TcpClientTransport;
pub use ws::WsClientTransport;
