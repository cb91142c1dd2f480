//! # jrpc-server
//!
//! Server runtime for jrpc.
//!
//! This crate provides:
//! - A method registry binding names to typed async handlers
//! - Positional parameter binding and result packing
//! - Envelope dispatch with per-call timeouts and cancellation
//! - A runtime that serves any frame transport concurrently
//! - Persistent TCP, WebSocket and HTTP request/response transports
//! - Prometheus metrics

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod tcp;
pub mod ws;

pub use config::{
    Config, ConfigError, DispatchConfig, HttpConfig, MetricsConfig, NetworkConfig, WsConfig,
};
pub use dispatch::{CallContext, Dispatched, Dispatcher};
pub use error::ServerError;
pub use handler::{
    FromParam, Handler, HandlerFuture, HandlerResult, IntoOutputs, Json, OutputDescriptor, ParamDescriptor,
    ParamKind,
};
pub use http::HttpServerTransport;
pub use metrics::{run_metrics_server, Metrics};
pub use registry::{CallSite, Registry, Service};
pub use server::{Server, ServerConfig, ServerStats};
pub use tcp::{TcpServerTransport, TcpTransportConfig};
pub use ws::WsServerTransport;
