//! # jrpc-protocol
//!
//! Wire protocol for jrpc, a JSON-RPC 2.0 runtime.
//!
//! This crate provides:
//! - Request/Notification/Response envelope types and validation
//! - JSON-RPC error objects and reserved error codes
//! - Binary framing with length prefix and CRC32C validation
//! - Newline-delimited JSON framing
//! - The transport contract shared by clients and servers
//! - An in-memory transport pair

pub mod codec;
pub mod error;
pub mod frame;
pub mod memory;
pub mod message;
pub mod transport;

pub use codec::{FrameDecoder, FrameEncoder, WireMode};
pub use error::{ErrorCode, ProtocolError, TransportError};
pub use frame::{Frame, FrameFlags, FRAME_HEADER_SIZE, MAGIC};
pub use memory::{pair as memory_pair, MemoryClientTransport, MemoryServerTransport};
pub use message::{
    BatchResponse, EnvelopeError, ErrorObject, Id, Incoming, Notification, Outcome, Request,
    Response,
};
pub use transport::{
    send_or_cancel, ClientTransport, FrameSource, InboundFrame, ResponseWriter, ServerTransport,
};

/// JSON-RPC protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Binary frame format version supported by this implementation.
pub const FRAME_VERSION: u8 = 1;

/// Default port for jrpc servers.
pub const DEFAULT_PORT: u16 = 7410;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
