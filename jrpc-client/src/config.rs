//! Client configuration.

use jrpc_protocol::WireMode;
use std::time::Duration;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default capacity of a transport's inbound frame queue.
pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-call timeout, unless overridden on the call.
    pub request_timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Envelope delimiting on persistent connections.
    pub wire_mode: WireMode,
    /// Extra headers sent with every HTTP request.
    pub headers: Vec<(String, String)>,
    /// Capacity of the inbound frame queue.
    pub inbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            wire_mode: WireMode::Framed,
            headers: Vec::new(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_wire_mode(mut self, mode: WireMode) -> Self {
        self.wire_mode = mode;
        self
    }

    /// Adds a header sent with every HTTP request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.wire_mode, WireMode::Framed);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_read_buffer_clamped() {
        let config = ClientConfig::new().with_read_buffer_size(10);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ClientConfig::new().with_read_buffer_size(usize::MAX);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);

        let config = ClientConfig::new().with_read_buffer_size(64 * 1024);
        assert_eq!(config.read_buffer_size, 64 * 1024);
    }

    #[test]
    fn test_headers_accumulate() {
        let config = ClientConfig::new()
            .with_header("Authorization", "Bearer abc")
            .with_header("X-Trace", "1");
        assert_eq!(config.headers.len(), 2);
        assert_eq!(config.headers[0].0, "Authorization");
    }
}
