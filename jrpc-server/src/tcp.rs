//! Persistent TCP server transport.
//!
//! Each accepted connection carries many concurrent calls. Inbound frames
//! from every connection are merged into one source; each frame's writer
//! answers on the connection it arrived on, through a writer half shared by
//! all in-flight calls of that connection.

use crate::config::NetworkConfig;
use crate::error::ServerError;
use crate::metrics::Metrics;
use async_trait::async_trait;
use bytes::Bytes;
use jrpc_protocol::{
    FrameDecoder, FrameEncoder, InboundFrame, ResponseWriter, ServerTransport, TransportError,
    WireMode,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// TCP transport configuration.
#[derive(Clone)]
pub struct TcpTransportConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Envelope delimiting on the stream.
    pub wire_mode: WireMode,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connection timeout.
    pub idle_timeout: Option<Duration>,
    /// Capacity of the merged inbound queue.
    pub inbound_capacity: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for TcpTransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransportConfig")
            .field("bind_addr", &self.bind_addr)
            .field("wire_mode", &self.wire_mode)
            .field("max_connections", &self.max_connections)
            .field("idle_timeout", &self.idle_timeout)
            .field("inbound_capacity", &self.inbound_capacity)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl TcpTransportConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            wire_mode: WireMode::Framed,
            max_connections: 1000,
            idle_timeout: Some(Duration::from_secs(300)),
            inbound_capacity: 1024,
            metrics: None,
        }
    }

    /// Builds the transport configuration from the `network` config section.
    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            wire_mode: network.wire_mode,
            max_connections: network.max_connections,
            idle_timeout: network.idle_timeout(),
            ..Self::new(network.bind_addr)
        }
    }

    pub fn with_wire_mode(mut self, mode: WireMode) -> Self {
        self.wire_mode = mode;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Server transport accepting persistent TCP connections.
pub struct TcpServerTransport {
    local_addr: SocketAddr,
    inbound: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl TcpServerTransport {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(config: TcpTransportConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            "TCP transport listening on {} ({})",
            local_addr,
            config.wire_mode
        );

        let (tx, rx) = mpsc::channel(config.inbound_capacity.max(1));
        let shutdown = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));

        tokio::spawn(accept_loop(
            listener,
            config,
            tx,
            shutdown.clone(),
            Arc::clone(&active),
        ));

        Ok(Self {
            local_addr,
            inbound: Mutex::new(Some(rx)),
            shutdown,
            active,
        })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ServerTransport for TcpServerTransport {
    fn take_inbound(&self) -> Result<mpsc::Receiver<InboundFrame>, TransportError> {
        self.inbound.lock().take().ok_or(TransportError::InboundTaken)
    }

    async fn close(&self) -> Result<(), TransportError> {
        tracing::debug!("Closing TCP transport on {}", self.local_addr);
        self.shutdown.cancel();
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: TcpTransportConfig,
    tx: mpsc::Sender<InboundFrame>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if active.load(Ordering::Relaxed) >= config.max_connections {
                            tracing::warn!("Connection limit reached, rejecting {}", addr);
                            continue;
                        }

                        active.fetch_add(1, Ordering::Relaxed);
                        if let Some(ref metrics) = config.metrics {
                            metrics.connections_total.inc();
                            metrics.connections_active.inc();
                        }

                        let conn = Connection {
                            id: Uuid::new_v4(),
                            addr,
                            wire_mode: config.wire_mode,
                            idle_timeout: config.idle_timeout,
                            tx: tx.clone(),
                            shutdown: shutdown.clone(),
                        };
                        let active = Arc::clone(&active);
                        let metrics = config.metrics.clone();

                        tokio::spawn(async move {
                            let id = conn.id;
                            if let Err(e) = conn.run(stream).await {
                                tracing::debug!("[{}] Connection error: {}", id, e);
                            }

                            active.fetch_sub(1, Ordering::Relaxed);
                            if let Some(ref metrics) = metrics {
                                metrics.connections_active.dec();
                            }
                            tracing::info!("[{}] Client disconnected", id);
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("TCP transport shutting down");
                break;
            }
        }
    }
}

/// One accepted connection.
struct Connection {
    id: Uuid,
    addr: SocketAddr,
    wire_mode: WireMode,
    idle_timeout: Option<Duration>,
    tx: mpsc::Sender<InboundFrame>,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(self, stream: TcpStream) -> Result<(), ServerError> {
        tracing::info!("[{}] Client connected: {}", self.id, self.addr);
        stream.set_nodelay(true)?;

        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(tokio::sync::Mutex::new(writer));
        let mut decoder = FrameDecoder::new(self.wire_mode);
        let mut buf = [0u8; 8192];

        loop {
            let idle = async {
                match self.idle_timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by client", self.id);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::debug!("[{}] Received {} bytes", self.id, n);
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => return Err(ServerError::Io(e)),
                    }
                }
                _ = idle => {
                    tracing::debug!("[{}] Idle timeout", self.id);
                    return Ok(());
                }
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("[{}] Shutdown signal received", self.id);
                    return Ok(());
                }
            }

            while let Some(payload) = decoder.next_frame()? {
                let reply = Box::new(ConnectionWriter {
                    conn_id: self.id,
                    wire_mode: self.wire_mode,
                    writer: Arc::clone(&writer),
                });
                if self.tx.send(InboundFrame::new(payload, reply)).await.is_err() {
                    tracing::debug!("[{}] Inbound source dropped", self.id);
                    return Ok(());
                }
            }
        }
    }
}

/// Writes replies on the connection a frame arrived on.
struct ConnectionWriter {
    conn_id: Uuid,
    wire_mode: WireMode,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
}

#[async_trait]
impl ResponseWriter for ConnectionWriter {
    async fn write(self: Box<Self>, frame: Bytes) -> Result<(), TransportError> {
        let encoded = FrameEncoder::encode(self.wire_mode, &frame)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        tracing::debug!("[{}] Sent {} bytes", self.conn_id, encoded.len());
        Ok(())
    }
}
