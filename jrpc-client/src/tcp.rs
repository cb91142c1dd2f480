//! Persistent TCP client transport.

use crate::config::ClientConfig;
use crate::error::ClientError;
use async_trait::async_trait;
use bytes::Bytes;
use jrpc_protocol::{ClientTransport, FrameDecoder, FrameEncoder, FrameSource, TransportError, WireMode};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Client transport over one persistent TCP connection.
pub struct TcpClientTransport {
    addr: SocketAddr,
    wire_mode: WireMode,
    writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
    inbound: Mutex<Option<FrameSource>>,
    shutdown: CancellationToken,
}

impl TcpClientTransport {
    /// Connects to `addr`, bounded by the configured connect timeout.
    pub async fn connect(addr: SocketAddr, config: &ClientConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                TransportError::Other(format!(
                    "connect to {} timed out after {:?}",
                    addr, config.connect_timeout
                ))
            })?
            .map_err(TransportError::Io)?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        tracing::debug!("Connected to {}", addr);

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(config.inbound_capacity.max(1));
        let shutdown = CancellationToken::new();

        tokio::spawn(read_loop(
            reader,
            config.wire_mode,
            config.read_buffer_size,
            tx,
            shutdown.clone(),
        ));

        Ok(Self {
            addr,
            wire_mode: config.wire_mode,
            writer: Arc::new(tokio::sync::Mutex::new(Some(writer))),
            inbound: Mutex::new(Some(rx)),
            shutdown,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl ClientTransport for TcpClientTransport {
    async fn send(&self, cancel: &CancellationToken, frame: Bytes) -> Result<(), TransportError> {
        let encoded = FrameEncoder::encode(self.wire_mode, &frame)?;

        // Only waiting for the writer is cancellable. A started write runs in
        // its own task to completion, even if this future is dropped, so the
        // stream never carries a partial frame.
        let mut writer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = Arc::clone(&self.writer).lock_owned() => guard,
        };
        let addr = self.addr;
        let write = tokio::spawn(async move {
            let stream = writer.as_mut().ok_or(TransportError::Closed)?;
            stream.write_all(&encoded).await?;
            tracing::debug!("Sent {} bytes to {}", encoded.len(), addr);
            Ok::<_, TransportError>(())
        });
        write
            .await
            .map_err(|e| TransportError::Other(format!("write task failed: {}", e)))?
    }

    fn take_inbound(&self) -> Result<FrameSource, TransportError> {
        self.inbound.lock().take().ok_or(TransportError::InboundTaken)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            tracing::debug!("Closing connection to {}", self.addr);
            writer.shutdown().await?;
        }
        Ok(())
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    wire_mode: WireMode,
    buffer_size: usize,
    tx: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
) {
    let mut decoder = FrameDecoder::new(wire_mode);
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    tracing::debug!("Connection closed by server");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Read error: {}", e);
                    break;
                }
            },
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Protocol error from server, closing: {}", e);
                    return;
                }
            }
        }
    }
}
