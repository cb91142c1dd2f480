//! WebSocket server transport.
//!
//! One envelope per text message; other message kinds are skipped. As with
//! the TCP transport, a connection carries many concurrent calls and every
//! reply goes back through a sink shared by that connection's calls.

use crate::error::ServerError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use jrpc_protocol::{InboundFrame, ResponseWriter, ServerTransport, TransportError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server transport accepting WebSocket connections.
pub struct WsServerTransport {
    local_addr: SocketAddr,
    inbound: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    shutdown: CancellationToken,
}

impl WsServerTransport {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("WebSocket transport listening on ws://{}", local_addr);

        let (tx, rx) = mpsc::channel(1024);
        let shutdown = CancellationToken::new();
        tokio::spawn(accept_loop(listener, tx, shutdown.clone()));

        Ok(Self {
            local_addr,
            inbound: Mutex::new(Some(rx)),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl ServerTransport for WsServerTransport {
    fn take_inbound(&self) -> Result<mpsc::Receiver<InboundFrame>, TransportError> {
        self.inbound.lock().take().ok_or(TransportError::InboundTaken)
    }

    async fn close(&self) -> Result<(), TransportError> {
        tracing::debug!("Closing WebSocket transport on {}", self.local_addr);
        self.shutdown.cancel();
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<InboundFrame>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tokio::spawn(serve_connection(stream, addr, tx.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        tracing::error!("WebSocket accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("WebSocket transport shutting down");
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    tx: mpsc::Sender<InboundFrame>,
    shutdown: CancellationToken,
) {
    let id = Uuid::new_v4();
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("[{}] WebSocket handshake with {} failed: {}", id, addr, e);
            return;
        }
    };
    tracing::info!("[{}] WebSocket client connected: {}", id, addr);

    let (sink, mut messages) = ws.split();
    let sink = Arc::new(tokio::sync::Mutex::new(sink));

    loop {
        let message = tokio::select! {
            message = messages.next() => message,
            _ = shutdown.cancelled() => {
                tracing::debug!("[{}] Shutdown signal received", id);
                break;
            }
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                let payload = Bytes::copy_from_slice(text.as_bytes());
                let reply = Box::new(WsWriter {
                    conn_id: id,
                    sink: Arc::clone(&sink),
                });
                if tx.send(InboundFrame::new(payload, reply)).await.is_err() {
                    tracing::debug!("[{}] Inbound source dropped", id);
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::debug!("[{}] Connection closed by client", id);
                break;
            }
            Some(Ok(other)) => {
                tracing::debug!("[{}] Skipping non-text message ({} bytes)", id, other.len());
            }
            Some(Err(e)) => {
                tracing::debug!("[{}] Read error: {}", id, e);
                break;
            }
        }
    }

    if let Err(e) = sink.lock().await.close().await {
        tracing::debug!("[{}] Close error: {}", id, e);
    }
    tracing::info!("[{}] WebSocket client disconnected", id);
}

/// Writes replies as text messages on the originating connection.
struct WsWriter {
    conn_id: Uuid,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
}

#[async_trait]
impl ResponseWriter for WsWriter {
    async fn write(self: Box<Self>, frame: Bytes) -> Result<(), TransportError> {
        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| TransportError::WebSocket(format!("reply is not UTF-8: {}", e)))?;
        let len = text.len();
        self.sink
            .lock()
            .await
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        tracing::debug!("[{}] Sent {} bytes", self.conn_id, len);
        Ok(())
    }
}
