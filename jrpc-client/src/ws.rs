//! Persistent WebSocket client transport.
//!
//! Frames travel as text messages. Configured headers are sent with the
//! upgrade request.

use crate::config::ClientConfig;
use crate::error::ClientError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use jrpc_protocol::{ClientTransport, FrameSource, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::WebSocket(e.to_string())
}

/// Client transport over one WebSocket connection.
pub struct WsClientTransport {
    url: String,
    sink: Arc<tokio::sync::Mutex<Option<SplitSink<WsStream, Message>>>>,
    inbound: Mutex<Option<FrameSource>>,
    shutdown: CancellationToken,
}

impl WsClientTransport {
    /// Dials `url`, bounded by the configured connect timeout.
    pub async fn connect(url: impl Into<String>, config: &ClientConfig) -> Result<Self, ClientError> {
        let url = url.into();
        let mut request = url.as_str().into_client_request().map_err(ws_error)?;
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Other(format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Other(format!("invalid header value: {}", e)))?;
            request.headers_mut().insert(name, value);
        }

        tracing::debug!("Connecting to {}...", url);
        let (ws, _) = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| {
            TransportError::Other(format!(
                "connect to {} timed out after {:?}",
                url, config.connect_timeout
            ))
        })?
        .map_err(ws_error)?;
        tracing::debug!("Connected to {}", url);

        let (sink, messages) = ws.split();
        let (tx, rx) = mpsc::channel(config.inbound_capacity.max(1));
        let shutdown = CancellationToken::new();
        tokio::spawn(read_loop(messages, tx, shutdown.clone()));

        Ok(Self {
            url,
            sink: Arc::new(tokio::sync::Mutex::new(Some(sink))),
            inbound: Mutex::new(Some(rx)),
            shutdown,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ClientTransport for WsClientTransport {
    async fn send(&self, cancel: &CancellationToken, frame: Bytes) -> Result<(), TransportError> {
        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| TransportError::WebSocket(format!("frame is not UTF-8: {}", e)))?;

        // Same rule as the TCP transport: only waiting for the sink is
        // cancellable, a started send always completes.
        let mut sink = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = Arc::clone(&self.sink).lock_owned() => guard,
        };
        let send = tokio::spawn(async move {
            let sink = sink.as_mut().ok_or(TransportError::Closed)?;
            let len = text.len();
            sink.send(Message::text(text)).await.map_err(ws_error)?;
            tracing::debug!("Sent {} bytes", len);
            Ok::<_, TransportError>(())
        });
        send.await
            .map_err(|e| TransportError::Other(format!("send task failed: {}", e)))?
    }

    fn take_inbound(&self) -> Result<FrameSource, TransportError> {
        self.inbound.lock().take().ok_or(TransportError::InboundTaken)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        if let Some(mut sink) = self.sink.lock().await.take() {
            tracing::debug!("Closing connection to {}", self.url);
            if let Err(e) = sink.close().await {
                tracing::debug!("Close handshake failed: {}", e);
            }
        }
        Ok(())
    }
}

async fn read_loop(
    mut messages: SplitStream<WsStream>,
    tx: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = messages.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if tx.send(Bytes::copy_from_slice(text.as_bytes())).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::debug!("Connection closed by server");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(other)) => {
                tracing::warn!("Skipping non-text message ({} bytes)", other.len());
            }
            Some(Err(e)) => {
                tracing::debug!("Read error: {}", e);
                break;
            }
        }
    }
}
