//! Transport contract.
//!
//! A transport moves opaque frames (one serialized envelope each) between
//! peers. It knows nothing about JSON-RPC; correlation is done above it by
//! envelope ids.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Continuous source of inbound frames. Exhaustion means permanent EOF.
pub type FrameSource = mpsc::Receiver<Bytes>;

/// Client side of a transport.
#[async_trait]
pub trait ClientTransport: Send + Sync + 'static {
    /// Sends one frame. May wait for backpressure; returns
    /// [`TransportError::Cancelled`] if `cancel` fires first.
    async fn send(&self, cancel: &CancellationToken, frame: Bytes) -> Result<(), TransportError>;

    /// Hands out the inbound frame source. Can be taken once.
    fn take_inbound(&self) -> Result<FrameSource, TransportError>;

    /// Releases the underlying resources.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Answers a single inbound frame.
#[async_trait]
pub trait ResponseWriter: Send + 'static {
    /// Writes the reply frame. Consumes the writer, so a frame is answered
    /// at most once; dropping it unused means "no reply".
    async fn write(self: Box<Self>, frame: Bytes) -> Result<(), TransportError>;
}

/// A frame received by a server, paired with the way to answer it.
pub struct InboundFrame {
    pub payload: Bytes,
    pub writer: Box<dyn ResponseWriter>,
}

impl InboundFrame {
    pub fn new(payload: Bytes, writer: Box<dyn ResponseWriter>) -> Self {
        Self { payload, writer }
    }
}

impl fmt::Debug for InboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundFrame")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Server side of a transport.
#[async_trait]
pub trait ServerTransport: Send + Sync + 'static {
    /// Hands out the inbound frame source. Can be taken once.
    fn take_inbound(&self) -> Result<mpsc::Receiver<InboundFrame>, TransportError>;

    /// Stops accepting frames and releases the underlying resources.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Sends `item` on `tx`, giving up if `cancel` fires first.
pub async fn send_or_cancel<T: Send>(
    tx: &mpsc::Sender<T>,
    cancel: &CancellationToken,
    item: T,
) -> Result<(), TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = tx.send(item) => result.map_err(|_| TransportError::Closed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_or_cancel_delivers() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        send_or_cancel(&tx, &cancel, Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"a");
    }

    #[tokio::test]
    async fn test_send_or_cancel_honors_cancellation_under_backpressure() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        tx.send(Bytes::from_static(b"fill")).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = send_or_cancel(&tx, &cancel, Bytes::from_static(b"blocked")).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn test_send_or_cancel_reports_closed() {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        drop(rx);

        let result = send_or_cancel(&tx, &CancellationToken::new(), Bytes::new()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
