//! In-process transport pair.
//!
//! Both halves share one logical connection: every frame the client sends
//! reaches the server together with a writer that routes the reply back to
//! the client's inbound source.

use crate::error::TransportError;
use crate::transport::{
    send_or_cancel, ClientTransport, FrameSource, InboundFrame, ResponseWriter, ServerTransport,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Senders of both directions. Closing either half drops them, which ends
/// both inbound sources once in-flight sends complete.
struct Link {
    requests: Mutex<Option<mpsc::Sender<InboundFrame>>>,
    replies: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl Link {
    fn close(&self) {
        self.requests.lock().take();
        self.replies.lock().take();
    }
}

/// Creates a connected client/server transport pair.
pub fn pair(capacity: usize) -> (MemoryClientTransport, MemoryServerTransport) {
    let capacity = capacity.max(1);
    let (request_tx, request_rx) = mpsc::channel(capacity);
    let (reply_tx, reply_rx) = mpsc::channel(capacity);

    let link = Arc::new(Link {
        requests: Mutex::new(Some(request_tx)),
        replies: Mutex::new(Some(reply_tx)),
    });

    let client = MemoryClientTransport {
        link: Arc::clone(&link),
        inbound: Mutex::new(Some(reply_rx)),
    };
    let server = MemoryServerTransport {
        link,
        inbound: Mutex::new(Some(request_rx)),
    };
    (client, server)
}

/// Client half of an in-memory connection.
pub struct MemoryClientTransport {
    link: Arc<Link>,
    inbound: Mutex<Option<FrameSource>>,
}

#[async_trait]
impl ClientTransport for MemoryClientTransport {
    async fn send(&self, cancel: &CancellationToken, frame: Bytes) -> Result<(), TransportError> {
        let tx = self
            .link
            .requests
            .lock()
            .clone()
            .ok_or(TransportError::Closed)?;
        let writer = Box::new(MemoryWriter {
            link: Arc::clone(&self.link),
        });
        send_or_cancel(&tx, cancel, InboundFrame::new(frame, writer)).await
    }

    fn take_inbound(&self) -> Result<FrameSource, TransportError> {
        self.inbound.lock().take().ok_or(TransportError::InboundTaken)
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing in-memory client transport");
        self.link.close();
        Ok(())
    }
}

/// Server half of an in-memory connection.
pub struct MemoryServerTransport {
    link: Arc<Link>,
    inbound: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
}

#[async_trait]
impl ServerTransport for MemoryServerTransport {
    fn take_inbound(&self) -> Result<mpsc::Receiver<InboundFrame>, TransportError> {
        self.inbound.lock().take().ok_or(TransportError::InboundTaken)
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing in-memory server transport");
        self.link.close();
        Ok(())
    }
}

struct MemoryWriter {
    link: Arc<Link>,
}

#[async_trait]
impl ResponseWriter for MemoryWriter {
    async fn write(self: Box<Self>, frame: Bytes) -> Result<(), TransportError> {
        let tx = self
            .link
            .replies
            .lock()
            .clone()
            .ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }
}
