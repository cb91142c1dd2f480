//! High-level client API.
//!
//! A [`Client`] owns one transport and one receive loop. Calls are
//! correlated purely by the sequence id carried in each request, so any
//! number of calls may be in flight at once and complete in any order.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::pending::{PendingCall, PendingTable};
use bytes::Bytes;
use jrpc_protocol::{
    ClientTransport, FrameSource, Notification, Request, Response, TransportError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Converts call arguments into positional parameters.
pub trait IntoParams {
    fn into_params(self) -> Result<Vec<Value>, serde_json::Error>;
}

impl IntoParams for () {
    fn into_params(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(Vec::new())
    }
}

impl IntoParams for Vec<Value> {
    fn into_params(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(self)
    }
}

macro_rules! impl_into_params {
    ($($ty:ident),+) => {
        impl<$($ty: Serialize),+> IntoParams for ($($ty,)+) {
            #[allow(non_snake_case)]
            fn into_params(self) -> Result<Vec<Value>, serde_json::Error> {
                let ($($ty,)+) = self;
                Ok(vec![$(serde_json::to_value($ty)?),+])
            }
        }
    };
}

impl_into_params!(A1);
impl_into_params!(A1, A2);
impl_into_params!(A1, A2, A3);
impl_into_params!(A1, A2, A3, A4);
impl_into_params!(A1, A2, A3, A4, A5);
impl_into_params!(A1, A2, A3, A4, A5, A6);

struct Inner {
    transport: Box<dyn ClientTransport>,
    pending: PendingTable,
    config: ClientConfig,
    shutdown: CancellationToken,
    closing: AtomicBool,
}

impl Inner {
    /// Routes one inbound frame to its waiting call.
    fn deliver(&self, frame: &[u8]) {
        let response: Response = match serde_json::from_slice(frame) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Dropping undecodable response ({} bytes): {}", frame.len(), e);
                return;
            }
        };

        let Some(id) = response.id.as_u64() else {
            tracing::warn!("Dropping response with unmatched id {}", response.id);
            return;
        };
        let Some(call) = self.pending.remove(id) else {
            tracing::warn!("Dropping response with unmatched id {}", id);
            return;
        };

        if call.try_resolve() {
            tracing::debug!("Delivering response {}", id);
            call.deliver(response);
        } else {
            tracing::debug!("Dropping late response {}", id);
        }
    }

    /// One-way transition to closed: fails pending calls, stops the receive
    /// loop and closes the transport.
    async fn shut_down(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained = self.pending.close();
        self.shutdown.cancel();

        if !drained.is_empty() {
            tracing::debug!("Failing {} pending calls on shutdown", drained.len());
        }
        for call in drained {
            if call.try_resolve() {
                call.abandon();
            }
        }

        if let Err(e) = self.transport.close().await {
            tracing::warn!("Failed to close transport: {}", e);
        }
    }

    /// Sends a frame, giving up when the client shuts down.
    async fn send(&self, cancel: &CancellationToken, frame: Bytes) -> Result<(), TransportError> {
        tokio::select! {
            result = self.transport.send(cancel, frame) => result,
            _ = self.shutdown.cancelled() => Err(TransportError::Closed),
        }
    }
}

async fn receive_loop(inner: Arc<Inner>, mut inbound: FrameSource) {
    tracing::debug!("Client receive loop started");
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            frame = inbound.recv() => match frame {
                Some(frame) => inner.deliver(&frame),
                None => {
                    tracing::debug!("Inbound frame source exhausted");
                    break;
                }
            },
        }
    }
    inner.shut_down().await;
    tracing::debug!("Client receive loop stopped");
}

/// JSON-RPC client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a client over `transport` and starts its receive loop.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new<T: ClientTransport>(transport: T, config: ClientConfig) -> Self {
        let inbound = transport.take_inbound();
        let inner = Arc::new(Inner {
            transport: Box::new(transport),
            pending: PendingTable::new(),
            config,
            shutdown: CancellationToken::new(),
            closing: AtomicBool::new(false),
        });

        match inbound {
            Ok(inbound) => {
                tokio::spawn(receive_loop(Arc::clone(&inner), inbound));
            }
            Err(e) => {
                tracing::error!("Client transport has no inbound source: {}", e);
                inner.pending.close();
                inner.shutdown.cancel();
            }
        }

        Self { inner }
    }

    /// Prepares a call. Nothing is sent until the reply is joined.
    pub fn call(&self, method: impl Into<String>, args: impl IntoParams) -> PendingReply {
        PendingReply {
            inner: Arc::clone(&self.inner),
            method: method.into(),
            params: args.into_params(),
            cancel: None,
            timeout: self.inner.config.request_timeout,
        }
    }

    /// Sends a notification. Returns once the transport accepted the frame.
    pub async fn notify(
        &self,
        method: impl Into<String>,
        args: impl IntoParams,
    ) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let notification = Notification::new(method, args.into_params()?);
        let frame = Bytes::from(serde_json::to_vec(&notification)?);
        tracing::debug!("Sending notification {}", notification.method);

        self.inner
            .send(&CancellationToken::new(), frame)
            .await
            .map_err(|e| match e {
                TransportError::Closed if self.is_closed() => ClientError::Closed,
                e => ClientError::Transport(e),
            })
    }

    /// Closes the client. Pending calls fail with [`ClientError::Closed`].
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.inner.shutdown.is_cancelled() {
            return Ok(());
        }
        tracing::debug!("Closing client");
        self.inner.shut_down().await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pending.is_closed()
    }

    /// Number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

/// A prepared call, sent when joined.
#[must_use = "a call is only sent when joined"]
pub struct PendingReply {
    inner: Arc<Inner>,
    method: String,
    params: Result<Vec<Value>, serde_json::Error>,
    cancel: Option<CancellationToken>,
    timeout: Duration,
}

/// How the wait for a response ended when the response did not win.
enum Lost {
    Timeout,
    Cancelled,
    Closed,
}

impl PendingReply {
    /// Aborts the call when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Overrides the client's request timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends the call and decodes its result as `T`.
    pub async fn join<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let value = self.join_value().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sends the call and returns its raw result.
    pub async fn join_value(self) -> Result<Value, ClientError> {
        let PendingReply {
            inner,
            method,
            params,
            cancel,
            timeout,
        } = self;
        let params = params?;
        let cancel = cancel.unwrap_or_default();

        let deadline = Instant::now() + timeout;
        let (call, rx) = inner.pending.register().ok_or(ClientError::Closed)?;
        let id = call.id();

        let request = Request::new(id, method, params);
        let frame = match serde_json::to_vec(&request) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                inner.pending.remove(id);
                return Err(e.into());
            }
        };

        tracing::debug!("Sending request {} ({})", id, request.method);
        // The deadline also bounds the send: request/response transports
        // carry the whole exchange inside it. An elapsed send falls through
        // to `wait`, which settles the call against the passed deadline.
        let sent = tokio::time::timeout_at(deadline, inner.send(&cancel, frame)).await;
        if let Ok(Err(e)) = sent {
            inner.pending.remove(id);
            return Err(match e {
                TransportError::Cancelled => ClientError::Cancelled { id },
                _ if inner.pending.is_closed() => ClientError::Closed,
                e => ClientError::Transport(e),
            });
        }

        wait(&inner, &call, rx, &cancel, deadline).await
    }
}

async fn wait(
    inner: &Inner,
    call: &PendingCall,
    mut rx: oneshot::Receiver<Response>,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<Value, ClientError> {
    let id = call.id();
    let lost = tokio::select! {
        biased;
        delivered = &mut rx => return settle(delivered),
        _ = inner.shutdown.cancelled() => Lost::Closed,
        _ = cancel.cancelled() => Lost::Cancelled,
        _ = tokio::time::sleep_until(deadline) => Lost::Timeout,
    };

    if call.try_resolve() {
        inner.pending.remove(id);
        return Err(match lost {
            Lost::Timeout => {
                tracing::debug!("Request {} timed out", id);
                ClientError::Timeout { id }
            }
            Lost::Cancelled => ClientError::Cancelled { id },
            Lost::Closed => ClientError::Closed,
        });
    }

    // The delivery path won the race; its response is already on the way.
    settle(rx.await)
}

fn settle(delivered: Result<Response, oneshot::error::RecvError>) -> Result<Value, ClientError> {
    match delivered {
        Ok(response) => response.into_result().map_err(ClientError::Rpc),
        Err(_) => Err(ClientError::Closed),
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .finish()
    }
}
