//! Dispatch engine.
//!
//! Turns one inbound envelope into at most one outbound response: validates
//! the envelope, resolves the method, binds parameters, runs the handler
//! under the call context and maps the outcome.

use crate::metrics::{Metrics, UNKNOWN_METHOD};
use crate::registry::Registry;
use bytes::Bytes;
use jrpc_protocol::{ErrorObject, Id, Incoming, Notification, Request, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-call execution context.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Fires when the server shuts down.
    pub cancel: CancellationToken,
    /// Upper bound on handler run time.
    pub timeout: Option<Duration>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Decrements the in-flight gauge when a call ends, however it ends.
struct InflightGuard<'a>(Option<&'a Metrics>);

impl<'a> InflightGuard<'a> {
    fn enter(metrics: Option<&'a Metrics>) -> Self {
        if let Some(m) = metrics {
            m.inflight_calls.inc();
        }
        Self(metrics)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if let Some(m) = self.0 {
            m.inflight_calls.dec();
        }
    }
}

/// How one envelope was handled.
#[derive(Debug)]
pub enum Dispatched {
    /// A response is owed to the caller.
    Reply(Response),
    /// A valid notification ran; nothing is sent back.
    Notified,
    /// An invalid notification was discarded.
    Dropped,
}

/// Dispatch engine over a [`Registry`].
pub struct Dispatcher {
    registry: Arc<Registry>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            metrics: None,
        }
    }

    /// Records per-method counters and latency.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatches one raw frame, returning the response frame if one is owed.
    pub async fn dispatch(&self, frame: &[u8], ctx: &CallContext) -> Option<Bytes> {
        let response = match serde_json::from_slice::<Value>(frame) {
            Ok(value) => self.dispatch_value(value, ctx).await?,
            Err(e) => {
                debug!("Unparseable frame: {}", e);
                self.record_error(&ErrorObject::parse_error(&e));
                Response::error(Id::Null, ErrorObject::parse_error(e))
            }
        };

        match serde_json::to_vec(&response) {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                warn!("Failed to encode response {}: {}", response.id, e);
                None
            }
        }
    }

    /// Dispatches one parsed envelope.
    pub async fn dispatch_value(&self, value: Value, ctx: &CallContext) -> Option<Response> {
        match self.dispatch_envelope(value, ctx).await {
            Dispatched::Reply(response) => Some(response),
            Dispatched::Notified | Dispatched::Dropped => None,
        }
    }

    /// Dispatches one parsed envelope, reporting how it was handled.
    pub async fn dispatch_envelope(&self, value: Value, ctx: &CallContext) -> Dispatched {
        let incoming = match Incoming::from_value(value) {
            Ok(incoming) => incoming,
            Err(err) => {
                if err.id.is_none() {
                    warn!("Dropping invalid notification: {}", err);
                } else {
                    debug!("Invalid request: {}", err);
                    self.record_error(&err.error);
                }
                return match err.into_response() {
                    Some(response) => Dispatched::Reply(response),
                    None => Dispatched::Dropped,
                };
            }
        };

        match incoming {
            Incoming::Request(request) => Dispatched::Reply(self.handle_request(request, ctx).await),
            Incoming::Notification(notification) => {
                self.handle_notification(notification, ctx).await;
                Dispatched::Notified
            }
        }
    }

    async fn handle_request(&self, request: Request, ctx: &CallContext) -> Response {
        let Request {
            method, params, id, ..
        } = request;
        debug!("Request {} (id={})", method, id);

        let label = self.method_label(&method);
        if let Some(m) = &self.metrics {
            m.requests_total.with_label_values(&[label]).inc();
        }

        let start = Instant::now();
        let outcome = self.invoke(&method, params, ctx).await;
        if let Some(m) = &self.metrics {
            m.request_duration
                .with_label_values(&[label])
                .observe(start.elapsed().as_secs_f64());
        }

        match outcome {
            Ok(result) => Response::ok(id, result),
            Err(error) => {
                debug!("Request {} (id={}) failed: {}", method, id, error);
                self.record_error(&error);
                Response::error(id, error)
            }
        }
    }

    async fn handle_notification(&self, notification: Notification, ctx: &CallContext) {
        let Notification { method, params, .. } = notification;
        debug!("Notification {}", method);

        if let Some(m) = &self.metrics {
            m.notifications_total
                .with_label_values(&[self.method_label(&method)])
                .inc();
        }

        if let Err(error) = self.invoke(&method, params, ctx).await {
            warn!("Notification {} failed: {}", method, error);
        }
    }

    async fn invoke(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &CallContext,
    ) -> Result<Value, ErrorObject> {
        let site = self
            .registry
            .lookup(method)
            .ok_or_else(|| ErrorObject::method_not_found(method))?;
        let call = site.invoke(params)?;

        let _inflight = InflightGuard::enter(self.metrics.as_deref());
        let bounded = async {
            match ctx.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ErrorObject::internal_error(format!(
                        "method {} timed out after {:?}",
                        method, limit
                    ))),
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                Err(ErrorObject::internal_error("server shutting down"))
            }
            outcome = bounded => outcome,
        }
    }

    fn method_label<'a>(&self, method: &'a str) -> &'a str {
        if self.registry.contains(method) {
            method
        } else {
            UNKNOWN_METHOD
        }
    }

    fn record_error(&self, error: &ErrorObject) {
        if let Some(m) = &self.metrics {
            m.errors_total.with_label_values(&[error.code.label()]).inc();
        }
    }
}
