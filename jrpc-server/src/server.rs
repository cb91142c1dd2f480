//! Server runtime.
//!
//! Owns a dispatcher, drains a transport's inbound frames and runs one task
//! per frame.

use crate::dispatch::{CallContext, Dispatched, Dispatcher};
use crate::error::ServerError;
use crate::metrics::Metrics;
use bytes::Bytes;
use jrpc_protocol::{InboundFrame, ServerTransport};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Runtime configuration.
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Per-call handler timeout.
    pub call_timeout: Option<Duration>,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("call_timeout", &self.call_timeout)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub frames_total: AtomicU64,
    pub requests_total: AtomicU64,
    pub notifications_total: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub write_errors: AtomicU64,
}

/// JSON-RPC server runtime.
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    stats: Arc<ServerStats>,
    shutdown: CancellationToken,
}

impl Server {
    /// Creates a new server. Metrics configured here are also wired into the
    /// dispatcher.
    pub fn new(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        let dispatcher = match &config.metrics {
            Some(metrics) => dispatcher.with_metrics(Arc::clone(metrics)),
            None => dispatcher,
        };
        Self {
            dispatcher: Arc::new(dispatcher),
            config,
            stats: Arc::new(ServerStats::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Token cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops every `serve` loop and cancels in-flight calls.
    pub fn shutdown(&self) {
        tracing::info!("Server shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Serves `transport` until shutdown or until its inbound source ends,
    /// then waits for running calls and closes the transport.
    pub async fn serve<T>(&self, transport: &T) -> Result<(), ServerError>
    where
        T: ServerTransport + ?Sized,
    {
        if self.is_shutting_down() {
            return Err(ServerError::ShuttingDown);
        }

        let mut inbound = transport.take_inbound()?;
        let mut tasks = JoinSet::new();
        tracing::info!("Server runtime started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Server runtime shutting down");
                    break;
                }
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(&mut tasks, frame),
                    None => {
                        tracing::info!("Inbound frame source closed");
                        break;
                    }
                },
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_task_result(result);
                }
            }
        }

        drop(inbound);
        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }

        if let Err(e) = transport.close().await {
            tracing::warn!("Failed to close transport: {}", e);
        }
        Ok(())
    }

    fn handle_frame(&self, tasks: &mut JoinSet<()>, frame: InboundFrame) {
        self.stats.frames_total.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.config.metrics {
            metrics.frames_total.inc();
        }

        let InboundFrame { payload, writer } = frame;
        let value: Value = match serde_json::from_slice(&payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Dropping unparseable frame ({} bytes): {}", payload.len(), e);
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let stats = Arc::clone(&self.stats);
        let ctx = CallContext {
            cancel: self.shutdown.child_token(),
            timeout: self.config.call_timeout,
        };

        tasks.spawn(async move {
            let response = match dispatcher.dispatch_envelope(value, &ctx).await {
                Dispatched::Reply(response) => response,
                Dispatched::Notified => {
                    stats.notifications_total.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Dispatched::Dropped => {
                    stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };
            stats.requests_total.fetch_add(1, Ordering::Relaxed);

            let bytes = match serde_json::to_vec(&response) {
                Ok(bytes) => Bytes::from(bytes),
                Err(e) => {
                    tracing::error!("Failed to encode response {}: {}", response.id, e);
                    return;
                }
            };
            if let Err(e) = writer.write(bytes).await {
                stats.write_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to write response {}: {}", response.id, e);
            }
        });
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::warn!("Call task failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use jrpc_client::{Client, ClientConfig, ClientError};
    use jrpc_protocol::{memory_pair, ClientTransport, ErrorCode};
    use std::time::Instant;

    async fn say_hello(msg: String, _code: Option<i64>) -> Result<String, String> {
        Ok(msg)
    }

    async fn error_call() -> Result<(), String> {
        Err("error call".to_string())
    }

    fn test_server(config: ServerConfig) -> Arc<Server> {
        let mut registry = Registry::new();
        registry
            .register("say_hello", say_hello)
            .unwrap()
            .register("error_call", error_call)
            .unwrap()
            .register("sleep", |ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, String>(ms)
            })
            .unwrap();
        Arc::new(Server::new(Dispatcher::new(registry), config))
    }

    fn start(server: &Arc<Server>) -> (Client, tokio::task::JoinHandle<Result<(), ServerError>>) {
        let (client_transport, server_transport) = memory_pair(64);
        let runner = Arc::clone(server);
        let handle = tokio::spawn(async move { runner.serve(&server_transport).await });
        let client = Client::new(client_transport, ClientConfig::default());
        (client, handle)
    }

    #[tokio::test]
    async fn test_say_hello_end_to_end() {
        let server = test_server(ServerConfig::new());
        let (client, _handle) = start(&server);

        let reply: String = client.call("say_hello", ("Hello",)).join().await.unwrap();
        assert_eq!(reply, "Hello");
    }

    #[tokio::test]
    async fn test_missing_method_end_to_end() {
        let server = test_server(ServerConfig::new());
        let (client, _handle) = start(&server);

        let err = client.call("Missing", ()).join_value().await.unwrap_err();
        assert!(err.is_method_not_found());
    }

    #[tokio::test]
    async fn test_error_call_end_to_end() {
        let server = test_server(ServerConfig::new());
        let (client, _handle) = start(&server);

        let err = client.call("error_call", ()).join_value().await.unwrap_err();
        match err {
            ClientError::Rpc(obj) => {
                assert_eq!(obj.code, ErrorCode::ServerError);
                assert_eq!(obj.message, "error call");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_caller_cancellation_returns_promptly() {
        let server = test_server(ServerConfig::new());
        let (client, _handle) = start(&server);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = client
            .call("sleep", (10_000u64,))
            .with_cancel(cancel)
            .join_value()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_server_call_timeout() {
        let server = test_server(ServerConfig::new().with_call_timeout(Duration::from_millis(20)));
        let (client, _handle) = start(&server);

        let err = client
            .call("sleep", (10_000u64,))
            .join_value()
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InternalError));
    }

    #[tokio::test]
    async fn test_notification_counted_without_reply() {
        let server = test_server(ServerConfig::new());
        let (client, _handle) = start(&server);

        client.notify("say_hello", ("quiet",)).await.unwrap();
        let reply: String = client.call("say_hello", ("loud",)).join().await.unwrap();
        assert_eq!(reply, "loud");

        assert_eq!(server.stats().frames_total.load(Ordering::Relaxed), 2);
        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_invalid_notification_counted_as_dropped() {
        let server = test_server(ServerConfig::new());
        let (client_transport, server_transport) = memory_pair(8);
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move { runner.serve(&server_transport).await });
        let mut replies = client_transport.take_inbound().unwrap();

        let cancel = CancellationToken::new();
        for frame in [
            r#"{"jsonrpc":"2.0","method":12}"#,
            r#"{"jsonrpc":"2.0","method":"say_hello","params":["quiet"]}"#,
            r#"{"jsonrpc":"2.0","method":"say_hello","params":["loud"],"id":1}"#,
        ] {
            client_transport
                .send(&cancel, Bytes::from_static(frame.as_bytes()))
                .await
                .unwrap();
        }

        let reply: Value = serde_json::from_slice(&replies.recv().await.unwrap()).unwrap();
        assert_eq!(reply["result"], "loud");

        server.shutdown();
        handle.await.unwrap().unwrap();
        let stats = server.stats();
        assert_eq!(stats.frames_total.load(Ordering::Relaxed), 3);
        assert_eq!(stats.notifications_total.load(Ordering::Relaxed), 1);
        assert_eq!(stats.frames_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(stats.requests_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_serving() {
        let server = test_server(ServerConfig::new());
        let (client, handle) = start(&server);

        let pending = tokio::spawn({
            let reply = client.call("sleep", (10_000u64,));
            async move { reply.join_value().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        server.shutdown();
        handle.await.unwrap().unwrap();

        assert!(pending.await.unwrap().is_err());
        assert!(server.is_shutting_down());
    }

    #[tokio::test]
    async fn test_unparseable_frame_dropped() {
        use jrpc_protocol::MemoryClientTransport;

        let server = test_server(ServerConfig::new());
        let (client_transport, server_transport): (MemoryClientTransport, _) = memory_pair(8);
        let mut replies = client_transport.take_inbound().unwrap();
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.serve(&server_transport).await });

        let cancel = CancellationToken::new();
        client_transport
            .send(&cancel, Bytes::from_static(b"{not json"))
            .await
            .unwrap();
        client_transport
            .send(
                &cancel,
                Bytes::from_static(br#"{"jsonrpc":"2.0","method":"say_hello","params":["x"],"id":1}"#),
            )
            .await
            .unwrap();

        let reply = replies.recv().await.unwrap();
        let value: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(value["result"], "x");
        assert_eq!(server.stats().frames_dropped.load(Ordering::Relaxed), 1);
    }
}
