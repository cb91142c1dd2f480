//! HTTP request/response server transport.
//!
//! One envelope per `POST` body. The reply frame becomes the response body;
//! a frame that gets no reply (a notification, or a frame the runtime drops)
//! is answered with `204 No Content`.

use crate::error::ServerError;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use jrpc_protocol::{InboundFrame, ResponseWriter, ServerTransport, TransportError};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Server transport answering JSON-RPC envelopes posted over HTTP/1.1.
pub struct HttpServerTransport {
    local_addr: SocketAddr,
    inbound: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    shutdown: CancellationToken,
}

impl HttpServerTransport {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(addr: SocketAddr, max_body_bytes: usize) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("HTTP transport listening on http://{}", local_addr);

        let (tx, rx) = mpsc::channel(1024);
        let shutdown = CancellationToken::new();
        tokio::spawn(accept_loop(listener, tx, max_body_bytes, shutdown.clone()));

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
impl ServerTransport for HttpServerTransport {
    fn take_inbound(&self) -> Result<mpsc::Receiver<InboundFrame>, TransportError> {
        self.inbound.lock().take().ok_or(TransportError::InboundTaken)
    }

    async fn close(&self) -> Result<(), TransportError> {
        tracing::debug!("Closing HTTP transport on {}", self.local_addr);
        self.shutdown.cancel();
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<InboundFrame>,
    max_body_bytes: usize,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tracing::debug!("HTTP connection from {}", addr);
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let tx = tx.clone();
                                async move { handle_request(req, tx, max_body_bytes).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("HTTP connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("HTTP accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("HTTP transport shutting down");
                break;
            }
        }
    }
}

fn response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    response(status, "text/plain", Bytes::from_static(body.as_bytes()))
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    tx: mpsc::Sender<InboundFrame>,
    max_body_bytes: usize,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST {
        let mut reply = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        reply
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return Ok(reply);
    }

    let body = match Limited::new(req.into_body(), max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!("Rejecting HTTP body: {}", e);
            return Ok(plain(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"));
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let frame = InboundFrame::new(body, Box::new(HttpReply { tx: reply_tx }));
    if tx.send(frame).await.is_err() {
        return Ok(plain(StatusCode::SERVICE_UNAVAILABLE, "server closed"));
    }

    Ok(match reply_rx.await {
        Ok(bytes) => response(StatusCode::OK, JSON_CONTENT_TYPE, bytes),
        Err(_) => {
            let mut reply = Response::new(Full::new(Bytes::new()));
            *reply.status_mut() = StatusCode::NO_CONTENT;
            reply
        }
    })
}

/// Completes the pending HTTP response with the reply frame.
struct HttpReply {
    tx: oneshot::Sender<Bytes>,
}

#[async_trait]
impl ResponseWriter for HttpReply {
    async fn write(self: Box<Self>, frame: Bytes) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::net::Ipv4Addr;

    async fn bind_local(max_body_bytes: usize) -> HttpServerTransport {
        HttpServerTransport::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), max_body_bytes)
            .await
            .unwrap()
    }

    /// Replies to frames carrying an id, drops the rest.
    fn spawn_responder(mut inbound: mpsc::Receiver<InboundFrame>) {
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let value: Value = serde_json::from_slice(&frame.payload).unwrap();
                if value.get("id").is_some() {
                    let reply = json!({"jsonrpc": "2.0", "result": value["method"], "id": value["id"]});
                    frame
                        .writer
                        .write(Bytes::from(reply.to_string()))
                        .await
                        .unwrap();
                }
            }
        });
    }

    #[tokio::test]
    async fn test_post_returns_reply() {
        let transport = bind_local(1024).await;
        spawn_responder(transport.take_inbound().unwrap());

        let response = reqwest::Client::new()
            .post(format!("http://{}/", transport.local_addr()))
            .body(r#"{"jsonrpc":"2.0","method":"echo","id":3}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.headers()[CONTENT_TYPE.as_str()].to_str().unwrap(),
            JSON_CONTENT_TYPE
        );

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["result"], "echo");
        assert_eq!(body["id"], 3);
    }

    #[tokio::test]
    async fn test_notification_gets_no_content() {
        let transport = bind_local(1024).await;
        spawn_responder(transport.take_inbound().unwrap());

        let response = reqwest::Client::new()
            .post(format!("http://{}/", transport.local_addr()))
            .body(r#"{"jsonrpc":"2.0","method":"log"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 204);
    }

    #[tokio::test]
    async fn test_client_calls_over_http() {
        use crate::dispatch::Dispatcher;
        use crate::registry::Registry;
        use crate::server::Server;
        use jrpc_client::{Client, ClientConfig, HttpClientTransport};
        use std::sync::Arc;

        let mut registry = Registry::new();
        registry
            .register("divmod", |a: i64, b: i64| async move {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                Ok((a / b, a % b))
            })
            .unwrap()
            .register("log", |_line: String| async { Ok::<_, String>(()) })
            .unwrap();
        let server = Arc::new(Server::new(Dispatcher::new(registry), Default::default()));

        let transport = bind_local(1024).await;
        let url = format!("http://{}/", transport.local_addr());
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.serve(&transport).await });

        let config = ClientConfig::default().with_header("X-Request-Source", "test");
        let client = Client::new(HttpClientTransport::new(url, &config).unwrap(), config);

        let (q, r): (i64, i64) = client.call("divmod", (17, 5)).join().await.unwrap();
        assert_eq!((q, r), (3, 2));

        let err = client.call("divmod", (1, 0)).join_value().await.unwrap_err();
        assert_eq!(err.error_object().unwrap().message, "division by zero");

        client.notify("log", ("hello",)).await.unwrap();
        assert_eq!(client.pending_count(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_per_call_timeout_over_http() {
        use crate::dispatch::Dispatcher;
        use crate::registry::Registry;
        use crate::server::Server;
        use jrpc_client::{Client, ClientConfig, ClientError, HttpClientTransport};
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        let mut registry = Registry::new();
        registry
            .register("sleep", |ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, String>(ms)
            })
            .unwrap();
        let server = Arc::new(Server::new(Dispatcher::new(registry), Default::default()));

        let transport = bind_local(1024).await;
        let url = format!("http://{}/", transport.local_addr());
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.serve(&transport).await });

        let config = ClientConfig::default();
        let client = Client::new(HttpClientTransport::new(url, &config).unwrap(), config);

        let started = Instant::now();
        let err = client
            .call("sleep", (1500u64,))
            .with_timeout(Duration::from_millis(50))
            .join_value()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }), "got {}", err);
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(client.pending_count(), 0);

        let slept: u64 = client.call("sleep", (5u64,)).join().await.unwrap();
        assert_eq!(slept, 5);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_get_not_allowed() {
        let transport = bind_local(1024).await;
        let _inbound = transport.take_inbound().unwrap();

        let response = reqwest::get(format!("http://{}/", transport.local_addr()))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 405);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let transport = bind_local(16).await;
        let _inbound = transport.take_inbound().unwrap();

        let response = reqwest::Client::new()
            .post(format!("http://{}/", transport.local_addr()))
            .body("x".repeat(64))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 413);
    }

    #[tokio::test]
    async fn test_closed_source_returns_unavailable() {
        let transport = bind_local(1024).await;
        drop(transport.take_inbound().unwrap());

        let response = reqwest::Client::new()
            .post(format!("http://{}/", transport.local_addr()))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 503);
    }
}
