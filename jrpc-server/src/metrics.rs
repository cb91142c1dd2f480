//! Prometheus metrics for the jrpc server.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Request duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

/// Label used for methods that are not registered, to bound cardinality.
pub const UNKNOWN_METHOD: &str = "<unknown>";

/// Prometheus metrics for the jrpc server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total frames received by the runtime.
    pub frames_total: Counter,
    /// Total requests by method.
    pub requests_total: CounterVec,
    /// Total notifications by method.
    pub notifications_total: CounterVec,
    /// Total error responses by error code.
    pub errors_total: CounterVec,
    /// Request duration histogram by method.
    pub request_duration: HistogramVec,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently open persistent connections.
    pub connections_active: Gauge,
    /// Handler invocations currently running.
    pub inflight_calls: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Frames
        let frames_total = Counter::with_opts(Opts::new(
            "jrpc_frames_total",
            "Total number of inbound frames",
        ))?;
        registry.register(Box::new(frames_total.clone()))?;

        // Calls
        let requests_total = CounterVec::new(
            Opts::new("jrpc_requests_total", "Total requests by method"),
            &["method"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let notifications_total = CounterVec::new(
            Opts::new("jrpc_notifications_total", "Total notifications by method"),
            &["method"],
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        // Errors
        let errors_total = CounterVec::new(
            Opts::new("jrpc_errors_total", "Total error responses by error code"),
            &["code"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        // Request duration
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "jrpc_request_duration_seconds",
                "Request duration in seconds by method",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["method"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "jrpc_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "jrpc_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let inflight_calls = Gauge::with_opts(Opts::new(
            "jrpc_inflight_calls",
            "Number of handler invocations in progress",
        ))?;
        registry.register(Box::new(inflight_calls.clone()))?;

        Ok(Self {
            registry,
            frames_total,
            requests_total,
            notifications_total,
            errors_total,
            request_duration,
            connections_total,
            connections_active,
            inflight_calls,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            metrics.encode(),
        ),
        "/health" | "/healthz" => text_response(StatusCode::OK, "text/plain", "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}
