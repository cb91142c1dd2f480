//! jrpc - JSON-RPC 2.0 demo server
//!
//! Serves a handful of demo methods over persistent TCP, and optionally over
//! WebSocket and HTTP.

mod demo;

use jrpc_server::{
    run_metrics_server, Config, Dispatcher, HttpServerTransport, Metrics, Server, ServerConfig,
    TcpServerTransport, TcpTransportConfig, WsServerTransport,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if JRPC_CONFIG is set, then env overrides)
    let config_path = std::env::var("JRPC_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting jrpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Wire mode: {}", config.network.wire_mode);
    match config.dispatch.call_timeout() {
        Some(timeout) => tracing::info!("  Call timeout: {:?}", timeout),
        None => tracing::info!("  Call timeout: unbounded"),
    }

    let metrics = if config.metrics.enabled {
        Some(Arc::new(Metrics::new()?))
    } else {
        None
    };

    let mut server_config = ServerConfig::new();
    if let Some(timeout) = config.dispatch.call_timeout() {
        server_config = server_config.with_call_timeout(timeout);
    }
    if let Some(ref metrics) = metrics {
        server_config = server_config.with_metrics(Arc::clone(metrics));
    }

    let log = Arc::new(demo::LogService::default());
    let registry = demo::registry(Arc::clone(&log))?;
    tracing::info!("  Methods: {}", registry.methods().join(", "));
    let server = Arc::new(Server::new(Dispatcher::new(registry), server_config));

    // Metrics server
    let metrics_shutdown = CancellationToken::new();
    if let Some(ref metrics) = metrics {
        let addr = config.metrics.bind_addr;
        let metrics = Arc::clone(metrics);
        let shutdown = metrics_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    } else {
        tracing::info!("  Metrics: disabled");
    }

    // Persistent TCP listener
    let mut tcp_config = TcpTransportConfig::from_network(&config.network);
    if let Some(ref metrics) = metrics {
        tcp_config = tcp_config.with_metrics(Arc::clone(metrics));
    }
    let tcp = TcpServerTransport::bind(tcp_config).await?;

    // HTTP listener
    let http_handle = if config.http.enabled {
        let http = HttpServerTransport::bind(config.http.bind_addr, config.http.max_body_bytes).await?;
        let http_server = Arc::clone(&server);
        Some(tokio::spawn(async move { http_server.serve(&http).await }))
    } else {
        tracing::info!("  HTTP: disabled");
        None
    };

    // WebSocket listener
    let ws_handle = if config.websocket.enabled {
        let ws = WsServerTransport::bind(config.websocket.bind_addr).await?;
        let ws_server = Arc::clone(&server);
        Some(tokio::spawn(async move { ws_server.serve(&ws).await }))
    } else {
        tracing::info!("  WebSocket: disabled");
        None
    };

    // Spawn shutdown signal handler
    let shutdown_server = Arc::clone(&server);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        metrics_shutdown.cancel();
    });

    // Run server (blocks until shutdown)
    server.serve(&tcp).await?;

    for (name, handle) in [("HTTP", http_handle), ("WebSocket", ws_handle)] {
        let Some(handle) = handle else { continue };
        match handle.await {
            Ok(Err(e)) => tracing::error!("{} transport error: {}", name, e),
            Err(e) => tracing::error!("{} task failed: {}", name, e),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Server stopped ({} log lines received)", log.lines());
    Ok(())
}
