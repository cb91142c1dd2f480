//! End-to-end client-server benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jrpc_client::{Client, ClientConfig, TcpClientTransport};
use jrpc_protocol::{memory_pair, WireMode};
use jrpc_server::{Dispatcher, Registry, Server, ServerConfig, TcpServerTransport, TcpTransportConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn server() -> Arc<Server> {
    let mut registry = Registry::new();
    registry
        .register("echo", |value: serde_json::Value| async move {
            Ok::<_, String>(value)
        })
        .unwrap();
    Arc::new(Server::new(Dispatcher::new(registry), ServerConfig::new()))
}

fn setup_memory(rt: &Runtime) -> Client {
    rt.block_on(async {
        let server = server();
        let (client_transport, server_transport) = memory_pair(1024);
        tokio::spawn(async move {
            let _ = server.serve(&server_transport).await;
        });
        Client::new(client_transport, ClientConfig::default())
    })
}

fn setup_tcp(rt: &Runtime, mode: WireMode) -> Client {
    rt.block_on(async {
        let server = server();
        let config = TcpTransportConfig::new(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .with_wire_mode(mode);
        let transport = TcpServerTransport::bind(config).await.unwrap();
        let addr = transport.local_addr();
        tokio::spawn(async move {
            let _ = server.serve(&transport).await;
        });

        let config = ClientConfig::default().with_wire_mode(mode);
        let client_transport = TcpClientTransport::connect(addr, &config).await.unwrap();
        Client::new(client_transport, config)
    })
}

fn bench_call_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let clients = [
        ("memory", setup_memory(&rt)),
        ("tcp_framed", setup_tcp(&rt, WireMode::Framed)),
        ("tcp_lines", setup_tcp(&rt, WireMode::Lines)),
    ];

    let mut group = c.benchmark_group("e2e_call");
    group.throughput(Throughput::Elements(1));

    for (name, client) in &clients {
        group.bench_function(*name, |b| {
            b.to_async(&rt).iter(|| async {
                black_box(client.call("echo", ("ping",)).join_value().await.unwrap())
            });
        });
    }

    group.finish();
}

fn bench_concurrent_calls(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = setup_tcp(&rt, WireMode::Framed);

    let mut group = c.benchmark_group("e2e_concurrent");

    for concurrency in [1, 10, 50, 100] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| async {
                    let calls: Vec<_> = (0..concurrency)
                        .map(|n| client.call("echo", (n,)).join_value())
                        .collect();
                    black_box(futures::future::join_all(calls).await)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_call_latency, bench_concurrent_calls);
criterion_main!(benches);
