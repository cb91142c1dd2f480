//! Dispatch engine benchmarks (no transport).

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use jrpc_server::{CallContext, Dispatcher, Registry};
use tokio::runtime::Runtime;

fn dispatcher() -> Dispatcher {
    let mut registry = Registry::new();
    registry
        .register("echo", |value: serde_json::Value| async move {
            Ok::<_, String>(value)
        })
        .unwrap()
        .register("sum", |numbers: Vec<f64>| async move {
            Ok::<_, String>(numbers.iter().sum::<f64>())
        })
        .unwrap()
        .register("log", |_line: String| async { Ok::<_, String>(()) })
        .unwrap();
    Dispatcher::new(registry)
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dispatcher = dispatcher();
    let ctx = CallContext::new();

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    let cases: [(&str, &[u8]); 4] = [
        ("echo", br#"{"jsonrpc":"2.0","method":"echo","params":["hi"],"id":1}"#),
        ("sum", br#"{"jsonrpc":"2.0","method":"sum","params":[[1,2,3,4,5,6,7,8]],"id":2}"#),
        ("notification", br#"{"jsonrpc":"2.0","method":"log","params":["x"]}"#),
        ("method_not_found", br#"{"jsonrpc":"2.0","method":"Missing","id":3}"#),
    ];

    for (name, frame) in cases {
        group.bench_function(name, |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(dispatcher.dispatch(frame, &ctx).await) });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
