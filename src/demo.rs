//! Methods exported by the demo server.

use jrpc_server::{Registry, ServerError, Service};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

async fn ping() -> Result<&'static str, String> {
    Ok("pong")
}

async fn echo(value: Value) -> Result<Value, String> {
    Ok(value)
}

async fn say_hello(name: String, code: Option<i64>) -> Result<String, String> {
    Ok(match code {
        Some(code) => format!("{} [{}]", name, code),
        None => name,
    })
}

async fn sum(numbers: Vec<f64>) -> Result<f64, String> {
    Ok(numbers.iter().sum())
}

async fn divmod(a: i64, b: i64) -> Result<(i64, i64), String> {
    if b == 0 {
        return Err("division by zero".to_string());
    }
    Ok((a.div_euclid(b), a.rem_euclid(b)))
}

/// Log sink. Meant to be called as a notification.
#[derive(Debug, Default)]
pub struct LogService {
    lines: AtomicU64,
}

impl LogService {
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

impl Service for LogService {
    fn export(self: Arc<Self>, registry: &mut Registry) -> Result<(), ServerError> {
        let this = Arc::clone(&self);
        registry.register("log", move |message: String| {
            let this = Arc::clone(&this);
            async move {
                let n = this.lines.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!("log #{}: {}", n, message);
                Ok::<_, String>(())
            }
        })?;
        registry.register("log.count", move || {
            let this = Arc::clone(&self);
            async move { Ok::<_, String>(this.lines()) }
        })?;
        Ok(())
    }
}

/// Builds the demo registry.
pub fn registry(log: Arc<LogService>) -> Result<Registry, ServerError> {
    let mut registry = Registry::new();
    registry
        .register("rpc.ping", ping)?
        .register("echo", echo)?
        .register("say_hello", say_hello)?
        .register("sum", sum)?
        .register("divmod", divmod)?
        .register_service(log)?;
    Ok(registry)
}
