//! Method registry and call-site cache.
//!
//! Methods are exported into a [`Registry`] at startup. The executable
//! binding for a name, its [`CallSite`], is built on first dispatch and then
//! reused for the lifetime of the registry.

use crate::error::ServerError;
use crate::handler::{BoundHandler, ErasedHandler, Handler, HandlerFuture};
use crate::handler::{OutputDescriptor, ParamDescriptor, ParamKind};
use jrpc_protocol::ErrorObject;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type CallSiteBuilder = Box<dyn Fn(&str) -> CallSite + Send + Sync>;

/// Resolved binding between a method name and its handler. Immutable.
pub struct CallSite {
    method: String,
    params: Vec<ParamDescriptor>,
    outputs: Vec<OutputDescriptor>,
    handler: Arc<dyn ErasedHandler>,
}

impl CallSite {
    fn new<H, Args>(method: &str, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        Self {
            method: method.to_string(),
            params: H::params(),
            outputs: H::outputs(),
            handler: Arc::new(BoundHandler::new(handler)),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    pub fn outputs(&self) -> &[OutputDescriptor] {
        &self.outputs
    }

    /// Number of parameters that must be supplied.
    pub fn required_params(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Required)
            .count()
    }

    /// Binds the raw `params` member and starts the call.
    pub fn invoke(&self, params: Option<Value>) -> Result<HandlerFuture, ErrorObject> {
        let args = match params {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(_) => return Err(ErrorObject::invalid_params("non-array args")),
        };

        if args.len() > self.params.len() {
            return Err(ErrorObject::invalid_params(format!(
                "too many arguments, want at most {}",
                self.params.len()
            )));
        }

        self.handler.invoke(args)
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("method", &self.method)
            .field("params", &self.params)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// A server object exporting several methods.
pub trait Service: Send + Sync + 'static {
    fn export(self: Arc<Self>, registry: &mut Registry) -> Result<(), ServerError>;
}

/// Registry mapping method names to handlers.
#[derive(Default)]
pub struct Registry {
    exports: HashMap<String, CallSiteBuilder>,
    call_sites: RwLock<HashMap<String, Arc<CallSite>>>,
    built: AtomicUsize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports `handler` under `method`.
    pub fn register<H, Args>(
        &mut self,
        method: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, ServerError>
    where
        H: Handler<Args>,
        Args: Send + 'static,
    {
        let method = method.into();
        if self.exports.contains_key(&method) {
            return Err(ServerError::DuplicateMethod(method));
        }

        tracing::debug!("Registered method {}", method);
        let builder: CallSiteBuilder =
            Box::new(move |name| CallSite::new::<H, Args>(name, handler.clone()));
        self.exports.insert(method, builder);
        Ok(self)
    }

    /// Exports every method of `service`.
    pub fn register_service<S: Service>(
        &mut self,
        service: Arc<S>,
    ) -> Result<&mut Self, ServerError> {
        service.export(self)?;
        Ok(self)
    }

    /// Returns the call site for `method`, building it on first use.
    pub fn lookup(&self, method: &str) -> Option<Arc<CallSite>> {
        if let Some(site) = self.call_sites.read().get(method) {
            return Some(Arc::clone(site));
        }

        let builder = self.exports.get(method)?;

        let mut sites = self.call_sites.write();
        if let Some(site) = sites.get(method) {
            return Some(Arc::clone(site));
        }

        let site = Arc::new(builder(method));
        self.built.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Built call site for {}", method);
        sites.insert(method.to_string(), Arc::clone(&site));
        Some(site)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.exports.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Number of call sites built so far.
    pub fn call_sites_built(&self) -> usize {
        self.built.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("methods", &self.methods())
            .field("call_sites_built", &self.call_sites_built())
            .finish()
    }
}
