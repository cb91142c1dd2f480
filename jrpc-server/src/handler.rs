//! Typed RPC handlers.
//!
//! A handler is any async function (or closure) whose arguments implement
//! [`FromParam`] and whose output is `Result<R, E>` with `R: IntoOutputs` and
//! `E: Display`. Positional JSON parameters are bound to the arguments in
//! order; the `Ok` value becomes the `result`, the `Err` value becomes an
//! error response.

use jrpc_protocol::ErrorObject;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Future produced by invoking a bound handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ErrorObject>> + Send>>;

/// Convenience result type for handlers that pick their own error codes.
pub type HandlerResult<T> = Result<T, ErrorObject>;

/// Whether a positional parameter must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Required,
    /// May be omitted from the end of the array; receives an absent value.
    Optional,
}

/// Describes one input parameter of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub index: usize,
    pub kind: ParamKind,
    pub type_name: &'static str,
}

impl ParamDescriptor {
    pub fn of<T: FromParam>(index: usize) -> Self {
        Self {
            index,
            kind: T::KIND,
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Describes one non-error return slot of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub index: usize,
    pub type_name: &'static str,
}

impl OutputDescriptor {
    pub fn of<T: ?Sized>(index: usize) -> Self {
        Self {
            index,
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Wrapper binding any serde type as a parameter or result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// A value that can be decoded from one positional parameter.
pub trait FromParam: Sized + Send + 'static {
    const KIND: ParamKind;

    /// Decodes the parameter. `None` means the element was not supplied,
    /// which only happens for [`ParamKind::Optional`] parameters.
    fn from_param(value: Option<Value>) -> Result<Self, serde_json::Error>;
}

fn decode_required<T: DeserializeOwned>(value: Option<Value>) -> Result<T, serde_json::Error> {
    match value {
        Some(value) => serde_json::from_value(value),
        None => Err(<serde_json::Error as serde::de::Error>::custom(
            "missing value",
        )),
    }
}

macro_rules! impl_from_param {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromParam for $ty {
                const KIND: ParamKind = ParamKind::Required;

                fn from_param(value: Option<Value>) -> Result<Self, serde_json::Error> {
                    decode_required(value)
                }
            }
        )*
    };
}

impl_from_param!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, String,
    Value,
);

impl<T: DeserializeOwned + Send + 'static> FromParam for Vec<T> {
    const KIND: ParamKind = ParamKind::Required;

    fn from_param(value: Option<Value>) -> Result<Self, serde_json::Error> {
        decode_required(value)
    }
}

impl<T: DeserializeOwned + Send + 'static> FromParam for HashMap<String, T> {
    const KIND: ParamKind = ParamKind::Required;

    fn from_param(value: Option<Value>) -> Result<Self, serde_json::Error> {
        decode_required(value)
    }
}

impl<T: DeserializeOwned + Send + 'static> FromParam for Json<T> {
    const KIND: ParamKind = ParamKind::Required;

    fn from_param(value: Option<Value>) -> Result<Self, serde_json::Error> {
        decode_required(value)
    }
}

impl<T: DeserializeOwned + Send + 'static> FromParam for Option<T> {
    const KIND: ParamKind = ParamKind::Optional;

    fn from_param(value: Option<Value>) -> Result<Self, serde_json::Error> {
        match value {
            Some(value) => serde_json::from_value(value),
            None => Ok(None),
        }
    }
}

/// Binds one positional element, reporting failures against its index.
fn bind<T: FromParam>(index: usize, value: Option<Value>) -> Result<T, ErrorObject> {
    if value.is_none() && T::KIND == ParamKind::Required {
        return Err(ErrorObject::invalid_params(format!(
            "missing value for required argument {}",
            index
        )));
    }
    T::from_param(value)
        .map_err(|e| ErrorObject::invalid_params(format!("invalid argument {}: {}", index, e)))
}

// ============================================================================
// Outputs
// ============================================================================

/// The non-error return values of a handler.
///
/// `()` encodes as `null`, a single value is returned unwrapped and a tuple
/// becomes an ordered array.
pub trait IntoOutputs: Send + 'static {
    fn descriptors() -> Vec<OutputDescriptor>;

    fn into_value(self) -> Result<Value, serde_json::Error>;
}

impl IntoOutputs for () {
    fn descriptors() -> Vec<OutputDescriptor> {
        Vec::new()
    }

    fn into_value(self) -> Result<Value, serde_json::Error> {
        Ok(Value::Null)
    }
}

macro_rules! impl_single_output {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOutputs for $ty {
                fn descriptors() -> Vec<OutputDescriptor> {
                    vec![OutputDescriptor::of::<$ty>(0)]
                }

                fn into_value(self) -> Result<Value, serde_json::Error> {
                    serde_json::to_value(self)
                }
            }
        )*
    };
}

impl_single_output!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, String,
    &'static str, Value,
);

impl<T: Serialize + Send + 'static> IntoOutputs for Vec<T> {
    fn descriptors() -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::of::<Self>(0)]
    }

    fn into_value(self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl<T: Serialize + Send + 'static> IntoOutputs for HashMap<String, T> {
    fn descriptors() -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::of::<Self>(0)]
    }

    fn into_value(self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl<T: Serialize + Send + 'static> IntoOutputs for Option<T> {
    fn descriptors() -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::of::<Self>(0)]
    }

    fn into_value(self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl<T: Serialize + Send + 'static> IntoOutputs for Json<T> {
    fn descriptors() -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::of::<T>(0)]
    }

    fn into_value(self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.0)
    }
}

macro_rules! impl_tuple_outputs {
    ($($ty:ident => $idx:tt),+) => {
        impl<$($ty: Serialize + Send + 'static),+> IntoOutputs for ($($ty,)+) {
            fn descriptors() -> Vec<OutputDescriptor> {
                vec![$(OutputDescriptor::of::<$ty>($idx)),+]
            }

            fn into_value(self) -> Result<Value, serde_json::Error> {
                Ok(Value::Array(vec![$(serde_json::to_value(self.$idx)?),+]))
            }
        }
    };
}

impl_tuple_outputs!(A => 0, B => 1);
impl_tuple_outputs!(A => 0, B => 1, C => 2);
impl_tuple_outputs!(A => 0, B => 1, C => 2, D => 3);

// ============================================================================
// Handlers
// ============================================================================

/// Maps a handler's error value to the error object sent to the peer.
///
/// An [`ErrorObject`] is passed through as is; anything else becomes a
/// server error carrying its display text verbatim.
fn handler_error<E: fmt::Display + 'static>(err: E) -> ErrorObject {
    let any: &dyn Any = &err;
    match any.downcast_ref::<ErrorObject>() {
        Some(obj) => obj.clone(),
        None => ErrorObject::server_error(err.to_string()),
    }
}

fn encode_outputs<R: IntoOutputs>(outputs: R) -> Result<Value, ErrorObject> {
    outputs
        .into_value()
        .map_err(|e| ErrorObject::internal_error(format!("failed to encode result: {}", e)))
}

/// An async function usable as an RPC method.
///
/// `Args` is the tuple of argument types; it only exists to keep the
/// implementations for different arities apart.
pub trait Handler<Args>: Clone + Send + Sync + 'static {
    fn params() -> Vec<ParamDescriptor>;

    fn outputs() -> Vec<OutputDescriptor>;

    /// Binds `params` and starts the call. The caller has already checked
    /// that there are no more elements than parameters.
    fn invoke(&self, params: Vec<Value>) -> Result<HandlerFuture, ErrorObject>;
}

macro_rules! impl_handler {
    ($($ty:ident),*) => {
        impl<F, Fut, R, E, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Result<R, E>> + Send + 'static,
            R: IntoOutputs,
            E: fmt::Display + Send + 'static,
            $($ty: FromParam,)*
        {
            fn params() -> Vec<ParamDescriptor> {
                let descriptors: Vec<fn(usize) -> ParamDescriptor> =
                    vec![$(ParamDescriptor::of::<$ty>),*];
                descriptors
                    .into_iter()
                    .enumerate()
                    .map(|(index, describe)| describe(index))
                    .collect()
            }

            fn outputs() -> Vec<OutputDescriptor> {
                R::descriptors()
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn invoke(&self, params: Vec<Value>) -> Result<HandlerFuture, ErrorObject> {
                let mut args = params.into_iter();
                let mut index = 0usize;
                $(
                    let $ty = bind::<$ty>(index, args.next())?;
                    index += 1;
                )*
                let fut = (self)($($ty),*);
                Ok(Box::pin(async move {
                    match fut.await {
                        Ok(outputs) => encode_outputs(outputs),
                        Err(err) => Err(handler_error(err)),
                    }
                }))
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);

/// Object-safe view of a handler, stored in call sites.
pub(crate) trait ErasedHandler: Send + Sync {
    fn invoke(&self, params: Vec<Value>) -> Result<HandlerFuture, ErrorObject>;
}

pub(crate) struct BoundHandler<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> BoundHandler<H, Args> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _args: PhantomData,
        }
    }
}

impl<H, Args> ErasedHandler for BoundHandler<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn invoke(&self, params: Vec<Value>) -> Result<HandlerFuture, ErrorObject> {
        self.handler.invoke(params)
    }
}
