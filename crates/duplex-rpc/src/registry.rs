//! Method registry and invoker.
//!
//! A registration pairs a method name with a type-erased async callable and
//! the ordered names under which its parameters appear in an incoming params
//! object. Any `Fn(A1, .., An) -> impl Future<Output = Result<R, E>>` with
//! deserializable arguments and a serializable result is a [`Handler`]:
//!
//! ```rust,ignore
//! let mut registry = MethodRegistry::new();
//! registry.register_method("duplicateString", &["str"], |s: String| async move {
//!     Ok::<_, std::convert::Infallible>(format!("{s}{s}"))
//! })?;
//! ```
//!
//! The result shape follows from `R`: `()` is reported as an explicit null,
//! a single value as itself, a tuple as an ordered array. A handler error is
//! reported as an `InternalError` carrying the error's message.

use crate::coerce::decode;
use crate::error::{Result, RpcError};
use crate::message::ResponseError;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

/// Pending outcome of one invocation.
pub type InvokeFuture = BoxFuture<'static, std::result::Result<Value, ResponseError>>;

/// Argument decoding failure: position of the offending argument and cause.
pub type ArgumentError = (usize, RpcError);

/// An async callable that can be registered under a method name.
///
/// `Args` is the tuple of parameter types; it only disambiguates the
/// implementations for each arity.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Number of parameters the callable takes.
    const ARITY: usize;

    /// Decode `args` positionally and start the call.
    fn call(&self, args: Vec<Value>) -> std::result::Result<InvokeFuture, ArgumentError>;
}

fn finish<R, E>(outcome: std::result::Result<R, E>) -> std::result::Result<Value, ResponseError>
where
    R: Serialize,
    E: Display,
{
    match outcome {
        Ok(result) => serde_json::to_value(result).map_err(|e| {
            ResponseError::internal(format!("failed to serialize result: {}", e))
        }),
        Err(e) => Err(ResponseError::internal(e.to_string())),
    }
}

macro_rules! impl_handler {
    ($arity:literal; $($arg:ident),*) => {
        impl<F, Fut, R, E, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
            R: Serialize + Send + 'static,
            E: Display + Send + 'static,
            $($arg: DeserializeOwned + Send + 'static,)*
        {
            const ARITY: usize = $arity;

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn call(&self, args: Vec<Value>) -> std::result::Result<InvokeFuture, ArgumentError> {
                let mut args = args.into_iter();
                let mut index = 0;
                $(
                    // A missing trailing argument decodes as null.
                    let value = args.next().unwrap_or(Value::Null);
                    let $arg: $arg = decode(value).map_err(|e| (index, e))?;
                    index += 1;
                )*
                let pending = (self)($($arg),*);
                Ok(Box::pin(async move { finish(pending.await) }))
            }
        }
    };
}

impl_handler!(0;);
impl_handler!(1; A1);
impl_handler!(2; A1, A2);
impl_handler!(3; A1, A2, A3);
impl_handler!(4; A1, A2, A3, A4);
impl_handler!(5; A1, A2, A3, A4, A5);
impl_handler!(6; A1, A2, A3, A4, A5, A6);

type ErasedHandler =
    Arc<dyn Fn(Vec<Value>) -> std::result::Result<InvokeFuture, ArgumentError> + Send + Sync>;

struct Registration {
    params: Vec<String>,
    handler: ErasedHandler,
}

/// Maps method names to callables.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Registration>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    ///
    /// Fails with a configuration error if the number of parameter names does
    /// not match the handler's arity, a parameter name repeats, or the method
    /// is already registered.
    pub fn register_method<H, Args>(
        &mut self,
        name: impl Into<String>,
        params: &[&str],
        handler: H,
    ) -> Result<()>
    where
        H: Handler<Args>,
    {
        let name = name.into();
        if params.len() != H::ARITY {
            return Err(RpcError::config(format!(
                "method {} declares {} parameter names but its handler takes {}",
                name,
                params.len(),
                H::ARITY
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = params.iter().find(|p| !seen.insert(**p)) {
            return Err(RpcError::config(format!(
                "method {} repeats parameter name {}",
                name, dup
            )));
        }
        if self.methods.contains_key(&name) {
            return Err(RpcError::config(format!(
                "method {} is already registered",
                name
            )));
        }

        let handler: ErasedHandler = Arc::new(move |args| handler.call(args));
        self.methods.insert(
            name,
            Registration {
                params: params.iter().map(|p| p.to_string()).collect(),
                handler,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Ordered parameter names of a registered method.
    pub fn params(&self, name: &str) -> Option<&[String]> {
        self.methods.get(name).map(|r| r.params.as_slice())
    }

    /// Start invoking `method` with a by-name (object) or by-position (array)
    /// params value.
    ///
    /// The returned future owns everything it needs, so the registry may be
    /// released before it is awaited.
    pub fn invoke(&self, method: &str, params: Value) -> InvokeFuture {
        match self.start(method, params) {
            Ok(pending) => pending,
            Err(err) => {
                let error = ResponseError::from(&err);
                Box::pin(async move { Err(error) })
            }
        }
    }

    fn start(&self, method: &str, params: Value) -> Result<InvokeFuture> {
        let registration = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound {
                method: method.to_string(),
            })?;
        let names = &registration.params;

        let args = match params {
            Value::Object(mut map) => names
                .iter()
                .map(|name| map.remove(name).unwrap_or(Value::Null))
                .collect(),
            Value::Array(mut items) if items.len() <= names.len() => {
                items.resize(names.len(), Value::Null);
                items
            }
            Value::Array(items) => {
                return Err(RpcError::InvalidParams {
                    method: method.to_string(),
                    message: format!("expected at most {} arguments, got {}", names.len(), items.len()),
                });
            }
            Value::Null => vec![Value::Null; names.len()],
            other => {
                return Err(RpcError::InvalidParams {
                    method: method.to_string(),
                    message: format!("params must be an object or array, got {}", other),
                });
            }
        };

        (registration.handler)(args).map_err(|(index, err)| {
            let param = names.get(index).map(String::as_str).unwrap_or("?");
            RpcError::InvalidParams {
                method: method.to_string(),
                message: format!("parameter {}: {}", param, err),
            }
        })
    }
}
