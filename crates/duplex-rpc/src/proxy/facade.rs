//! Dynamic stubs bound to a communicator.

use super::signature::{CallKind, InterfaceDescription, MethodSignature};
use super::typed::{Arguments, Caller, Notifier};
use crate::coerce::coerce;
use crate::communicator::Communicator;
use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// One remote method, callable with JSON arguments.
#[derive(Debug, Clone)]
pub struct Stub {
    signature: MethodSignature,
    kind: CallKind,
    communicator: Communicator,
}

impl Stub {
    /// Bind `signature` to `communicator`, validating it first.
    pub fn bind(signature: MethodSignature, communicator: Communicator) -> Result<Self> {
        let kind = signature.kind()?;
        Ok(Self {
            signature,
            kind,
            communicator,
        })
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn kind(&self) -> &CallKind {
        &self.kind
    }

    pub fn arity(&self) -> usize {
        self.signature.params.len()
    }

    /// Invoke the remote method with positional arguments.
    ///
    /// Arguments are coerced to the declared parameter types and sent by name.
    /// A notification stub returns `Value::Null` once the frame is written; a
    /// request stub returns the result coerced to the declared return type, or
    /// `Value::Null` if only an error return is declared.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        if args.len() != self.arity() {
            return Err(RpcError::InvalidParams {
                method: self.signature.name.clone(),
                message: format!("expected {} arguments, got {}", self.arity(), args.len()),
            });
        }

        let mut params = Map::new();
        for (param, arg) in self.signature.params.iter().zip(args) {
            params.insert(param.name.clone(), coerce(arg, &param.ty)?);
        }
        let params = Value::Object(params);

        match &self.kind {
            CallKind::Notify => {
                self.communicator.notify(&self.signature.name, params).await?;
                Ok(Value::Null)
            }
            CallKind::Request { result: None } => {
                let raw = self.communicator.request(&self.signature.name, params).await?;
                if !raw.is_null() {
                    debug!("Ignoring result of {}: no return value declared", self.signature.name);
                }
                Ok(Value::Null)
            }
            CallKind::Request { result: Some(tag) } => {
                let raw = self.communicator.request(&self.signature.name, params).await?;
                coerce(raw, tag)
            }
        }
    }
}

/// Named stubs for every method of an [`InterfaceDescription`].
///
/// Every signature is validated when the facade is bound, so a bad
/// declaration never surfaces at call time.
#[derive(Debug, Clone)]
pub struct Facade {
    stubs: BTreeMap<String, Stub>,
}

impl Facade {
    pub fn bind(description: &InterfaceDescription, communicator: &Communicator) -> Result<Self> {
        description.validate()?;
        let mut stubs = BTreeMap::new();
        for signature in &description.methods {
            let stub = Stub::bind(signature.clone(), communicator.clone())?;
            stubs.insert(signature.name.clone(), stub);
        }
        debug!("Bound facade with {} stubs", stubs.len());
        Ok(Self { stubs })
    }

    pub fn stub(&self, name: &str) -> Option<&Stub> {
        self.stubs.get(name)
    }

    /// Declared method names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stubs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Call a declared method by name.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.lookup(name)?.call(args).await
    }

    /// Typed handle for a notification-style method.
    pub fn notifier<A: Arguments>(&self, name: &str) -> Result<Notifier<A>> {
        Notifier::new(self.lookup(name)?.clone())
    }

    /// Typed handle for a request-style method.
    pub fn caller<A: Arguments, R: DeserializeOwned>(&self, name: &str) -> Result<Caller<A, R>> {
        Caller::new(self.lookup(name)?.clone())
    }

    fn lookup(&self, name: &str) -> Result<&Stub> {
        self.stubs.get(name).ok_or_else(|| RpcError::MethodNotFound {
            method: name.to_string(),
        })
    }
}
