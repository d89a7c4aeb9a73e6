//! Declarative method signatures.
//!
//! An [`InterfaceDescription`] is plain data, typically loaded from JSON:
//!
//! ```json
//! {
//!   "methods": [
//!     { "name": "duplicateString",
//!       "params": [{ "name": "str", "type": "string" }],
//!       "returns": ["string", "error"] },
//!     { "name": "log",
//!       "params": [{ "name": "message", "type": "string" }],
//!       "returns": [] }
//!   ]
//! }
//! ```

use crate::coerce::TypeTag;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One named, typed parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
}

/// How a stub reaches the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    /// No return values: fire and forget.
    Notify,
    /// Trailing error return: wait for the response. `result` is the single
    /// non-error return type, if declared.
    Request { result: Option<TypeTag> },
}

/// Signature of one remote method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub returns: Vec<TypeTag>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: Vec::new(),
        }
    }

    /// Append a parameter.
    pub fn with_param(mut self, name: impl Into<String>, ty: TypeTag) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            ty,
        });
        self
    }

    /// Append a return type.
    pub fn with_return(mut self, ty: TypeTag) -> Self {
        self.returns.push(ty);
        self
    }

    /// Validate the signature and classify it.
    ///
    /// Accepted return lists are `[]`, `[error]` and `[T, error]`; anything
    /// else is a configuration error.
    pub fn kind(&self) -> Result<CallKind> {
        if self.name.is_empty() {
            return Err(RpcError::config("method name must not be empty"));
        }

        let mut seen = HashSet::new();
        for param in &self.params {
            if param.name.is_empty() {
                return Err(RpcError::config(format!(
                    "method {} has an unnamed parameter",
                    self.name
                )));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(RpcError::config(format!(
                    "method {} repeats parameter name {}",
                    self.name, param.name
                )));
            }
            if param.ty.is_error() {
                return Err(RpcError::config(format!(
                    "method {} parameter {} cannot be error-typed",
                    self.name, param.name
                )));
            }
        }

        match self.returns.as_slice() {
            [] => Ok(CallKind::Notify),
            [last] if last.is_error() => Ok(CallKind::Request { result: None }),
            [value, last] if last.is_error() && !value.is_error() => Ok(CallKind::Request {
                result: Some(value.clone()),
            }),
            [.., last] if !last.is_error() => Err(RpcError::config(format!(
                "method {} returns values without a trailing error",
                self.name
            ))),
            _ => Err(RpcError::config(format!(
                "method {} returns more than one value besides the error",
                self.name
            ))),
        }
    }
}

/// A set of remote method signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    #[serde(default)]
    pub methods: Vec<MethodSignature>,
}

impl InterfaceDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, signature: MethodSignature) -> Self {
        self.methods.push(signature);
        self
    }

    /// Parse a description from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validate every signature and reject duplicate method names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for signature in &self.methods {
            signature.kind()?;
            if !seen.insert(signature.name.as_str()) {
                return Err(RpcError::config(format!(
                    "method {} is declared twice",
                    signature.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_returns() {
        let notify = MethodSignature::new("log").with_param("message", TypeTag::String);
        assert_eq!(notify.kind().unwrap(), CallKind::Notify);

        let void = MethodSignature::new("ping").with_return(TypeTag::Error);
        assert_eq!(void.kind().unwrap(), CallKind::Request { result: None });

        let valued = MethodSignature::new("add")
            .with_param("a", TypeTag::Float)
            .with_param("b", TypeTag::Float)
            .with_return(TypeTag::Float)
            .with_return(TypeTag::Error);
        assert_eq!(
            valued.kind().unwrap(),
            CallKind::Request {
                result: Some(TypeTag::Float)
            }
        );
    }

    #[test]
    fn test_missing_trailing_error_rejected() {
        let signature = MethodSignature::new("count").with_return(TypeTag::Int);
        assert!(matches!(signature.kind(), Err(RpcError::Config { .. })));
    }

    #[test]
    fn test_two_values_rejected() {
        let signature = MethodSignature::new("pair")
            .with_return(TypeTag::Int)
            .with_return(TypeTag::Int)
            .with_return(TypeTag::Error);
        assert!(matches!(signature.kind(), Err(RpcError::Config { .. })));
    }

    #[test]
    fn test_duplicate_param_rejected() {
        let signature = MethodSignature::new("add")
            .with_param("a", TypeTag::Int)
            .with_param("a", TypeTag::Int);
        assert!(signature.kind().is_err());
    }

    #[test]
    fn test_description_from_json() {
        let description = InterfaceDescription::from_json(
            r#"{"methods": [
                {"name": "duplicateString",
                 "params": [{"name": "str", "type": "string"}],
                 "returns": ["string", "error"]},
                {"name": "sum", "params": [{"name": "values", "type": "array<int>"}],
                 "returns": ["int", "error"]}
            ]}"#,
        )
        .unwrap();
        description.validate().unwrap();
        assert_eq!(description.methods[1].params[0].ty.to_string(), "array<int>");
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let description = InterfaceDescription::new()
            .with_method(MethodSignature::new("log"))
            .with_method(MethodSignature::new("log"));
        assert!(matches!(description.validate(), Err(RpcError::Config { .. })));
    }
}
