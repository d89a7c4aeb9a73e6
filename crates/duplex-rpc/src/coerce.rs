//! Converting JSON values to declared parameter and return types.
//!
//! Two routes share the same error shape ([`RpcError::Cast`]):
//! - [`decode`] targets a static Rust type through serde, which covers
//!   numeric widening, map-to-struct and element-wise sequence conversion;
//! - [`coerce`] targets a runtime [`TypeTag`] from a declarative interface
//!   description and returns the normalized JSON value.

use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

const MAX_VALUE_PREVIEW: usize = 64;

/// Declared type of a parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeTag {
    Bool,
    Int,
    Float,
    String,
    Array(Box<TypeTag>),
    Map,
    Any,
    /// Marks the trailing error slot of a return list.
    Error,
}

impl TypeTag {
    pub fn is_error(&self) -> bool {
        matches!(self, TypeTag::Error)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Int => write!(f, "int"),
            TypeTag::Float => write!(f, "float"),
            TypeTag::String => write!(f, "string"),
            TypeTag::Array(inner) => write!(f, "array<{}>", inner),
            TypeTag::Map => write!(f, "map"),
            TypeTag::Any => write!(f, "any"),
            TypeTag::Error => write!(f, "error"),
        }
    }
}

impl FromStr for TypeTag {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s
            .strip_prefix("array<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Ok(TypeTag::Array(Box::new(inner.parse()?)));
        }
        match s {
            "bool" => Ok(TypeTag::Bool),
            "int" => Ok(TypeTag::Int),
            "float" => Ok(TypeTag::Float),
            "string" => Ok(TypeTag::String),
            "map" => Ok(TypeTag::Map),
            "any" => Ok(TypeTag::Any),
            "error" => Ok(TypeTag::Error),
            other => Err(RpcError::config(format!("unknown type tag: {:?}", other))),
        }
    }
}

impl TryFrom<String> for TypeTag {
    type Error = RpcError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.to_string()
    }
}

/// Decode a JSON value into a static Rust type.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    let preview = preview(&value);
    serde_json::from_value(value).map_err(|e| RpcError::Cast {
        target: std::any::type_name::<T>().to_string(),
        value: format!("{} ({})", preview, e),
    })
}

/// Coerce a JSON value to a declared [`TypeTag`].
pub fn coerce(value: Value, tag: &TypeTag) -> Result<Value> {
    match (tag, value) {
        (TypeTag::Any, value) => Ok(value),
        (TypeTag::Bool, value @ Value::Bool(_)) => Ok(value),
        (TypeTag::String, value @ Value::String(_)) => Ok(value),
        (TypeTag::Map, value @ Value::Object(_)) => Ok(value),
        (TypeTag::Int, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                return Ok(Value::Number(n));
            }
            // Integral floats narrow exactly; anything else is a cast error.
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(cast_error(tag, &Value::Number(n))),
            }
        }
        (TypeTag::Float, Value::Number(n)) => match n.as_f64() {
            Some(f) => Ok(Value::from(f)),
            None => Err(cast_error(tag, &Value::Number(n))),
        },
        (TypeTag::Array(inner), Value::Array(items)) => items
            .into_iter()
            .map(|item| coerce(item, inner))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        (tag, value) => Err(cast_error(tag, &value)),
    }
}

fn cast_error(tag: &TypeTag, value: &Value) -> RpcError {
    RpcError::Cast {
        target: tag.to_string(),
        value: preview(value),
    }
}

fn preview(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > MAX_VALUE_PREVIEW {
        let cut = (0..=MAX_VALUE_PREVIEW)
            .rev()
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(0);
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
