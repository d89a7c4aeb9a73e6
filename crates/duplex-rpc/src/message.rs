//! JSON-RPC 2.0 message model.
//!
//! Four wire shapes share the `"jsonrpc":"2.0"` envelope: [`Request`],
//! [`Notification`], [`Response`] and the [`ResponseError`] a failed response
//! carries. [`Message::unmarshal`] classifies an inbound body by which members
//! are present; batches are not supported.

use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// A call that expects a [`Response`] with the same id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A one-way call: no id, no reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }
}

impl From<&RpcError> for ResponseError {
    fn from(err: &RpcError) -> Self {
        match err {
            RpcError::Remote {
                code,
                message,
                data,
            } => Self {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => Self::new(other.to_rpc_error_code(), other.to_string()),
        }
    }
}

impl From<ResponseError> for RpcError {
    fn from(err: ResponseError) -> Self {
        RpcError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// The reply to a [`Request`]. Carries either a result or an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    pub outcome: std::result::Result<Value, ResponseError>,
}

impl Response {
    /// Successful response. A void result is `Value::Null`, which is still
    /// written as an explicit `"result":null`.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: Value, error: ResponseError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Err(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Turn the response into the caller-visible result.
    pub fn into_result(self) -> Result<Value> {
        self.outcome.map_err(RpcError::from)
    }
}

#[derive(Serialize)]
struct WireResponse<'a> {
    jsonrpc: &'a str,
    id: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ResponseError>,
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireResponse {
            jsonrpc: &self.jsonrpc,
            id: &self.id,
            result: self.outcome.as_ref().ok(),
            error: self.outcome.as_ref().err(),
        }
        .serialize(serializer)
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Parse and classify a message body.
    ///
    /// - `method` and `id` present: request
    /// - `method` without `id`: notification
    /// - `id` without `method`, with exactly one of `result`/`error`: response
    ///
    /// Anything else is an [`RpcError::InvalidMessage`] that keeps the id when
    /// one was present, so the caller can answer it.
    pub fn unmarshal(raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)?;
        let Value::Object(mut map) = value else {
            return Err(invalid(
                "expected a JSON object (batches are not supported)",
                None,
            ));
        };

        let id = map.remove("id");
        let method = map.remove("method");

        if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(invalid("expected jsonrpc 2.0", id));
        }

        match (method, id) {
            (Some(Value::String(method)), Some(id)) => Ok(Message::Request(Request {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                method,
                params: take_params(&mut map),
            })),
            (Some(Value::String(method)), None) => Ok(Message::Notification(Notification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params: take_params(&mut map),
            })),
            (Some(_), id) => Err(invalid("method must be a string", id)),
            (None, Some(id)) => match (map.remove("result"), map.remove("error")) {
                (Some(result), None) => Ok(Message::Response(Response::success(id, result))),
                (None, Some(error)) => match serde_json::from_value::<ResponseError>(error) {
                    Ok(error) => Ok(Message::Response(Response::failure(id, error))),
                    Err(e) => Err(invalid(format!("malformed error object: {}", e), Some(id))),
                },
                _ => Err(invalid(
                    "response must carry exactly one of result or error",
                    Some(id),
                )),
            },
            (None, None) => Err(invalid("message has neither method nor id", None)),
        }
    }

    /// Serialize the message body.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Message::Request(request) => serde_json::to_vec(request)?,
            Message::Notification(notification) => serde_json::to_vec(notification)?,
            Message::Response(response) => serde_json::to_vec(response)?,
        };
        Ok(bytes)
    }
}

fn take_params(map: &mut Map<String, Value>) -> Value {
    match map.remove("params") {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(params) => params,
    }
}

fn invalid(message: impl Into<String>, id: Option<Value>) -> RpcError {
    RpcError::InvalidMessage {
        message: message.into(),
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_order() {
        let request = Request::new(1, "duplicateString", json!({"str": "parameter"}));
        let bytes = serde_json::to_string(&request).unwrap();
        assert_eq!(
            bytes,
            r#"{"jsonrpc":"2.0","id":1,"method":"duplicateString","params":{"str":"parameter"}}"#
        );
    }

    #[test]
    fn test_notification_has_no_id() {
        let notification = Notification::new("notifyThing", json!({"str": "x"}));
        let value = serde_json::to_value(&notification).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], "notifyThing");
    }

    #[test]
    fn test_void_success_is_explicit_null() {
        let response = Response::success(json!(1), Value::Null);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"result":null}"#
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let response = Response::failure(json!(1), ResponseError::internal("boom"));
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"boom"}}"#
        );
    }

    #[test]
    fn test_classify_request_and_notification() {
        let request = Message::unmarshal(br#"{"jsonrpc":"2.0","id":7,"method":"m","params":{"a":1}}"#)
            .unwrap();
        assert!(matches!(request, Message::Request(ref r) if r.id == json!(7) && r.method == "m"));

        let notification = Message::unmarshal(br#"{"jsonrpc":"2.0","method":"n"}"#).unwrap();
        match notification {
            Message::Notification(n) => assert_eq!(n.params, json!({})),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_null_result_as_success() {
        let message = Message::unmarshal(br#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert_eq!(
            message,
            Message::Response(Response::success(json!(3), Value::Null))
        );
    }

    #[test]
    fn test_classify_error_response() {
        let message = Message::unmarshal(
            br#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        let Message::Response(response) = message else {
            panic!("expected response");
        };
        match response.into_result() {
            Err(RpcError::Remote { code, message, .. }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "nope");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_response_with_both_members_is_invalid() {
        let err = Message::unmarshal(
            br#"{"jsonrpc":"2.0","id":4,"result":1,"error":{"code":1,"message":"x"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RpcError::InvalidMessage { id: Some(ref id), .. } if *id == json!(4)));
    }

    #[test]
    fn test_batch_is_rejected() {
        let err = Message::unmarshal(br#"[{"jsonrpc":"2.0","method":"n"}]"#).unwrap_err();
        assert!(matches!(err, RpcError::InvalidMessage { id: None, .. }));
    }

    #[test]
    fn test_wrong_version_keeps_id() {
        let err = Message::unmarshal(br#"{"jsonrpc":"1.0","id":9,"method":"m"}"#).unwrap_err();
        assert!(matches!(err, RpcError::InvalidMessage { id: Some(ref id), .. } if *id == json!(9)));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = Message::unmarshal(b"not json").unwrap_err();
        assert_eq!(err.to_rpc_error_code(), ResponseError::PARSE_ERROR);
    }
}
