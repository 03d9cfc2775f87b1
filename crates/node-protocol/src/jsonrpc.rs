//! JSON-RPC 2.0 envelopes.
//!
//! Requests carry a string id and an explicit params list. Responses are
//! never deserialized into a struct with both `result` and `error`
//! optional; [`Message::from_value`] decodes them once into an [`Outcome`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 request (has an `id`, expects a response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            method: method.into(),
            params: normalize_params(params),
        }
    }

    /// An empty envelope, suitable for pooling and later refilling.
    pub fn empty() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: String::new(),
            method: String::new(),
            params: Value::Array(Vec::new()),
        }
    }

    /// Overwrite every field in place, keeping the existing allocations
    /// where possible.
    pub fn refill(&mut self, id: &str, method: &str, params: Value) {
        if self.jsonrpc != JSONRPC_VERSION {
            self.jsonrpc = JSONRPC_VERSION.into();
        }
        self.id.clear();
        self.id.push_str(id);
        self.method.clear();
        self.method.push_str(method);
        self.params = normalize_params(params);
    }
}

/// `null` params become an empty positional list; everything else is
/// passed through untouched.
pub fn normalize_params(params: Value) -> Value {
    match params {
        Value::Null => Value::Array(Vec::new()),
        other => other,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// The decoded result of one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(JsonRpcError),
}

impl Outcome {
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(e) => Err(e),
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

/// One inbound JSON-RPC message.
///
/// `id` is `None` for server notifications (e.g. subscription pushes) and
/// for responses whose id is neither a string nor a number.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<String>,
    /// Set for notifications; responses carry no method.
    pub method: Option<String>,
    pub outcome: Outcome,
}

impl Message {
    /// Decode one JSON value into a message.
    ///
    /// Returns `None` when the value is not a JSON-RPC object (or has a
    /// malformed `error` member).
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let wire: WireResponse = serde_json::from_value(value).ok()?;
        let outcome = match wire.error {
            Some(err) => Outcome::Failure(err),
            None => Outcome::Success(wire.result.or(wire.params).unwrap_or(Value::Null)),
        };
        Some(Self {
            id: wire.id.as_ref().and_then(normalize_id),
            method: wire.method,
            outcome,
        })
    }

    /// Decode a value that may be a single message or a batch response
    /// array. Non-message elements are skipped.
    pub fn from_value_flat(value: Value) -> Vec<Self> {
        match value {
            Value::Array(items) => items.into_iter().filter_map(Self::from_value).collect(),
            other => Self::from_value(other).into_iter().collect(),
        }
    }
}

/// Render an inbound id the same way outbound ids are rendered: strings
/// as-is, numbers in decimal. `null` and anything else count as absent.
pub fn normalize_id(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_request() {
        let req = JsonRpcRequest::new("1", "eth_blockNumber", json!([]));
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"jsonrpc":"2.0","id":"1","method":"eth_blockNumber","params":[]}"#
        );
    }

    #[test]
    fn null_params_become_empty_list() {
        let req = JsonRpcRequest::new("7", "net_version", Value::Null);
        assert_eq!(req.params, json!([]));
    }

    #[test]
    fn refill_reuses_envelope() {
        let mut req = JsonRpcRequest::empty();
        req.refill("3", "eth_getBalance", json!(["0xabc", "latest"]));
        assert_eq!(req, JsonRpcRequest::new("3", "eth_getBalance", json!(["0xabc", "latest"])));
        req.refill("4", "eth_chainId", Value::Null);
        assert_eq!(req.id, "4");
        assert_eq!(req.params, json!([]));
    }

    #[test]
    fn decode_success_response() {
        let msg = Message::from_value(json!({"id":"1","jsonrpc":"2.0","result":"0x10"})).unwrap();
        assert_eq!(msg.id.as_deref(), Some("1"));
        assert_eq!(msg.outcome, Outcome::Success(json!("0x10")));
    }

    #[test]
    fn decode_null_result_is_success() {
        let msg = Message::from_value(json!({"id":2,"jsonrpc":"2.0","result":null})).unwrap();
        assert_eq!(msg.id.as_deref(), Some("2"));
        assert_eq!(msg.outcome, Outcome::Success(Value::Null));
    }

    #[test]
    fn decode_error_response() {
        let raw = json!({"jsonrpc":"2.0","id":"9","error":{"code":-32601,"message":"the method does not exist"}});
        let msg = Message::from_value(raw).unwrap();
        let err = msg.outcome.into_result().unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(format!("{err}"), "JSON-RPC error -32601: the method does not exist");
    }

    #[test]
    fn decode_notification_has_no_id() {
        let raw = json!({
            "jsonrpc":"2.0",
            "method":"eth_subscription",
            "params":{"subscription":"0x1","result":{}}
        });
        let msg = Message::from_value(raw).unwrap();
        assert!(msg.id.is_none());
        assert_eq!(msg.method.as_deref(), Some("eth_subscription"));
    }

    #[test]
    fn non_object_is_not_a_message() {
        assert!(Message::from_value(json!("0x10")).is_none());
        assert!(Message::from_value(json!(42)).is_none());
    }

    #[test]
    fn batch_response_is_flattened() {
        let raw = json!([
            {"jsonrpc":"2.0","id":"1","result":"0x1"},
            "junk",
            {"jsonrpc":"2.0","id":"2","error":{"code":-32000,"message":"boom"}}
        ]);
        let msgs = Message::from_value_flat(raw);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].id.as_deref(), Some("1"));
        assert!(matches!(msgs[1].outcome, Outcome::Failure(_)));
    }

    #[test]
    fn odd_ids_count_as_absent() {
        assert_eq!(normalize_id(&json!(null)), None);
        assert_eq!(normalize_id(&json!({"x":1})), None);
        assert_eq!(normalize_id(&json!(12)), Some("12".into()));
    }
}
