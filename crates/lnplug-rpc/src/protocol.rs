//! JSON-RPC 2.0 message types for the plugin dialect.
//!
//! The host speaks plain JSON-RPC 2.0 with one dialect quirk: the `error`
//! member of a failure reply sent *by* a plugin is a flat string rather than
//! an error object. Replies received *from* the node over its RPC socket use
//! conventional `{code, message}` error objects; [`NodeError`] covers those.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 Request ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC 2.0 Request.
///
/// An absent `id` makes this a notification: no reply may ever be written
/// for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }
}

/// JSON-RPC 2.0 Response.
///
/// `error` is an arbitrary [`Value`]: the plugin dialect writes flat strings,
/// the node socket returns `{code, message}` objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub id: RequestId,
}

impl Response {
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn failure(id: RequestId, error: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(Value::String(error.into())),
            id,
        }
    }
}

/// JSON-RPC 2.0 Notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Error object returned by the node's RPC socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for NodeError {}

/// Incoming message that could be a request, response, or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(r) if r.id.is_some())
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        matches!(self, Message::Request(r) if r.id.is_none())
            || matches!(self, Message::Notification(_))
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::new("test", Some(serde_json::json!({"key": "value"})), 1.into());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"test\""));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn test_request_without_params() {
        let req = Request::new("getmanifest", None, 1.into());
        let json = serde_json::to_string(&req).unwrap();
        assert!(
            !json.contains("\"params\""),
            "params should be omitted when None"
        );
    }

    #[test]
    fn test_notification_no_id() {
        let notif = Request::notification("connect", None);
        let json = serde_json::to_string(&notif).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_notification_struct() {
        let notif = Notification::new(
            "log",
            Some(serde_json::json!({"level": "info", "message": "hi"})),
        );
        let json = serde_json::to_string(&notif).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"log\""));
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_response_success() {
        let resp = Response::success(1.into(), serde_json::json!({"status": "ok"}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_response_failure_is_flat_string() {
        let resp = Response::failure(1.into(), "Error while processing foo: boom");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"result\""));
        assert!(json.contains("\"error\":\"Error while processing foo: boom\""));
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = Response::success(42.into(), serde_json::json!({"data": [1, 2, 3]}));
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, RequestId::Number(42));
        assert!(parsed.result.is_some());
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_request_id_serialization() {
        let id_num = RequestId::Number(123);
        assert_eq!(serde_json::to_string(&id_num).unwrap(), "123");

        let id_str = RequestId::String("abc".to_string());
        assert_eq!(serde_json::to_string(&id_str).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_request_id_deserialization() {
        let id: RequestId = serde_json::from_str("456").unwrap();
        assert_eq!(id, RequestId::Number(456));

        let id: RequestId = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(id, RequestId::String("xyz".to_string()));
    }

    #[test]
    fn test_message_parse_request() {
        let json = r#"{"jsonrpc":"2.0","method":"test","params":{"x":1},"id":1}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.is_request());
        assert!(!msg.is_notification());
        assert!(!msg.is_response());
    }

    #[test]
    fn test_message_parse_notification() {
        // Without an id this parses as a Request with id: None, which still
        // counts as a notification.
        let json = r#"{"jsonrpc":"2.0","method":"invoice_payment","params":{}}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.is_notification());
        assert!(!msg.is_request());
    }

    #[test]
    fn test_message_parse_response() {
        let json = r#"{"jsonrpc":"2.0","result":{"ok":true},"id":1}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.is_response());
        assert!(!msg.is_request());
        assert!(!msg.is_notification());
    }

    #[test]
    fn test_message_parse_node_error_response() {
        let json = r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":1}"#;
        let msg: Message = serde_json::from_str(json).unwrap();

        let Message::Response(resp) = msg else {
            panic!("Expected Response");
        };
        let err: NodeError = serde_json::from_value(resp.error.unwrap()).unwrap();
        assert_eq!(err.code, -32601);
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn test_node_error_display() {
        let err = NodeError {
            code: -32602,
            message: "bad params".to_string(),
            data: None,
        };
        assert_eq!(err.to_string(), "node error -32602: bad params");
    }
}
