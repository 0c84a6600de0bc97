//! JSON-RPC 2.0 types for the MCP endpoint.
//!
//! Server-side request ids are arbitrary JSON values (numbers, strings,
//! or null) and are echoed back verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Error codes used on this surface.
pub const SESSION_ERROR: i64 = -32000;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An incoming JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// The id to echo in a response (null for notifications that still
    /// need an error reply).
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

/// A request body: one request or a batch of them.
#[derive(Debug, Clone)]
pub enum RpcBody {
    Single(JsonRpcRequest),
    Batch(Vec<JsonRpcRequest>),
}

impl RpcBody {
    /// Parse an already-deserialized JSON body.
    pub fn parse(value: Value) -> Result<Self, String> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err("empty batch".into());
                }
                let mut requests = Vec::with_capacity(items.len());
                for item in items {
                    requests.push(
                        serde_json::from_value(item)
                            .map_err(|e| format!("malformed batch entry: {e}"))?,
                    );
                }
                Ok(RpcBody::Batch(requests))
            }
            other => serde_json::from_value(other)
                .map(RpcBody::Single)
                .map_err(|e| format!("malformed request: {e}")),
        }
    }

    pub fn requests(&self) -> &[JsonRpcRequest] {
        match self {
            RpcBody::Single(req) => std::slice::from_ref(req),
            RpcBody::Batch(reqs) => reqs,
        }
    }

    /// Whether any entry is the `initialize` handshake.
    pub fn contains_initialize(&self) -> bool {
        self.requests().iter().any(|r| r.method == "initialize")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP payload helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool definition in `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The `initialize` result payload.
pub fn initialize_result() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": "searchgate",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// A `tools/call` result carrying one text content block.
pub fn tool_text_result(text: String, is_error: bool) -> Value {
    serde_json::json!({
        "content": [ { "type": "text", "text": text } ],
        "isError": is_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_request_parses() {
        let body = RpcBody::parse(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/list",
        }))
        .unwrap();
        assert_eq!(body.requests().len(), 1);
        assert_eq!(body.requests()[0].method, "tools/list");
        assert!(!body.requests()[0].is_notification());
    }

    #[test]
    fn string_and_null_ids_are_preserved() {
        let body = RpcBody::parse(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "req-9",
            "method": "ping",
        }))
        .unwrap();
        assert_eq!(body.requests()[0].response_id(), Value::String("req-9".into()));

        let notif = RpcBody::parse(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .unwrap();
        assert!(notif.requests()[0].is_notification());
        assert_eq!(notif.requests()[0].response_id(), Value::Null);
    }

    #[test]
    fn batch_parses_and_detects_initialize() {
        let body = RpcBody::parse(serde_json::json!([
            { "jsonrpc": "2.0", "id": 1, "method": "initialize" },
            { "jsonrpc": "2.0", "id": 2, "method": "tools/list" },
        ]))
        .unwrap();
        assert_eq!(body.requests().len(), 2);
        assert!(body.contains_initialize());
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(RpcBody::parse(serde_json::json!([])).is_err());
    }

    #[test]
    fn malformed_entry_is_rejected() {
        assert!(RpcBody::parse(serde_json::json!([{ "no": "method" }])).is_err());
        assert!(RpcBody::parse(serde_json::json!("just text")).is_err());
    }

    #[test]
    fn response_serialization_shape() {
        let ok = JsonRpcResponse::ok(Value::from(3), serde_json::json!({"tools": []}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 3);
        assert!(json.get("error").is_none());

        let err = JsonRpcResponse::error(Value::Null, SESSION_ERROR, "No valid session ID provided");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"]["code"], SESSION_ERROR);
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("session ID"));
    }

    #[test]
    fn tool_result_shape() {
        let result = tool_text_result("payload".into(), false);
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["isError"], false);
    }
}
