//! JSON-RPC 2.0 messages exchanged over a session, using the MCP method names.

use crate::error::RelayError;
use crate::types::{ContentBlock, ToolDescriptor, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    /// Pushed by the server right after a session opens.
    pub const TOOLS_CATALOG: &str = "notifications/tools/catalog";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
}

pub mod codes {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const UNKNOWN_TOOL: i64 = -32002;
    pub const TOOL_EXECUTION: i64 = -32003;
    pub const SESSION_NOT_FOUND: i64 = -32004;
}

/// Request identifier; JSON-RPC allows numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Encode an error for the wire, keeping enough detail to rebuild it on the
    /// other side.
    pub fn from_relay_error(err: &RelayError) -> Self {
        let (code, data) = match err {
            RelayError::UnknownTool(name) => (codes::UNKNOWN_TOOL, json!({ "tool": name })),
            RelayError::InvalidArguments { tool_name, message } => (
                codes::INVALID_PARAMS,
                json!({ "tool": tool_name, "detail": message }),
            ),
            RelayError::ToolExecution { tool_name, message } => (
                codes::TOOL_EXECUTION,
                json!({ "tool": tool_name, "detail": message }),
            ),
            RelayError::SessionNotFound(id) => {
                (codes::SESSION_NOT_FOUND, json!({ "session": id }))
            }
            RelayError::Protocol(message) => (codes::INVALID_REQUEST, json!({ "detail": message })),
            other => (codes::INTERNAL_ERROR, json!({ "detail": other.to_string() })),
        };
        Self {
            code,
            message: err.to_string(),
            data: Some(data),
        }
    }

    fn data_str(&self, key: &str) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Map a wire error back into the local error taxonomy.
    pub fn into_relay_error(self) -> RelayError {
        let tool = self.data_str("tool").unwrap_or_default();
        let detail = self.data_str("detail").unwrap_or_else(|| self.message.clone());
        match self.code {
            codes::UNKNOWN_TOOL => {
                RelayError::UnknownTool(if tool.is_empty() { self.message } else { tool })
            }
            codes::INVALID_PARAMS => RelayError::invalid_arguments(tool, detail),
            codes::TOOL_EXECUTION => RelayError::tool_execution(tool, detail),
            codes::SESSION_NOT_FOUND => RelayError::SessionNotFound(
                self.data_str("session").unwrap_or(self.message),
            ),
            code => RelayError::Protocol(format!("JSON-RPC error {}: {}", code, self.message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn method_not_found(id: Option<RequestId>, method: &str) -> Self {
        Self::failure(
            id,
            JsonRpcError::new(
                codes::METHOD_NOT_FOUND,
                format!("Method '{}' is not supported", method),
            ),
        )
    }

    /// Success payload, or the decoded error.
    pub fn into_result(self) -> Result<Value, RelayError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error.into_relay_error()),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Any message that can travel over a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(value: JsonRpcRequest) -> Self {
        Self::Request(value)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(value: JsonRpcResponse) -> Self {
        Self::Response(value)
    }
}

// ── MCP payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Implementation,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl From<ToolResult> for CallToolResult {
    fn from(value: ToolResult) -> Self {
        Self {
            content: value.content,
            is_error: false,
        }
    }
}

impl CallToolResult {
    /// Convert to a tool result; results flagged `isError` by the server become
    /// tool execution errors.
    pub fn into_tool_result(self, tool_name: &str) -> Result<ToolResult, RelayError> {
        let result = ToolResult {
            content: self.content,
        };
        if self.is_error {
            Err(RelayError::tool_execution(tool_name, result.joined_text()))
        } else {
            Ok(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_distinguishes_request_and_response() {
        let request: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}
        }))
        .unwrap();
        assert!(matches!(request, JsonRpcMessage::Request(ref r) if r.method == "tools/list"));

        let response: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": "req-1", "result": {"tools": []}
        }))
        .unwrap();
        assert!(matches!(
            response,
            JsonRpcMessage::Response(ref r) if r.id == Some(RequestId::String("req-1".into()))
        ));
    }

    #[test]
    fn test_notification_omits_id() {
        let note = JsonRpcRequest::notification(methods::INITIALIZED, json!({}));
        let value = serde_json::to_value(&note).unwrap();
        assert!(value.get("id").is_none());
        assert!(note.is_notification());
    }

    #[test]
    fn test_error_survives_the_wire() {
        let original = RelayError::tool_execution("createPost", "rate limited");
        let wire = JsonRpcError::from_relay_error(&original);
        assert_eq!(wire.code, codes::TOOL_EXECUTION);

        let encoded = serde_json::to_string(&wire).unwrap();
        let decoded: JsonRpcError = serde_json::from_str(&encoded).unwrap();
        match decoded.into_relay_error() {
            RelayError::ToolExecution { tool_name, message } => {
                assert_eq!(tool_name, "createPost");
                assert_eq!(message, "rate limited");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unmapped_code_becomes_protocol_error() {
        let err = JsonRpcError::new(-32099, "weird").into_relay_error();
        assert!(matches!(err, RelayError::Protocol(ref m) if m.contains("-32099")));
    }

    #[test]
    fn test_is_error_result_maps_to_tool_execution() {
        let result = CallToolResult {
            content: vec![ContentBlock::text("upstream refused")],
            is_error: true,
        };
        let err = result.into_tool_result("createPost").unwrap_err();
        assert!(matches!(err, RelayError::ToolExecution { .. }));
    }
}
