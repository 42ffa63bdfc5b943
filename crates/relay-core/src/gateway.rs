use crate::error::RelayError;
use crate::protocol::CallToolResult;
use crate::types::{ToolDescriptor, ToolInvocation, ToolResult};
use async_trait::async_trait;
use serde_json::Value;

/// The agent's view of a tool server: list what is available and call it.
///
/// Implementations route calls through a session; a call on a session that
/// closes mid-flight resolves with [`RelayError::SessionNotFound`].
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Tools announced by the server.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RelayError>;

    /// Invoke a tool and wait for its result.
    async fn call_tool(&self, invocation: &ToolInvocation) -> Result<ToolResult, RelayError>;
}

/// Decode the `result` member of a `tools/call` response.
pub fn decode_call_result(tool_name: &str, value: Value) -> Result<ToolResult, RelayError> {
    let result: CallToolResult = serde_json::from_value(value)
        .map_err(|e| RelayError::Protocol(format!("malformed tools/call result: {}", e)))?;
    result.into_tool_result(tool_name)
}
