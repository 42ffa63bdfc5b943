//! Routes requests arriving on a session to the tool registry and pushes the
//! answers back down the same session.

use crate::transport::{SessionStream, SessionTransport};
use futures::FutureExt;
use relay_core::error::RelayError;
use relay_core::protocol::{
    codes, methods, CallToolResult, Implementation, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId,
    PROTOCOL_VERSION,
};
use relay_core::tool_registry::ToolRegistry;
use relay_core::types::{SessionId, ToolInvocation};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Binds a tool registry to a session transport.
#[derive(Clone)]
pub struct DispatchServer {
    registry: Arc<ToolRegistry>,
    transport: SessionTransport,
    server_info: Implementation,
    in_flight: Arc<Mutex<HashSet<(SessionId, RequestId)>>>,
}

impl DispatchServer {
    pub fn new(registry: Arc<ToolRegistry>, transport: SessionTransport, name: &str) -> Self {
        Self {
            registry,
            transport,
            server_info: Implementation {
                name: name.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    /// Open a session for a new client: announce the tool catalog on its
    /// stream and start handling what it posts. Must be called inside a Tokio
    /// runtime.
    pub fn connect(&self) -> (SessionId, SessionStream) {
        let opened = self.transport.open_session();
        let id = opened.id;

        let tools = ListToolsResult {
            tools: self.registry.list(),
        };
        let catalog = JsonRpcRequest::notification(methods::TOOLS_CATALOG, json!(tools));
        if let Err(e) = self.transport.push(&id, catalog.into()) {
            warn!(session_id = %id, error = %e, "Failed to announce tool catalog");
        }

        tokio::spawn(self.clone().pump(id.clone(), opened.inbound));
        (id, opened.stream)
    }

    /// Drain one session's inbound queue. Each request runs on its own task so
    /// a slow tool does not hold up pings or other calls.
    async fn pump(self, session_id: SessionId, mut inbound: mpsc::UnboundedReceiver<JsonRpcMessage>) {
        while let Some(message) = inbound.recv().await {
            match message {
                JsonRpcMessage::Request(request) => {
                    let this = self.clone();
                    let session_id = session_id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_request(&session_id, request).await {
                            warn!(session_id = %session_id, error = %e, "Response not delivered");
                        }
                    });
                }
                JsonRpcMessage::Response(response) => {
                    debug!(session_id = %session_id, id = ?response.id, "Ignoring client response");
                }
            }
        }
        debug!(session_id = %session_id, "Inbound handler stopped");
    }

    /// Handle one request or notification from a session. Requests get exactly
    /// one response pushed to the same session.
    pub async fn handle_request(
        &self,
        session_id: &SessionId,
        request: JsonRpcRequest,
    ) -> Result<(), RelayError> {
        let Some(id) = request.id.clone() else {
            match request.method.as_str() {
                methods::INITIALIZED => info!(session_id = %session_id, "Client initialized"),
                other => debug!(session_id = %session_id, method = other, "Ignoring notification"),
            }
            return Ok(());
        };

        let params = request.params.unwrap_or(Value::Null);
        let response = match request.method.as_str() {
            methods::INITIALIZE => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: json!({ "tools": {} }),
                    server_info: self.server_info.clone(),
                };
                JsonRpcResponse::success(Some(id), serde_json::to_value(result)?)
            }
            methods::PING => JsonRpcResponse::success(Some(id), json!({})),
            methods::TOOLS_LIST => {
                let result = ListToolsResult {
                    tools: self.registry.list(),
                };
                JsonRpcResponse::success(Some(id), serde_json::to_value(result)?)
            }
            methods::TOOLS_CALL => match call_params(params) {
                Ok(invocation) => {
                    return self
                        .handle_invocation_request(
                            session_id,
                            id,
                            &invocation.tool_name,
                            invocation.arguments,
                        )
                        .await;
                }
                Err(message) => JsonRpcResponse::failure(
                    Some(id),
                    JsonRpcError::new(codes::INVALID_PARAMS, message),
                ),
            },
            other => JsonRpcResponse::method_not_found(Some(id), other),
        };

        self.transport.push(session_id, response.into())
    }

    /// Run a tool call on behalf of a session and push its single response.
    /// Fails with `SessionNotFound` if the session is gone, before or after the
    /// tool runs.
    pub async fn handle_invocation_request(
        &self,
        session_id: &SessionId,
        request_id: RequestId,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<(), RelayError> {
        if !self.transport.contains(session_id) {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }

        let key = (session_id.clone(), request_id.clone());
        let admitted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if !admitted {
            warn!(session_id = %session_id, request_id = %request_id, "Duplicate request id in flight");
            let response = JsonRpcResponse::failure(
                Some(request_id.clone()),
                JsonRpcError::new(
                    codes::INVALID_REQUEST,
                    format!("Request {} is already in flight", request_id),
                ),
            );
            return self.transport.push(session_id, response.into());
        }

        info!(session_id = %session_id, tool = tool_name, "Invoking tool");
        let outcome = AssertUnwindSafe(self.registry.invoke(tool_name, arguments))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(session_id = %session_id, tool = tool_name, panic = %message, "Tool handler panicked");
                Err(RelayError::tool_execution(
                    tool_name,
                    format!("handler panicked: {}", message),
                ))
            });
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);

        let response = match outcome {
            Ok(result) => JsonRpcResponse::success(
                Some(request_id),
                serde_json::to_value(CallToolResult::from(result))?,
            ),
            Err(e) => {
                warn!(session_id = %session_id, tool = tool_name, error = %e, "Tool call failed");
                JsonRpcResponse::failure(Some(request_id), JsonRpcError::from_relay_error(&e))
            }
        };
        self.transport.push(session_id, response.into())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn call_params(params: Value) -> Result<ToolInvocation, String> {
    serde_json::from_value(params).map_err(|e| format!("Invalid tools/call params: {}", e))
}
