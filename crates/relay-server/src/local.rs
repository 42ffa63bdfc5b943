use crate::dispatch::DispatchServer;
use crate::transport::ServerPush;
use async_trait::async_trait;
use futures::StreamExt;
use relay_core::correlation::PendingRequests;
use relay_core::error::RelayError;
use relay_core::gateway::{decode_call_result, ToolGateway};
use relay_core::protocol::{methods, JsonRpcMessage, JsonRpcRequest, ListToolsResult};
use relay_core::types::{SessionId, ToolDescriptor, ToolInvocation, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A gateway that talks to a [`DispatchServer`] in the same process.
///
/// It goes through a real session, so requests and responses take the same
/// path they would over HTTP, minus the network.
pub struct LocalGateway {
    dispatch: DispatchServer,
    session_id: SessionId,
    pending: Arc<PendingRequests>,
    reader: JoinHandle<()>,
}

impl LocalGateway {
    /// Open a session on `dispatch`. Must be called inside a Tokio runtime.
    pub fn connect(dispatch: &DispatchServer) -> Self {
        let (session_id, mut stream) = dispatch.connect();
        let pending = Arc::new(PendingRequests::new());

        let reader = {
            let pending = pending.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                while let Some(push) = stream.next().await {
                    match push {
                        ServerPush::Message(JsonRpcMessage::Response(response)) => {
                            pending.resolve(response);
                        }
                        ServerPush::Message(JsonRpcMessage::Request(note)) => {
                            debug!(session_id = %session_id, method = %note.method, "Server notification");
                        }
                        ServerPush::Endpoint(_) => {}
                    }
                }
                pending.close(format!("session {} closed", session_id));
            })
        };

        Self {
            dispatch: dispatch.clone(),
            session_id,
            pending,
            reader,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Close the session. Outstanding calls fail with `SessionNotFound`.
    pub fn close(&self) {
        self.dispatch.transport().close_session(&self.session_id);
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let waiter = self.pending.register()?;
        let request = JsonRpcRequest::request(waiter.id().clone(), method, params);
        if let Err(e) = self
            .dispatch
            .transport()
            .post_to_session(&self.session_id, request.into())
        {
            self.pending.fail(waiter.id(), e);
        }
        waiter.wait().await
    }
}

#[async_trait]
impl ToolGateway for LocalGateway {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RelayError> {
        let value = self.request(methods::TOOLS_LIST, json!({})).await?;
        let result: ListToolsResult = serde_json::from_value(value)?;
        Ok(result.tools)
    }

    async fn call_tool(&self, invocation: &ToolInvocation) -> Result<ToolResult, RelayError> {
        let value = self
            .request(methods::TOOLS_CALL, serde_json::to_value(invocation)?)
            .await?;
        decode_call_result(&invocation.tool_name, value)
    }
}

impl Drop for LocalGateway {
    fn drop(&mut self) {
        self.close();
        self.reader.abort();
    }
}
