//! Agent-side connection to a tool server over Server-Sent Events.
//!
//! The client opens the event stream, waits for the `endpoint` event that names
//! its post URL, then performs the `initialize` handshake. Requests are posted
//! to that URL and their responses arrive on the stream, where a reader task
//! hands them to [`PendingRequests`].

use async_trait::async_trait;
use futures::StreamExt;
use relay_core::config::ClientConfig;
use relay_core::correlation::PendingRequests;
use relay_core::error::RelayError;
use relay_core::gateway::{decode_call_result, ToolGateway};
use relay_core::protocol::{
    methods, Implementation, InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcRequest,
    ListToolsResult, PROTOCOL_VERSION,
};
use relay_core::types::{ToolDescriptor, ToolInvocation, ToolResult};
use reqwest::StatusCode;
use reqwest_eventsource::{Event, EventSource};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// State shared between the client and its stream reader.
#[derive(Default)]
struct Shared {
    pending: PendingRequests,
    tools: RwLock<Vec<ToolDescriptor>>,
    catalog_changed: AtomicBool,
}

impl Shared {
    fn set_tools(&self, tools: Vec<ToolDescriptor>) {
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
    }
}

pub struct SseToolClient {
    http: reqwest::Client,
    post_url: Url,
    shared: Arc<Shared>,
    request_timeout: Option<Duration>,
    server_info: Option<Implementation>,
    reader: JoinHandle<()>,
}

impl SseToolClient {
    /// Connect to `config.server_url` and complete the handshake.
    pub async fn connect(config: &ClientConfig) -> Result<Self, RelayError> {
        let base = Url::parse(&config.server_url)
            .map_err(|e| RelayError::Config(format!("invalid server_url: {}", e)))?;
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs.max(1));

        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        let source = EventSource::new(http.get(base.clone()))
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let shared = Arc::new(Shared::default());
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_stream(source, base, shared.clone(), endpoint_tx));

        let post_url = match tokio::time::timeout(connect_timeout, endpoint_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                reader.abort();
                return Err(RelayError::Transport(
                    "stream closed before the server announced an endpoint".into(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(RelayError::Transport(format!(
                    "no endpoint announced within {:?}",
                    connect_timeout
                )));
            }
        };
        debug!(%post_url, "Session endpoint announced");

        let mut client = Self {
            http,
            post_url,
            shared,
            request_timeout: config.request_timeout_secs.map(Duration::from_secs),
            server_info: None,
            reader,
        };

        let handshake = async {
            let init = client.initialize(&config.name).await?;
            client
                .post(JsonRpcRequest::notification(methods::INITIALIZED, json!({})).into())
                .await?;
            client.list_tools().await?;
            Ok::<_, RelayError>(init)
        };
        let init = tokio::time::timeout(connect_timeout, handshake)
            .await
            .map_err(|_| RelayError::Transport("handshake timed out".into()))??;

        info!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            tools = client.tools().len(),
            "Connected to tool server"
        );
        client.server_info = Some(init.server_info);
        Ok(client)
    }

    async fn initialize(&self, name: &str) -> Result<InitializeResult, RelayError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: Implementation {
                name: name.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let value = self
            .request(methods::INITIALIZE, serde_json::to_value(params)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Tools from the most recent catalog push or `tools/list` answer.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.shared
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the server has announced a catalog change since the last call.
    pub fn take_catalog_change(&self) -> bool {
        self.shared.catalog_changed.swap(false, Ordering::SeqCst)
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.pending.is_closed()
    }

    /// Stop reading the stream. Outstanding requests fail with `SessionNotFound`.
    pub fn close(&self) {
        self.reader.abort();
        self.shared.pending.close("client closed the session");
    }

    async fn post(&self, message: JsonRpcMessage) -> Result<(), RelayError> {
        let response = self
            .http
            .post(self.post_url.clone())
            .json(&message)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("sessionId") {
            Err(RelayError::SessionNotFound(body))
        } else {
            Err(RelayError::Transport(format!("post rejected ({}): {}", status, body)))
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let waiter = self.shared.pending.register()?;
        let id = waiter.id().clone();
        let request = JsonRpcRequest::request(id.clone(), method, params);
        if let Err(e) = self.post(request.into()).await {
            self.shared.pending.fail(&id, e);
        }

        match self.request_timeout {
            None => waiter.wait().await,
            Some(limit) => match tokio::time::timeout(limit, waiter.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    let error = RelayError::Transport(format!(
                        "{} timed out after {:?}",
                        method, limit
                    ));
                    self.shared.pending.fail(&id, RelayError::Transport(error.to_string()));
                    Err(error)
                }
            },
        }
    }
}

#[async_trait]
impl ToolGateway for SseToolClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RelayError> {
        let value = self.request(methods::TOOLS_LIST, json!({})).await?;
        let result: ListToolsResult = serde_json::from_value(value)?;
        self.shared.set_tools(result.tools.clone());
        Ok(result.tools)
    }

    async fn call_tool(&self, invocation: &ToolInvocation) -> Result<ToolResult, RelayError> {
        let value = self
            .request(methods::TOOLS_CALL, serde_json::to_value(invocation)?)
            .await?;
        decode_call_result(&invocation.tool_name, value)
    }
}

impl Drop for SseToolClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_stream(
    mut source: EventSource,
    base: Url,
    shared: Arc<Shared>,
    endpoint_tx: oneshot::Sender<Url>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let reason = loop {
        match source.next().await {
            Some(Ok(Event::Open)) => debug!("Event stream opened"),
            Some(Ok(Event::Message(event))) => match event.event.as_str() {
                "endpoint" => match base.join(event.data.trim()) {
                    Ok(url) => {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(url);
                        }
                    }
                    Err(e) => warn!(data = %event.data, error = %e, "Bad endpoint event"),
                },
                "message" => handle_message(&event.data, &shared),
                other => debug!(event = other, "Ignoring event"),
            },
            Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                break "tool server closed the session".to_string();
            }
            Some(Err(e)) => break format!("event stream failed: {}", e),
        }
    };
    source.close();
    info!(%reason, "Tool server stream closed");
    shared.pending.close(reason);
}

fn handle_message(data: &str, shared: &Shared) {
    let message: JsonRpcMessage = match serde_json::from_str(data) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unparseable message on event stream");
            return;
        }
    };
    match message {
        JsonRpcMessage::Response(response) => {
            shared.pending.resolve(response);
        }
        JsonRpcMessage::Request(note) => match note.method.as_str() {
            methods::TOOLS_CATALOG => {
                match serde_json::from_value::<ListToolsResult>(note.params.unwrap_or(Value::Null)) {
                    Ok(catalog) => {
                        debug!(tools = catalog.tools.len(), "Received tool catalog");
                        shared.set_tools(catalog.tools);
                    }
                    Err(e) => warn!(error = %e, "Malformed tool catalog"),
                }
            }
            methods::TOOLS_LIST_CHANGED => {
                info!("Tool server reports a changed tool list");
                shared.catalog_changed.store(true, Ordering::SeqCst);
            }
            other => debug!(method = other, "Ignoring server request"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::protocol::{JsonRpcResponse, RequestId};

    #[tokio::test]
    async fn test_catalog_push_updates_cache() {
        let shared = Shared::default();
        let note = JsonRpcRequest::notification(
            methods::TOOLS_CATALOG,
            json!({"tools": [{"name": "addTwoNumbers", "description": "Add",
                "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}}, "required": ["a"]}}]}),
        );
        handle_message(&serde_json::to_string(&note).unwrap(), &shared);

        let tools = shared.tools.read().unwrap().clone();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].parameter_schema.required, ["a"]);
    }

    #[tokio::test]
    async fn test_response_resolves_waiter() {
        let shared = Shared::default();
        let waiter = shared.pending.register().unwrap();
        let response = JsonRpcResponse::success(Some(waiter.id().clone()), json!({"ok": true}));
        handle_message(&serde_json::to_string(&response).unwrap(), &shared);
        assert_eq!(waiter.wait().await.unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_list_changed_sets_flag() {
        let shared = Shared::default();
        let note = JsonRpcRequest::notification(methods::TOOLS_LIST_CHANGED, json!({}));
        handle_message(&serde_json::to_string(&note).unwrap(), &shared);
        assert!(shared.catalog_changed.load(Ordering::SeqCst));

        let stray = JsonRpcResponse::success(Some(RequestId::Number(5)), json!({}));
        handle_message(&serde_json::to_string(&stray).unwrap(), &shared);
        handle_message("not json", &shared);
        assert!(shared.pending.is_empty());
    }

    #[tokio::test]
    async fn test_bad_url_is_config_error() {
        let config = ClientConfig {
            server_url: "not a url".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            SseToolClient::connect(&config).await,
            Err(RelayError::Config(_))
        ));
    }
}
