//! Drives the agent against a real tool server bound on an ephemeral port.

use async_trait::async_trait;
use relay_agent::{AgentLoop, ModelClient, ModelReply, SseToolClient};
use relay_core::config::{AgentConfig, AppConfig, ClientConfig};
use relay_core::error::RelayError;
use relay_core::gateway::ToolGateway;
use relay_core::tool_registry::ToolRegistry;
use relay_core::types::{
    ParameterSchema, ToolCatalog, ToolDeclaration, ToolDescriptor, ToolInvocation, ToolResult,
    Turn,
};
use relay_server::AppState;
use relay_tools::add_numbers::AddNumbersTool;
use serde_json::{json, Map};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<ModelReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn last_turn_seen(&self) -> String {
        self.seen
            .lock()
            .unwrap()
            .last()
            .and_then(|turns| turns.last())
            .map(Turn::text)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        turns: &[Turn],
        _tools: &[ToolDeclaration],
    ) -> Result<ModelReply, RelayError> {
        self.seen.lock().unwrap().push(turns.to_vec());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ModelReply::Empty))
    }
}

async fn start_server() -> (AppState, String) {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(AddNumbersTool)).unwrap();
    registry
        .register_fn(
            ToolDescriptor::new("slow", "Sleeps for a long time", ParameterSchema::object()),
            |_args| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, anyhow::Error>(ToolResult::text("late"))
            },
        )
        .unwrap();

    let mut config = AppConfig::default();
    config.server.keep_alive_secs = 1;
    let state = AppState::new(config, Arc::new(registry));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(relay_server::serve_on(listener, state.clone()));
    (state, format!("http://{}/sse", addr))
}

fn client_config(server_url: String) -> ClientConfig {
    ClientConfig {
        server_url,
        connect_timeout_secs: 5,
        ..ClientConfig::default()
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_handshake_learns_catalog() {
    let (state, url) = start_server().await;
    let client = SseToolClient::connect(&client_config(url)).await.unwrap();

    let names: Vec<_> = client.tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["addTwoNumbers", "slow"]);
    assert_eq!(client.server_info().unwrap().name, "tool-relay");
    assert_eq!(state.dispatch.transport().len(), 1);
}

#[tokio::test]
async fn test_agent_adds_numbers_over_sse() {
    let (_state, url) = start_server().await;
    let client = Arc::new(SseToolClient::connect(&client_config(url)).await.unwrap());
    let catalog = ToolCatalog::new(client.tools());

    let mut args = Map::new();
    args.insert("a".into(), json!(2));
    args.insert("b".into(), json!(3));
    let model = ScriptedModel::new(vec![
        ModelReply::ToolCall(ToolInvocation::new("addTwoNumbers", args)),
        ModelReply::Text("The sum of 2 and 3 is 5.".into()),
    ]);

    let mut agent = AgentLoop::new(model.clone(), client, catalog, &AgentConfig::default());
    let reply = agent.respond("add 2 and 3").await.unwrap();

    assert_eq!(reply, "The sum of 2 and 3 is 5.");
    assert_eq!(
        model.last_turn_seen(),
        "Tool result: The sum of 2 and 3 is 5"
    );
}

#[tokio::test]
async fn test_invalid_arguments_come_back_as_error() {
    let (_state, url) = start_server().await;
    let client = SseToolClient::connect(&client_config(url)).await.unwrap();

    let mut args = Map::new();
    args.insert("a".into(), json!(1));
    let err = client
        .call_tool(&ToolInvocation::new("addTwoNumbers", args))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidArguments { .. }));

    let err = client
        .call_tool(&ToolInvocation::new("missing", Map::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::UnknownTool(_)));
}

#[tokio::test]
async fn test_server_closing_session_unblocks_call() {
    let (state, url) = start_server().await;
    let client = Arc::new(SseToolClient::connect(&client_config(url)).await.unwrap());

    let call = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call_tool(&ToolInvocation::new("slow", Map::new()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sessions = state.dispatch.transport().sessions();
    assert_eq!(sessions.len(), 1);
    state.dispatch.transport().close_session(&sessions[0].id);

    let err = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_session_lost());
    wait_until(|| !client.is_connected()).await;
}

#[tokio::test]
async fn test_client_disconnect_removes_session() {
    let (state, url) = start_server().await;
    let client = SseToolClient::connect(&client_config(url)).await.unwrap();
    assert_eq!(state.dispatch.transport().len(), 1);

    drop(client);
    let transport = state.dispatch.transport().clone();
    wait_until(move || transport.is_empty()).await;
}

#[tokio::test]
async fn test_post_to_unknown_session_is_400() {
    let (_state, url) = start_server().await;
    let post_url = url.replace("/sse", "/messages?sessionId=nope");

    let response = reqwest::Client::new()
        .post(post_url)
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(
        response.text().await.unwrap(),
        "No transport found for sessionId"
    );
}
