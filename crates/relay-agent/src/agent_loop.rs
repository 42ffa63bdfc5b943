use crate::model::{ModelClient, ModelReply};
use relay_core::config::AgentConfig;
use relay_core::conversation::Conversation;
use relay_core::error::RelayError;
use relay_core::gateway::ToolGateway;
use relay_core::types::{ToolCatalog, ToolInvocation, Turn};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Model turn used when the model answers with nothing.
pub const EMPTY_REPLY_PLACEHOLDER: &str = "[The model returned an empty response]";

/// Progress notifications for whoever is driving the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ToolCallStarted {
        name: String,
        arguments: Map<String, Value>,
    },
    ToolCallFinished {
        name: String,
        text: String,
        is_error: bool,
    },
    Reply(String),
    ModelFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingInput,
    ResolvingToolCall,
}

/// Drives one conversation: user input in, model text out, with any number
/// of tool calls in between.
pub struct AgentLoop {
    model: Arc<dyn ModelClient>,
    gateway: Arc<dyn ToolGateway>,
    catalog: ToolCatalog,
    conversation: Conversation,
    state: LoopState,
    max_chained_tool_calls: usize,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn ModelClient>,
        gateway: Arc<dyn ToolGateway>,
        catalog: ToolCatalog,
        config: &AgentConfig,
    ) -> Self {
        let conversation = match &config.system_prompt {
            Some(prompt) => Conversation::with_system_instruction(prompt.clone()),
            None => Conversation::new(),
        };
        Self {
            model,
            gateway,
            catalog,
            conversation,
            state: LoopState::AwaitingInput,
            max_chained_tool_calls: config.max_chained_tool_calls,
            events: None,
        }
    }

    /// Send [`AgentEvent`]s to `tx` as the loop progresses.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Replace the tools offered to the model from the next step on.
    pub fn set_catalog(&mut self, catalog: ToolCatalog) {
        self.catalog = catalog;
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Handle one user message and return the model's final text for it.
    ///
    /// Tool failures are folded into the conversation for the model to read.
    /// Only a failed model call is returned as an error; the loop is back in
    /// [`LoopState::AwaitingInput`] either way.
    pub async fn respond(&mut self, input: &str) -> Result<String, RelayError> {
        self.conversation.append(Turn::human(input));
        let result = self.run_until_text().await;
        self.state = LoopState::AwaitingInput;
        if let Err(e) = &result {
            warn!(error = %e, "Model call failed");
            self.emit(AgentEvent::ModelFailed(e.to_string()));
        }
        result
    }

    async fn run_until_text(&mut self) -> Result<String, RelayError> {
        let declarations = self.catalog.declarations();
        let mut chained = 0usize;

        loop {
            debug!(turns = self.conversation.len(), chained, "Calling model");
            let reply = self
                .model
                .generate(self.conversation.snapshot(), &declarations)
                .await
                .map_err(|e| match e {
                    RelayError::ModelCallFailed(message) => RelayError::ModelCallFailed(message),
                    other => RelayError::ModelCallFailed(other.to_string()),
                })?;

            let invocation = match reply {
                ModelReply::Text(text) => return Ok(self.finish(text)),
                ModelReply::Empty => {
                    warn!("Model returned an empty response");
                    return Ok(self.finish(EMPTY_REPLY_PLACEHOLDER.to_string()));
                }
                ModelReply::ToolCall(invocation) => invocation,
            };

            if chained >= self.max_chained_tool_calls {
                warn!(
                    limit = self.max_chained_tool_calls,
                    tool = %invocation.tool_name,
                    "Chained tool call limit reached"
                );
                return Ok(self.finish(format!(
                    "[Stopped after {} chained tool calls without a final answer]",
                    chained
                )));
            }
            chained += 1;

            self.state = LoopState::ResolvingToolCall;
            self.resolve_tool_call(invocation).await;
        }
    }

    /// Record the model's final text for this input.
    fn finish(&mut self, text: String) -> String {
        self.conversation.append(Turn::model(text.clone()));
        self.emit(AgentEvent::Reply(text.clone()));
        text
    }

    /// Run one tool call and fold its outcome into a user-role turn.
    async fn resolve_tool_call(&mut self, invocation: ToolInvocation) {
        let name = invocation.tool_name.clone();
        info!(tool = %name, "Calling tool");
        self.conversation.append(Turn::tool_call_notice(&name));
        self.emit(AgentEvent::ToolCallStarted {
            name: name.clone(),
            arguments: invocation.arguments.clone(),
        });

        let (text, is_error) = match self.gateway.call_tool(&invocation).await {
            Ok(result) if result.is_empty() => ("(no output)".to_string(), false),
            Ok(result) => (result.joined_text(), false),
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                (format!("Error: {}", e), true)
            }
        };

        self.conversation.append(Turn::tool_result(&text));
        self.emit(AgentEvent::ToolCallFinished {
            name,
            text,
            is_error,
        });
    }
}
