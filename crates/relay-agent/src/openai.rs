use crate::model::{ModelClient, ModelReply, ReplyPart};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use relay_core::config::ProviderConfig;
use relay_core::error::RelayError;
use relay_core::types::{Author, ToolDeclaration, ToolInvocation, Turn};
use serde_json::Value;
use tracing::{debug, info};

/// Client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(provider: &ProviderConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(&provider.api_base)
            .with_api_key(
                provider
                    .resolve_api_key()
                    .unwrap_or_else(|| "not-needed".to_string()),
            );
        Self {
            client: Client::with_config(openai_config),
            model: provider.model.clone(),
            temperature: provider.temperature,
            max_tokens: provider.max_tokens,
        }
    }
}

fn provider_err(e: impl std::fmt::Display) -> RelayError {
    RelayError::ModelCallFailed(e.to_string())
}

/// Turn history as chat messages. Tool results go out as plain user messages,
/// the same way they are stored.
fn build_messages(turns: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>, RelayError> {
    let mut result = Vec::with_capacity(turns.len());
    for turn in turns {
        let text = turn.text();
        let message = match turn.author {
            Author::System => ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(text.as_str())
                    .build()
                    .map_err(provider_err)?,
            ),
            Author::User(_) => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(text.as_str())
                    .build()
                    .map_err(provider_err)?,
            ),
            Author::Model => ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(text.as_str())
                    .build()
                    .map_err(provider_err)?,
            ),
        };
        result.push(message);
    }
    Ok(result)
}

fn build_tools(tools: &[ToolDeclaration]) -> Result<Vec<ChatCompletionTool>, RelayError> {
    tools
        .iter()
        .map(|tool| {
            let function = FunctionObjectArgs::default()
                .name(&tool.name)
                .description(&tool.description)
                .parameters(serde_json::to_value(&tool.parameters)?)
                .build()
                .map_err(|e| RelayError::Config(format!("function '{}': {}", tool.name, e)))?;
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(function)
                .build()
                .map_err(|e| RelayError::Config(format!("tool '{}': {}", tool.name, e)))
        })
        .collect()
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        turns: &[Turn],
        tools: &[ToolDeclaration],
    ) -> Result<ModelReply, RelayError> {
        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder
            .model(&self.model)
            .messages(build_messages(turns)?)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens);
        if !tools.is_empty() {
            request_builder.tools(build_tools(tools)?);
        }
        let request = request_builder.build().map_err(provider_err)?;

        info!(model = self.model.as_str(), turns = turns.len(), "Sending chat completion");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(provider_err)?;

        let Some(choice) = response.choices.into_iter().next() else {
            debug!("No choices in response");
            return Ok(ModelReply::Empty);
        };

        let mut parts = Vec::new();
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments: Value = if call.function.arguments.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    RelayError::ModelCallFailed(format!(
                        "malformed arguments for {}: {}",
                        call.function.name, e
                    ))
                })?
            };
            let invocation = ToolInvocation::from_value(&call.function.name, arguments)
                .ok_or_else(|| {
                    RelayError::ModelCallFailed(format!(
                        "arguments for {} are not an object",
                        call.function.name
                    ))
                })?;
            parts.push(ReplyPart::FunctionCall(invocation));
        }
        if let Some(content) = choice.message.content {
            parts.push(ReplyPart::Text(content));
        }
        Ok(ModelReply::from_parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::types::{ParameterSchema, PropertySchema, SchemaType, ToolDescriptor};

    #[test]
    fn test_roles_map_to_chat_messages() {
        let turns = vec![
            Turn::system("be brief"),
            Turn::human("add 2 and 3"),
            Turn::tool_call_notice("addTwoNumbers"),
            Turn::tool_result("The sum of 2 and 3 is 5"),
        ];
        let messages = build_messages(&turns).unwrap();
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[3], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_tools_carry_schema() {
        let declaration = ToolDescriptor::new(
            "createPost",
            "Post on X",
            ParameterSchema::object()
                .required_property("status", PropertySchema::new(SchemaType::String)),
        )
        .declaration();
        let tools = build_tools(&[declaration]).unwrap();
        assert_eq!(tools[0].function.name, "createPost");
        let parameters = tools[0].function.parameters.as_ref().unwrap();
        assert_eq!(parameters["required"][0], "status");
    }
}
