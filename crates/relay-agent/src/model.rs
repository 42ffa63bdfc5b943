//! The model seam: one request/response call per conversation step.

use crate::gemini::GeminiClient;
use crate::openai::OpenAiClient;
use async_trait::async_trait;
use relay_core::config::{ProviderConfig, ProviderKind};
use relay_core::error::RelayError;
use relay_core::types::{ToolDeclaration, ToolInvocation, Turn};
use std::sync::Arc;

/// What the model answered for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// A final text answer.
    Text(String),
    /// A request to run a tool before answering.
    ToolCall(ToolInvocation),
    /// No usable content.
    Empty,
}

/// One content part of a provider reply, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPart {
    Text(String),
    FunctionCall(ToolInvocation),
}

impl ModelReply {
    /// Collapse the parts of a reply. The first function call wins; otherwise
    /// text parts are concatenated in order.
    pub fn from_parts(parts: Vec<ReplyPart>) -> Self {
        let mut text = String::new();
        let mut call = None;
        for part in parts {
            match part {
                ReplyPart::FunctionCall(invocation) if call.is_none() => call = Some(invocation),
                ReplyPart::FunctionCall(extra) => {
                    tracing::debug!(tool = %extra.tool_name, "Ignoring additional function call");
                }
                ReplyPart::Text(t) => text.push_str(&t),
            }
        }
        match call {
            Some(invocation) => Self::ToolCall(invocation),
            None if text.trim().is_empty() => Self::Empty,
            None => Self::Text(text),
        }
    }
}

/// A chat model that can be offered tools.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model name, for logging.
    fn model(&self) -> &str;

    /// Send the whole conversation and the tool declarations; return one reply.
    async fn generate(
        &self,
        turns: &[Turn],
        tools: &[ToolDeclaration],
    ) -> Result<ModelReply, RelayError>;
}

/// Build the client selected by `provider.kind`.
pub fn from_config(provider: &ProviderConfig) -> Result<Arc<dyn ModelClient>, RelayError> {
    match provider.kind {
        ProviderKind::Gemini => {
            let api_key = provider.resolve_api_key().ok_or_else(|| {
                RelayError::Config(format!(
                    "no Gemini API key: set provider.api_key or ${}",
                    provider.api_key_env.as_deref().unwrap_or("GEMINI_API_KEY")
                ))
            })?;
            Ok(Arc::new(GeminiClient::new(provider, api_key)?))
        }
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiClient::new(provider))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_function_call_wins_over_text() {
        let reply = ModelReply::from_parts(vec![
            ReplyPart::Text("Let me add those.".into()),
            ReplyPart::FunctionCall(ToolInvocation::new("addTwoNumbers", Map::new())),
            ReplyPart::FunctionCall(ToolInvocation::new("createPost", Map::new())),
        ]);
        assert!(matches!(reply, ModelReply::ToolCall(ref i) if i.tool_name == "addTwoNumbers"));
    }

    #[test]
    fn test_text_parts_concatenate() {
        let reply = ModelReply::from_parts(vec![
            ReplyPart::Text("The answer ".into()),
            ReplyPart::Text("is 5.".into()),
        ]);
        assert_eq!(reply, ModelReply::Text("The answer is 5.".into()));
    }

    #[test]
    fn test_blank_reply_is_empty() {
        assert_eq!(ModelReply::from_parts(vec![]), ModelReply::Empty);
        assert_eq!(
            ModelReply::from_parts(vec![ReplyPart::Text("  \n".into())]),
            ModelReply::Empty
        );
    }

    #[test]
    fn test_gemini_requires_key() {
        let provider = ProviderConfig {
            api_key: None,
            api_key_env: Some("TOOL_RELAY_TEST_UNSET_VARIABLE".into()),
            ..ProviderConfig::default()
        };
        assert!(matches!(from_config(&provider), Err(RelayError::Config(_))));
    }
}
