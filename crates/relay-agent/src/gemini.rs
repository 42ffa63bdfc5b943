use crate::model::{ModelClient, ModelReply, ReplyPart};
use async_trait::async_trait;
use relay_core::config::ProviderConfig;
use relay_core::error::RelayError;
use relay_core::types::{Author, ToolDeclaration, ToolInvocation, Turn};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Client for the Google Generative Language `generateContent` API.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiClient {
    pub fn new(provider: &ProviderConfig, api_key: String) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(provider.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: provider.api_base.trim_end_matches('/').to_string(),
            model: provider.model.clone(),
            api_key,
            temperature: provider.temperature,
            max_tokens: provider.max_tokens,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn payload(&self, turns: &[Turn], tools: &[ToolDeclaration]) -> Value {
        let system: Vec<String> = turns
            .iter()
            .filter(|t| t.author == Author::System)
            .map(Turn::text)
            .collect();
        let contents: Vec<Value> = turns
            .iter()
            .filter(|t| t.author != Author::System)
            .map(|t| {
                json!({
                    "role": t.author.wire_role(),
                    "parts": [{ "text": t.text() }],
                })
            })
            .collect();

        let mut payload = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_tokens,
            }
        });
        if !system.is_empty() {
            payload["system_instruction"] = json!({
                "parts": [{ "text": system.join("\n\n") }]
            });
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools.iter().map(function_declaration).collect();
            payload["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        payload
    }
}

/// Gemini rejects object schemas with no properties, so parameterless tools
/// are declared without `parameters`.
fn function_declaration(tool: &ToolDeclaration) -> Value {
    let mut declaration = json!({
        "name": tool.name,
        "description": tool.description,
    });
    if !tool.parameters.properties.is_empty() {
        declaration["parameters"] = json!(tool.parameters);
    }
    declaration
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        turns: &[Turn],
        tools: &[ToolDeclaration],
    ) -> Result<ModelReply, RelayError> {
        let payload = self.payload(turns, tools);
        info!(
            model = self.model.as_str(),
            turns = turns.len(),
            tools = tools.len(),
            "Sending request to Gemini"
        );

        let response = self
            .http
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::ModelCallFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::ModelCallFailed(format!(
                "Gemini returned {}: {}",
                status, body
            )));
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| RelayError::ModelCallFailed(format!("unreadable Gemini response: {}", e)))?;
        debug!("Received response from Gemini");

        let parts = body
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();

        let parts = parts
            .into_iter()
            .filter_map(|part| {
                if let Some(call) = part.function_call {
                    let args = match call.args {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    };
                    Some(ReplyPart::FunctionCall(ToolInvocation::new(call.name, args)))
                } else {
                    part.text.map(ReplyPart::Text)
                }
            })
            .collect();
        Ok(ModelReply::from_parts(parts))
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use relay_core::types::{ParameterSchema, PropertySchema, SchemaType, ToolDescriptor};
    use std::collections::HashMap;

    fn client(api_base: &str) -> GeminiClient {
        let provider = ProviderConfig {
            api_base: api_base.to_string(),
            ..ProviderConfig::default()
        };
        GeminiClient::new(&provider, "test-key".into()).unwrap()
    }

    fn add_tool() -> ToolDeclaration {
        ToolDescriptor::new(
            "addTwoNumbers",
            "Add two numbers",
            ParameterSchema::object()
                .required_property("a", PropertySchema::new(SchemaType::Number))
                .required_property("b", PropertySchema::new(SchemaType::Number)),
        )
        .declaration()
    }

    #[test]
    fn test_payload_roles_and_tools() {
        let turns = vec![
            Turn::system("be brief"),
            Turn::human("add 2 and 3"),
            Turn::tool_call_notice("addTwoNumbers"),
            Turn::tool_result("The sum of 2 and 3 is 5"),
        ];
        let noop = ToolDescriptor::new("ping", "No arguments", ParameterSchema::object())
            .declaration();
        let payload = client("http://unused").payload(&turns, &[add_tool(), noop]);

        assert_eq!(payload["system_instruction"]["parts"][0]["text"], "be brief");
        let roles: Vec<_> = payload["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["user", "model", "user"]);
        assert_eq!(
            payload["contents"][2]["parts"][0]["text"],
            "Tool result: The sum of 2 and 3 is 5"
        );

        let declarations = &payload["tools"][0]["functionDeclarations"];
        assert_eq!(declarations[0]["parameters"]["required"], json!(["a", "b"]));
        assert!(declarations[1].get("parameters").is_none());
    }

    async fn fake_gemini(reply: Value, status: StatusCode) -> String {
        let app = Router::new().route(
            "/models/{call}",
            post(
                move |Path(call): Path<String>,
                      Query(query): Query<HashMap<String, String>>| {
                    let reply = reply.clone();
                    async move {
                        if call != "gemini-2.0-flash:generateContent"
                            || query.get("key").map(String::as_str) != Some("test-key")
                        {
                            return (StatusCode::NOT_FOUND, Json(json!({})));
                        }
                        (status, Json(reply))
                    }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_function_call_reply() {
        let base = fake_gemini(
            json!({"candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "addTwoNumbers", "args": {"a": 2, "b": 3}}}
            ]}}]}),
            StatusCode::OK,
        )
        .await;

        let reply = client(&base)
            .generate(&[Turn::human("add 2 and 3")], &[add_tool()])
            .await
            .unwrap();
        match reply {
            ModelReply::ToolCall(invocation) => {
                assert_eq!(invocation.tool_name, "addTwoNumbers");
                assert_eq!(invocation.arguments["a"], json!(2));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_text_reply() {
        let base = fake_gemini(
            json!({"candidates": [{"content": {"parts": [{"text": "It is 5."}]}}]}),
            StatusCode::OK,
        )
        .await;
        let reply = client(&base)
            .generate(&[Turn::human("add 2 and 3")], &[])
            .await
            .unwrap();
        assert_eq!(reply, ModelReply::Text("It is 5.".into()));
    }

    #[tokio::test]
    async fn test_http_error_is_model_failure() {
        let base = fake_gemini(json!({"error": {"message": "quota"}}), StatusCode::TOO_MANY_REQUESTS)
            .await;
        let err = client(&base)
            .generate(&[Turn::human("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ModelCallFailed(ref m) if m.contains("429")));
    }
}
