use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use relay_core::config::XConfig;
use relay_core::tool_registry::Tool;
use relay_core::types::{ParameterSchema, PropertySchema, SchemaType, ToolResult};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Publishes a post on X through the v2 API.
pub struct CreatePostTool {
    client: reqwest::Client,
    config: XConfig,
}

impl CreatePostTool {
    pub fn new(config: XConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("tool-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/2/tweets", self.config.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Tool for CreatePostTool {
    fn name(&self) -> &str {
        "createPost"
    }

    fn description(&self) -> &str {
        "Create a post on X with the given status text."
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::object().required_property(
            "status",
            PropertySchema::new(SchemaType::String).described("Text of the post"),
        )
    }

    async fn call(&self, args: Map<String, Value>) -> anyhow::Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            status: String,
        }
        let Args { status } = serde_json::from_value(Value::Object(args))?;

        let token = self
            .config
            .resolve_bearer_token()
            .ok_or_else(|| anyhow!("no X bearer token configured"))?;

        tracing::debug!(chars = status.chars().count(), "Posting to X");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(token)
            .json(&json!({ "text": status }))
            .send()
            .await
            .context("request to X failed")?;

        let code = response.status();
        if !code.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("X rejected the post ({}): {}", code, body);
        }

        Ok(ToolResult::text(format!("Tweeted: {}", status)))
    }
}
