use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub client: ClientConfig,
    pub tools: ToolsConfig,
}

impl AppConfig {
    /// Load configuration from default path (~/.config/tool-relay/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tool-relay")
            .join("config.toml")
    }

    /// Data directory for REPL history.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tool-relay")
    }
}

/// Which model API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Generative Language API (`generateContent`).
    Gemini,
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAi,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Base URL of the provider API.
    pub api_base: String,
    /// Model name (e.g. "gemini-2.0-flash").
    pub model: String,
    /// API key. Takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// HTTP timeout for a single model call.
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// The configured key, or the value of `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|v| !v.trim().is_empty())
        })
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Gemini,
            api_base: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-2.0-flash".into(),
            api_key: None,
            api_key_env: Some("GEMINI_API_KEY".into()),
            max_tokens: 2048,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

/// Tool server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Name announced in the `initialize` handshake.
    pub name: String,
    /// Enable CORS.
    pub cors: bool,
    /// Interval between keep-alive comments on the event stream.
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            name: "tool-relay".into(),
            cors: true,
            keep_alive_secs: 15,
        }
    }
}

/// Conversation driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Seeded as the first turn of every conversation.
    pub system_prompt: Option<String>,
    /// Tool calls the model may chain for one user message before the loop
    /// gives up and reports an error.
    pub max_chained_tool_calls: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some(
                "You are a helpful assistant with access to tools. \
                 Messages that start with \"Tool result: \" are outputs of tools you called, \
                 not text typed by the user. Use them to answer the user's request."
                    .into(),
            ),
            max_chained_tool_calls: 8,
        }
    }
}

/// Agent-side connection to the tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Streaming endpoint of the tool server.
    pub server_url: String,
    /// How long to wait for the session handshake.
    pub connect_timeout_secs: u64,
    /// Per-request timeout. `None` waits until the response or session close.
    pub request_timeout_secs: Option<u64>,
    /// Name announced in the `initialize` handshake.
    pub name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000/sse".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: None,
            name: "tool-relay-agent".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub x: XConfig,
}

/// Credentials and endpoint for posting to X.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XConfig {
    pub api_base: String,
    /// OAuth 2.0 user-context bearer token. Takes precedence over `bearer_token_env`.
    pub bearer_token: Option<String>,
    pub bearer_token_env: Option<String>,
}

impl XConfig {
    pub fn resolve_bearer_token(&self) -> Option<String> {
        self.bearer_token.clone().or_else(|| {
            self.bearer_token_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|v| !v.trim().is_empty())
        })
    }
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.twitter.com".into(),
            bearer_token: None,
            bearer_token_env: Some("X_BEARER_TOKEN".into()),
        }
    }
}
