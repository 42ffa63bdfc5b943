pub mod config;
pub mod conversation;
pub mod correlation;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod tool_registry;
pub mod types;

pub use config::AppConfig;
pub use conversation::Conversation;
pub use correlation::PendingRequests;
pub use error::{RelayError, Result};
pub use gateway::ToolGateway;
pub use tool_registry::{Tool, ToolRegistry};
