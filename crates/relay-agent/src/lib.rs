pub mod agent_loop;
pub mod gemini;
pub mod model;
pub mod openai;
pub mod sse_client;

pub use agent_loop::{AgentEvent, AgentLoop, LoopState};
pub use model::{ModelClient, ModelReply};
pub use sse_client::SseToolClient;
