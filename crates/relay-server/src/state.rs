use crate::dispatch::DispatchServer;
use crate::transport::SessionTransport;
use relay_core::config::AppConfig;
use relay_core::tool_registry::ToolRegistry;
use std::sync::Arc;

/// Shared application state for the server.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub dispatch: DispatchServer,
}

impl AppState {
    pub fn new(config: AppConfig, tool_registry: Arc<ToolRegistry>) -> Self {
        let transport = SessionTransport::new("/messages");
        let dispatch = DispatchServer::new(tool_registry, transport, &config.server.name);
        Self { config, dispatch }
    }
}
