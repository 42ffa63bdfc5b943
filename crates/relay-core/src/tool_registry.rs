use crate::error::RelayError;
use crate::types::{ParameterSchema, ToolCatalog, ToolDescriptor, ToolResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Trait that all tools must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (used in function calling).
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// Schema describing the tool's arguments object.
    fn parameter_schema(&self) -> ParameterSchema;

    /// Run the tool. Arguments have already been validated against the schema.
    async fn call(&self, args: Map<String, Value>) -> anyhow::Result<ToolResult>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(self.name(), self.description(), self.parameter_schema())
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<ToolResult>> + Send>>;
type Handler = dyn Fn(Map<String, Value>) -> HandlerFuture + Send + Sync;

/// A tool assembled from a descriptor and a closure.
struct FnTool {
    descriptor: ToolDescriptor,
    handler: Arc<Handler>,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameter_schema(&self) -> ParameterSchema {
        self.descriptor.parameter_schema.clone()
    }

    async fn call(&self, args: Map<String, Value>) -> anyhow::Result<ToolResult> {
        (self.handler)(args).await
    }

    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }
}

struct Entry {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// Central registry for all available tools. Registration order is kept so the
/// catalogue echoed to the model is identical on every turn.
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Fails if a tool with the same name already exists; the
    /// existing registration is left untouched.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RelayError> {
        let descriptor = tool.descriptor();
        if self.index.contains_key(&descriptor.name) {
            return Err(RelayError::DuplicateTool(descriptor.name));
        }
        tracing::debug!(tool = %descriptor.name, "Registered tool");
        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(Entry { descriptor, tool });
        Ok(())
    }

    /// Register a descriptor with a closure handler.
    pub fn register_fn<F, Fut>(
        &mut self,
        descriptor: ToolDescriptor,
        handler: F,
    ) -> Result<(), RelayError>
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolResult>> + Send + 'static,
    {
        let handler: Arc<Handler> =
            Arc::new(move |args| -> HandlerFuture { Box::pin(handler(args)) });
        self.register(Arc::new(FnTool {
            descriptor,
            handler,
        }))
    }

    /// Descriptors of all registered tools, in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog::new(self.list())
    }

    /// Get a tool's descriptor by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i].descriptor)
    }

    /// Validate the arguments and run the named tool.
    pub async fn invoke(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<ToolResult, RelayError> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| RelayError::UnknownTool(name.to_string()))?;

        entry
            .descriptor
            .parameter_schema
            .validate(&args)
            .map_err(|message| RelayError::invalid_arguments(name, message))?;

        entry
            .tool
            .call(args)
            .await
            .map_err(|e| RelayError::tool_execution(name, format!("{:#}", e)))
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
