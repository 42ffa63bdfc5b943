pub mod add_numbers;
pub mod create_post;

use relay_core::config::AppConfig;
use relay_core::error::RelayError;
use relay_core::tool_registry::ToolRegistry;
use std::sync::Arc;

/// Register all built-in tools into the registry.
pub fn register_all(registry: &mut ToolRegistry, config: &AppConfig) -> Result<(), RelayError> {
    registry.register(Arc::new(add_numbers::AddNumbersTool))?;
    let create_post = create_post::CreatePostTool::new(config.tools.x.clone())?;
    registry.register(Arc::new(create_post))?;

    if config.tools.x.resolve_bearer_token().is_none() {
        tracing::warn!("No X bearer token configured; createPost calls will fail");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_in_order() {
        let mut registry = ToolRegistry::new();
        register_all(&mut registry, &AppConfig::default()).unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["addTwoNumbers", "createPost"]);
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let mut registry = ToolRegistry::new();
        register_all(&mut registry, &AppConfig::default()).unwrap();
        let err = register_all(&mut registry, &AppConfig::default()).unwrap_err();
        assert!(matches!(err, RelayError::DuplicateTool(ref name) if name == "addTwoNumbers"));
        assert_eq!(registry.len(), 2);
    }
}
