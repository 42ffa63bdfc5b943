use async_trait::async_trait;
use relay_core::tool_registry::Tool;
use relay_core::types::{ParameterSchema, PropertySchema, SchemaType, ToolResult};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Adds two numbers.
pub struct AddNumbersTool;

#[async_trait]
impl Tool for AddNumbersTool {
    fn name(&self) -> &str {
        "addTwoNumbers"
    }

    fn description(&self) -> &str {
        "Add two numbers and return their sum."
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::object()
            .required_property(
                "a",
                PropertySchema::new(SchemaType::Number).described("First number"),
            )
            .required_property(
                "b",
                PropertySchema::new(SchemaType::Number).described("Second number"),
            )
    }

    async fn call(&self, args: Map<String, Value>) -> anyhow::Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            a: f64,
            b: f64,
        }
        let Args { a, b } = serde_json::from_value(Value::Object(args))?;
        Ok(ToolResult::text(format!("The sum of {} and {} is {}", a, b, a + b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_integers_print_without_fraction() {
        let result = AddNumbersTool
            .call(args(json!({"a": 2, "b": 3})))
            .await
            .unwrap();
        assert_eq!(result.joined_text(), "The sum of 2 and 3 is 5");
    }

    #[tokio::test]
    async fn test_fractions() {
        let result = AddNumbersTool
            .call(args(json!({"a": 1.5, "b": -4})))
            .await
            .unwrap();
        assert_eq!(result.joined_text(), "The sum of 1.5 and -4 is -2.5");
    }

    #[test]
    fn test_schema_requires_both_operands() {
        let schema = AddNumbersTool.parameter_schema();
        assert!(schema.validate(&args(json!({"a": 1}))).is_err());
        assert!(schema.validate(&args(json!({"a": 1, "b": "2"}))).is_err());
        assert!(schema.validate(&args(json!({"a": 1, "b": 2}))).is_ok());
    }
}
