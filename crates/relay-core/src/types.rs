use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Prefix the model is told to read as "this came from a tool, not the human".
pub const TOOL_RESULT_PREFIX: &str = "Tool result: ";

// ── Content ─────────────────────────────────────────────────────────────

/// A single block of content inside a turn or a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// Output of a tool handler: ordered content blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
        }
    }

    /// All text blocks joined by newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.content.iter().all(|b| b.as_text().is_empty())
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    #[serde(rename = "name")]
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Build an invocation from an arbitrary JSON value. `null` means "no arguments";
    /// anything other than an object is rejected.
    pub fn from_value(tool_name: impl Into<String>, arguments: Value) -> Option<Self> {
        let arguments = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => return None,
        };
        Some(Self::new(tool_name, arguments))
    }
}

// ── Schemas ─────────────────────────────────────────────────────────────

/// JSON-Schema primitive types accepted by model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl SchemaType {
    /// Whether `value` is an instance of this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// Schema of a single named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Element schema, for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    pub fn new(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            description: None,
            items: None,
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

fn object_type() -> SchemaType {
    SchemaType::Object
}

/// Restricted JSON-Schema describing a tool's arguments object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: SchemaType,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    /// An object schema with no parameters.
    pub fn object() -> Self {
        Self {
            schema_type: SchemaType::Object,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Add an optional property.
    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Add a property and mark it required.
    pub fn required_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Check `arguments` against this schema: every required key present and
    /// non-null, and every declared key that is present has the declared type.
    /// Undeclared keys are passed through.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<(), String> {
        for name in &self.required {
            match arguments.get(name) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required parameter '{}'", name))
                }
                Some(_) => {}
            }
        }
        for (name, value) in arguments {
            let Some(prop) = self.properties.get(name) else {
                continue;
            };
            if value.is_null() && !self.required.contains(name) {
                continue;
            }
            if !prop.schema_type.matches(value) {
                return Err(format!(
                    "parameter '{}' must be of type {}, got {}",
                    name,
                    prop.schema_type.as_str(),
                    json_kind(value)
                ));
            }
        }
        Ok(())
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::object()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Advertised name, description and argument schema of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub parameter_schema: ParameterSchema,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameter_schema: ParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema,
        }
    }

    /// Projection sent to the model as a function declaration.
    pub fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameter_schema.clone(),
        }
    }
}

/// `{name, description, parameters}` as the model provider expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

/// Ordered, read-only tool catalogue handed to an agent loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(ToolDescriptor::declaration).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ── Turns ───────────────────────────────────────────────────────────────

/// Where a user-role turn really came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOrigin {
    HumanInput,
    ToolResult,
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    System,
    User(TurnOrigin),
    Model,
}

impl Author {
    /// Role string on the model wire. Tool results ride on the user role.
    pub fn wire_role(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User(_) => "user",
            Self::Model => "model",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub author: Author,
    pub parts: Vec<ContentBlock>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            author,
            parts: vec![ContentBlock::text(text)],
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Author::System, text)
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Author::User(TurnOrigin::HumanInput), text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Author::Model, text)
    }

    /// Model turn recording that a tool call is in progress.
    pub fn tool_call_notice(tool_name: &str) -> Self {
        Self::model(format!("calling tool {}", tool_name))
    }

    /// User-role turn carrying a tool result (or a tool error) back to the model.
    pub fn tool_result(text: impl AsRef<str>) -> Self {
        Self::new(
            Author::User(TurnOrigin::ToolResult),
            format!("{}{}", TOOL_RESULT_PREFIX, text.as_ref()),
        )
    }

    /// Text of all parts, concatenated.
    pub fn text(&self) -> String {
        self.parts.iter().map(ContentBlock::as_text).collect()
    }
}

// ── Sessions ────────────────────────────────────────────────────────────

/// Opaque, unique identifier of a streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_schema() -> ParameterSchema {
        ParameterSchema::object()
            .required_property("a", PropertySchema::new(SchemaType::Number))
            .required_property("b", PropertySchema::new(SchemaType::Number))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_accepts_matching_arguments() {
        assert!(add_schema().validate(&args(json!({"a": 2, "b": 3.5}))).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let err = add_schema().validate(&args(json!({"a": 2}))).unwrap_err();
        assert!(err.contains("'b'"));
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let err = add_schema()
            .validate(&args(json!({"a": "two", "b": 3})))
            .unwrap_err();
        assert!(err.contains("number"));
        assert!(err.contains("string"));
    }

    #[test]
    fn test_validate_ignores_undeclared_keys() {
        assert!(add_schema()
            .validate(&args(json!({"a": 1, "b": 2, "extra": true})))
            .is_ok());
    }

    #[test]
    fn test_integer_accepts_whole_floats_only() {
        assert!(SchemaType::Integer.matches(&json!(4)));
        assert!(SchemaType::Integer.matches(&json!(4.0)));
        assert!(!SchemaType::Integer.matches(&json!(4.5)));
    }

    #[test]
    fn test_declaration_shape() {
        let descriptor = ToolDescriptor::new("addTwoNumbers", "add two numbers", add_schema());
        let value = serde_json::to_value(descriptor.declaration()).unwrap();
        assert_eq!(value["name"], "addTwoNumbers");
        assert_eq!(value["parameters"]["type"], "object");
        assert_eq!(value["parameters"]["properties"]["a"]["type"], "number");
        assert_eq!(value["parameters"]["required"], json!(["a", "b"]));
    }

    #[test]
    fn test_descriptor_reads_foreign_input_schema() {
        // Schemas from other servers carry keywords we do not model.
        let raw = json!({
            "name": "createPost",
            "description": "create a post on X",
            "inputSchema": {
                "type": "object",
                "properties": {"status": {"type": "string"}},
                "required": ["status"],
                "additionalProperties": false,
                "$schema": "http://json-schema.org/draft-07/schema#"
            }
        });
        let descriptor: ToolDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(descriptor.parameter_schema.required, vec!["status"]);
    }

    #[test]
    fn test_tool_result_turn_is_user_role_with_prefix() {
        let turn = Turn::tool_result("The sum of 2 and 3 is 5");
        assert_eq!(turn.author, Author::User(TurnOrigin::ToolResult));
        assert_eq!(turn.author.wire_role(), "user");
        assert_eq!(turn.text(), "Tool result: The sum of 2 and 3 is 5");
    }

    #[test]
    fn test_invocation_from_value() {
        assert!(ToolInvocation::from_value("t", Value::Null).is_some());
        assert!(ToolInvocation::from_value("t", json!([1, 2])).is_none());
    }
}
