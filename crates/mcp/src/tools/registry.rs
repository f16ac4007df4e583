// MCP tool trait, registry, and the collaborator seam the handler calls through

use crate::error::ToolError;
use crate::protocol::{CallToolResult, ToolSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tool executor trait
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool schema for MCP
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, arguments: Value) -> Result<CallToolResult, ToolError>;
}

/// The tool catalog and executor the protocol handler delegates to.
#[async_trait::async_trait]
pub trait ToolProvider: Send + Sync {
    /// Static catalog advertised by `tools/list`.
    fn list_tools(&self) -> Vec<ToolSchema>;

    /// Run a tool. Unknown names fail with [`ToolError::NotFound`] before
    /// anything executes.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ToolError>;
}

/// Tool registry for managing available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `echo`, `get_time` and `calculate`.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::EchoTool));
        registry.register(Arc::new(super::TimeTool));
        registry.register(Arc::new(super::CalculateTool));
        registry
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        self.tools.insert(schema.name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all tool schemas, ordered by name
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait::async_trait]
impl ToolProvider for ToolRegistry {
    fn list_tools(&self) -> Vec<ToolSchema> {
        self.list_schemas()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments).await
    }
}

/// Deserialize tool arguments, treating a missing payload as an empty object.
pub fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("{}: {}", tool, e)))
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> Value {
    serde_json::json!({
        "type": "string",
        "description": description
    })
}
