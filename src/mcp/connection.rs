//! Transport-independent view of an MCP server.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::McpError;

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl McpToolSchema {
    /// Reject schemas that cannot describe function-call arguments.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.name.trim().is_empty() {
            return Err(McpError::InvalidSchema("tool name is empty".into()));
        }
        let Some(schema) = self.input_schema.as_object() else {
            return Err(McpError::InvalidSchema(format!(
                "{}: input schema must be a JSON object",
                self.name
            )));
        };
        match schema.get("type") {
            None => Ok(()),
            Some(Value::String(kind)) if kind == "object" => Ok(()),
            Some(other) => Err(McpError::InvalidSchema(format!(
                "{}: input schema type must be \"object\", got {other}",
                self.name
            ))),
        }
    }
}

/// Result of one MCP tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct McpToolResult {
    pub structured_content: Option<Value>,
    pub text_content: Option<String>,
    pub content: Vec<Value>,
}

impl McpToolResult {
    /// Structured content if present, else text, else the raw content items.
    pub fn into_value_or_text(self) -> Value {
        if let Some(structured) = self.structured_content {
            return structured;
        }
        if let Some(text) = self.text_content {
            return Value::String(text);
        }
        Value::Array(self.content)
    }
}

/// An open session with an MCP server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError>;
}

/// Opens new sessions; used again after a session drops.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn McpConnection>, McpError>;
}
