//! MCP sessions backed by `rmcp`.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::{
    model::{
        CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ProtocolVersion,
        ResourceContents,
    },
    service::{
        ClientInitializeError, DynService, RoleClient, RunningService, ServiceError, ServiceExt,
    },
    transport::TokioChildProcess,
};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{McpConnection, McpConnector, McpError, McpToolResult, McpToolSchema};

pub type McpRunningService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// A live rmcp client session.
pub struct RmcpConnection {
    service: Mutex<McpRunningService>,
}

impl RmcpConnection {
    pub fn new(service: McpRunningService) -> Self {
        Self {
            service: Mutex::new(service),
        }
    }
}

#[async_trait]
impl McpConnection for RmcpConnection {
    async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
        let service = self.service.lock().await;
        if service.is_closed() {
            return Err(McpError::Closed("list_tools: session is closed".into()));
        }
        let tools = match service.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => service
                .list_tools(None)
                .await
                .map(|page| page.tools)
                .map_err(|e| map_service_error("list_tools", e))?,
            Err(e) => return Err(map_service_error("list_tools", e)),
        };
        Ok(tools.into_iter().map(map_tool_schema).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        let arguments = coerce_tool_arguments(name, arguments)?;
        let service = self.service.lock().await;
        if service.is_closed() {
            return Err(McpError::Closed(format!("{name}: session is closed")));
        }
        let result = service
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| map_service_error(name, e))?;
        map_call_result(name, result)
    }
}

/// Connects to a local MCP server spawned as a child process over stdio.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl StdioConnector {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    async fn serve(&self, protocol_version: ProtocolVersion) -> Result<McpRunningService, McpError> {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        command.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let transport = TokioChildProcess::new(command)
            .map_err(|e| McpError::Connection(format!("spawn {}: {e}", self.command)))?;

        let client_info = ClientInfo {
            protocol_version,
            ..Default::default()
        };
        client_info
            .into_dyn()
            .serve(transport)
            .await
            .map_err(map_client_initialize_error)
    }
}

#[async_trait]
impl McpConnector for StdioConnector {
    async fn connect(&self) -> Result<Arc<dyn McpConnection>, McpError> {
        tracing::debug!(command = %self.command, "Starting MCP server");
        let service = match self.serve(ProtocolVersion::LATEST).await {
            Err(McpError::Connection(message)) if is_protocol_mismatch(&message) => {
                tracing::debug!("MCP server rejected the latest protocol, retrying with 2024-11-05");
                self.serve(ProtocolVersion::V_2024_11_05).await?
            }
            other => other?,
        };
        Ok(Arc::new(RmcpConnection::new(service)))
    }
}

fn is_protocol_mismatch(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("protocol") && message.contains("version")
}

fn map_tool_schema(tool: rmcp::model::Tool) -> McpToolSchema {
    McpToolSchema {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: Value::Object((*tool.input_schema).clone()),
    }
}

fn coerce_tool_arguments(tool: &str, value: Value) -> Result<Option<JsonObject>, McpError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: Value = serde_json::from_str(trimmed).map_err(|e| McpError::Execution {
                tool: tool.to_string(),
                message: format!("arguments must be valid JSON: {e}"),
            })?;
            coerce_tool_arguments(tool, parsed)
        }
        other => Err(McpError::Execution {
            tool: tool.to_string(),
            message: format!("arguments must be a JSON object; got {other}"),
        }),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
            continue;
        }
        if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        }
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn map_call_result(name: &str, result: CallToolResult) -> Result<McpToolResult, McpError> {
    let text_content = extract_text_content(&result.content);
    if result.is_error.unwrap_or(false) {
        let message = result
            .structured_content
            .as_ref()
            .map(|v| v.to_string())
            .or(text_content)
            .unwrap_or_else(|| "tool returned an error result".into());
        return Err(McpError::Execution {
            tool: name.to_string(),
            message,
        });
    }
    let content = result
        .content
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect();
    Ok(McpToolResult {
        structured_content: result.structured_content,
        text_content,
        content,
    })
}

fn map_client_initialize_error(error: ClientInitializeError) -> McpError {
    match error {
        ClientInitializeError::ConnectionClosed(context) => {
            McpError::Closed(format!("initialize: {context}"))
        }
        ClientInitializeError::JsonRpcError(error) => McpError::Connection(format!(
            "initialize JSON-RPC error {}: {}",
            error.code.0, error.message
        )),
        other => McpError::Connection(format!("initialize: {other}")),
    }
}

fn map_service_error(context: &str, error: ServiceError) -> McpError {
    match error {
        ServiceError::McpError(error) => McpError::Execution {
            tool: context.to_string(),
            message: format!("MCP error {}: {}", error.code.0, error.message),
        },
        ServiceError::TransportSend(error) => {
            McpError::Closed(format!("{context}: transport send failed: {error}"))
        }
        ServiceError::TransportClosed => McpError::Closed(format!("{context}: transport closed")),
        ServiceError::Cancelled { reason } => {
            let suffix = reason.map(|r| format!(" ({r})")).unwrap_or_default();
            McpError::Closed(format!("{context}: request cancelled{suffix}"))
        }
        ServiceError::Timeout { timeout } => McpError::Timeout(timeout.as_millis() as u64),
        ServiceError::UnexpectedResponse => McpError::Execution {
            tool: context.to_string(),
            message: "unexpected MCP response".into(),
        },
        other => McpError::Connection(format!("{context}: {other}")),
    }
}
