use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{McpConnector, McpSessionManager, McpToolSchema};
use crate::context::ToolContext;
use crate::error::WeftError;
use crate::tools::{DynamicTool, DynamicToolProvider, ProviderToolset, ToolArguments, ToolParameters};

/// Tools of one MCP server, exposed to agents.
pub struct McpToolset {
    sessions: McpSessionManager,
}

impl McpToolset {
    pub fn new(sessions: McpSessionManager) -> Self {
        Self { sessions }
    }

    pub fn from_connector(connector: Arc<dyn McpConnector>) -> Self {
        Self::new(McpSessionManager::new(connector))
    }

    /// Toolset for an agent, optionally restricted to `allow`.
    pub fn into_toolset(self, allow: Option<Vec<String>>) -> ProviderToolset {
        let toolset = ProviderToolset::new(Arc::new(self));
        match allow {
            Some(names) => toolset.with_filter(names),
            None => toolset,
        }
    }
}

#[async_trait]
impl DynamicToolProvider for McpToolset {
    async fn list_tools(&self) -> Result<Vec<DynamicTool>, WeftError> {
        let tools = self.sessions.list_tools().await?;
        let mut listed = Vec::with_capacity(tools.len());
        for tool in tools {
            tool.validate()?;
            listed.push(to_dynamic(tool));
        }
        Ok(listed)
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: &ToolArguments,
        _ctx: &ToolContext,
    ) -> Result<Value, WeftError> {
        let result = self.sessions.call_tool(name, args.raw().clone()).await?;
        Ok(result.into_value_or_text())
    }
}

fn to_dynamic(tool: McpToolSchema) -> DynamicTool {
    DynamicTool {
        name: tool.name,
        description: tool.description.unwrap_or_default(),
        parameters: ToolParameters::from_schema(tool.input_schema),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agents::Agent;
    use crate::config::RunConfig;
    use crate::context::testing::context_for;
    use crate::context::CallbackContext;
    use crate::mcp::session::testing::{connection, text, ScriptedConnector};
    use crate::mcp::McpError;
    use crate::tools::Toolset;

    fn search_schema() -> McpToolSchema {
        McpToolSchema {
            name: "search".into(),
            description: Some("query index".into()),
            input_schema: json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        }
    }

    #[tokio::test]
    async fn lists_and_executes_server_tools() {
        let connector = ScriptedConnector::new(vec![connection(
            vec![search_schema()],
            vec![Ok(text("3 results"))],
        )]);
        let toolset = McpToolset::from_connector(connector).into_toolset(None);
        let ctx = context_for(Agent::sequential("root", vec![]), RunConfig::default());

        let tools = toolset.get_tools(&ctx).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "search");
        assert_eq!(tools[0].description(), "query index");
        assert_eq!(tools[0].declaration().parameters["properties"]["q"]["type"], "string");

        let tool_ctx = ToolContext::new(CallbackContext::new(&ctx).await, "c1");
        let result = tools[0]
            .execute(&ToolArguments::new(json!({"q": "rust"})), &tool_ctx)
            .await
            .unwrap();
        assert_eq!(result, json!("3 results"));
    }

    #[tokio::test]
    async fn invalid_schema_is_reported() {
        let broken = McpToolSchema {
            input_schema: json!({"type": "string"}),
            ..search_schema()
        };
        let connector = ScriptedConnector::new(vec![connection(vec![broken], vec![])]);
        let provider = McpToolset::from_connector(connector);

        let err = provider.list_tools().await.unwrap_err();
        assert!(matches!(err, WeftError::Mcp(McpError::InvalidSchema(_))));
    }
}
