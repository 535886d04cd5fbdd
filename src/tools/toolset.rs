//! Tools discovered at runtime (e.g., from an MCP server).

use std::sync::Arc;

use async_trait::async_trait;

use super::{Tool, ToolArguments, ToolParameters};
use crate::context::{InvocationContext, ToolContext};
use crate::error::WeftError;

/// A group of tools resolved once per model call.
#[async_trait]
pub trait Toolset: Send + Sync {
    async fn get_tools(&self, ctx: &InvocationContext) -> Result<Vec<Arc<dyn Tool>>, WeftError>;
}

/// Description of a tool offered by a [`DynamicToolProvider`].
#[derive(Debug, Clone)]
pub struct DynamicTool {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

/// Source that can list and execute tools by name.
#[async_trait]
pub trait DynamicToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<DynamicTool>, WeftError>;

    async fn execute_tool(
        &self,
        name: &str,
        args: &ToolArguments,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, WeftError>;
}

/// Exposes one [`DynamicTool`] through the [`Tool`] trait.
pub struct DynamicToolAdapter {
    provider: Arc<dyn DynamicToolProvider>,
    tool: DynamicTool,
}

impl DynamicToolAdapter {
    pub fn new(provider: Arc<dyn DynamicToolProvider>, tool: DynamicTool) -> Self {
        Self { provider, tool }
    }
}

#[async_trait]
impl Tool for DynamicToolAdapter {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn parameters(&self) -> Option<&ToolParameters> {
        Some(&self.tool.parameters)
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, WeftError> {
        self.provider.execute_tool(&self.tool.name, args, ctx).await
    }
}

/// Toolset listing every tool of a provider, optionally filtered by name.
pub struct ProviderToolset {
    provider: Arc<dyn DynamicToolProvider>,
    allow: Option<Vec<String>>,
}

impl ProviderToolset {
    pub fn new(provider: Arc<dyn DynamicToolProvider>) -> Self {
        Self {
            provider,
            allow: None,
        }
    }

    /// Only expose tools whose names are in `names`.
    pub fn with_filter(mut self, names: Vec<String>) -> Self {
        self.allow = Some(names);
        self
    }
}

#[async_trait]
impl Toolset for ProviderToolset {
    async fn get_tools(&self, _ctx: &InvocationContext) -> Result<Vec<Arc<dyn Tool>>, WeftError> {
        let listed = self.provider.list_tools().await?;
        Ok(listed
            .into_iter()
            .filter(|tool| {
                self.allow
                    .as_ref()
                    .map_or(true, |allow| allow.iter().any(|name| name == &tool.name))
            })
            .map(|tool| {
                Arc::new(DynamicToolAdapter::new(Arc::clone(&self.provider), tool)) as Arc<dyn Tool>
            })
            .collect())
    }
}
