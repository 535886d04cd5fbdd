//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::types::ToolParameters;
use crate::context::ToolContext;
use crate::error::WeftError;
use crate::models::FunctionDeclaration;
use crate::util::RetryPolicy;

/// A callable the model can invoke by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier-safe name the model calls.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Argument schema; `None` accepts any arguments.
    fn parameters(&self) -> Option<&ToolParameters> {
        None
    }

    /// The result may arrive in a later turn; a `null` result produces no
    /// function response.
    fn is_long_running(&self) -> bool {
        false
    }

    /// Retry failed executions with this policy. `None` surfaces the first failure.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Declaration sent to the model.
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self
                .parameters()
                .map(|p| p.schema.clone())
                .unwrap_or_else(|| ToolParameters::empty().schema),
        }
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, WeftError>;
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, WeftError>> + Send>>
    + Send
    + Sync;

/// Tool backed by an async closure.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Option<ToolParameters>,
    long_running: bool,
    retry: Option<RetryPolicy>,
    handler: Arc<ToolHandler>,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, WeftError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Some(parameters),
            long_running: false,
            retry: None,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// Mark the tool as long-running.
    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    /// Retry failures with `policy`.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Option<&ToolParameters> {
        self.parameters.as_ref()
    }

    fn is_long_running(&self) -> bool {
        self.long_running
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry.clone()
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, WeftError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("long_running", &self.long_running)
            .finish()
    }
}
