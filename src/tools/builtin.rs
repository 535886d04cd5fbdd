//! Control-flow tools the runtime offers to models.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolArguments, ToolParameters};
use crate::context::ToolContext;
use crate::error::WeftError;

pub const TRANSFER_TO_AGENT: &str = "transfer_to_agent";
pub const EXIT_LOOP: &str = "exit_loop";

/// Hands the rest of the turn to another agent in the tree.
#[derive(Debug, Clone)]
pub struct TransferToAgentTool {
    targets: Vec<String>,
    parameters: ToolParameters,
}

impl TransferToAgentTool {
    /// Tool restricted to the given target names.
    pub fn new(targets: Vec<String>) -> Self {
        let parameters = ToolParameters::object()
            .string_enum("agent_name", "Name of the agent to transfer to.", &targets, true)
            .build();
        Self {
            targets,
            parameters,
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

#[async_trait]
impl Tool for TransferToAgentTool {
    fn name(&self) -> &str {
        TRANSFER_TO_AGENT
    }

    fn description(&self) -> &str {
        "Transfer the question to another agent better suited to answer it."
    }

    fn parameters(&self) -> Option<&ToolParameters> {
        Some(&self.parameters)
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<Value, WeftError> {
        let target = args.get_str("agent_name")?;
        if !self.targets.iter().any(|t| t == target) {
            return Err(WeftError::tool(
                TRANSFER_TO_AGENT,
                format!("'{target}' is not a valid transfer target"),
            ));
        }
        ctx.transfer_to_agent(target);
        Ok(Value::Null)
    }
}

/// Stops the enclosing loop agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitLoopTool;

#[async_trait]
impl Tool for ExitLoopTool {
    fn name(&self) -> &str {
        EXIT_LOOP
    }

    fn description(&self) -> &str {
        "Exits the loop. Call this only when you are instructed to do so."
    }

    async fn execute(&self, _args: &ToolArguments, ctx: &ToolContext) -> Result<Value, WeftError> {
        ctx.escalate();
        ctx.skip_summarization();
        Ok(json!({}))
    }
}
