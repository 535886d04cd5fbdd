//! Run a whole agent as a single tool call.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use super::{Tool, ToolArguments, ToolParameters};
use crate::agents::Agent;
use crate::context::{Services, ToolContext};
use crate::error::WeftError;
use crate::runner::Runner;
use crate::sessions::{persistent_delta, InMemorySessionService};
use crate::types::Content;

/// Wraps an agent so another agent can call it like a function.
///
/// Each call runs the agent in a fresh session seeded with the caller's
/// persistent state. State changes made by the wrapped agent flow back into
/// the caller's state; its events do not.
pub struct AgentTool {
    agent: Arc<Agent>,
    parameters: ToolParameters,
}

impl AgentTool {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Arc::new(agent),
            parameters: ToolParameters::object()
                .string("request", "The request to hand to the agent", true)
                .build(),
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> &str {
        self.agent.description()
    }

    fn parameters(&self) -> Option<&ToolParameters> {
        Some(&self.parameters)
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<Value, WeftError> {
        let request = args.get_str("request")?.to_string();
        let parent = ctx.invocation();

        let services = Services {
            session_service: Arc::new(InMemorySessionService::new()),
            artifact_service: parent.services().artifact_service.clone(),
            memory_service: parent.services().memory_service.clone(),
        };
        let runner = Runner::new(parent.session_key().app_name.clone(), Arc::clone(&self.agent), services)?
            .with_llm_registry(Arc::clone(parent.llm_registry()))
            .with_run_config(parent.run_config().clone());

        let user_id = parent.session_key().user_id.clone();
        let session = runner
            .services()
            .session_service
            .create_session(
                runner.app_name(),
                &user_id,
                Some(persistent_delta(&ctx.state().to_map())),
                None,
            )
            .await?;

        tracing::debug!(agent = %self.agent.name(), "Running agent as tool");
        let mut last_text = None;
        let mut events = runner.run(user_id, session.id, Content::user(request));
        while let Some(event) = events.next().await {
            let event = event?;
            for (key, value) in &event.actions.state_delta {
                ctx.state().set(key.clone(), value.clone());
            }
            if event.is_final_response() {
                let text = event.text();
                if !text.is_empty() {
                    last_text = Some(text);
                }
            }
        }

        let Some(text) = last_text else {
            return Ok(Value::String(String::new()));
        };
        let structured = self
            .agent
            .as_llm()
            .is_some_and(|llm| llm.output_schema.is_some());
        if structured {
            if let Ok(value) = serde_json::from_str(&text) {
                return Ok(value);
            }
        }
        Ok(Value::String(text))
    }
}
