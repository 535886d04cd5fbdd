//! Request processors, applied in order to build each model request.

pub mod agent_transfer;
pub mod auth;
pub mod contents;
pub mod instructions;

use std::sync::Arc;

use crate::agents::{Agent, LlmAgent};
use crate::context::{CallbackContext, InvocationContext};
use crate::error::Result;
use crate::models::{FunctionDeclaration, Llm, LlmRequest};

pub use agent_transfer::{transfer_instructions, transfer_targets};
pub use auth::resume_calls_awaiting_credentials;
pub use contents::build_contents;
pub use instructions::inject_session_state;

/// Everything a request is built from besides the session itself.
pub(crate) struct RequestInputs<'a> {
    pub agent: &'a Arc<Agent>,
    pub llm: &'a LlmAgent,
    pub model: &'a dyn Llm,
    pub transfer_targets: &'a [Arc<Agent>],
    pub declarations: &'a [FunctionDeclaration],
}

pub(crate) async fn build_request(
    ctx: &InvocationContext,
    callback_ctx: &CallbackContext,
    inputs: RequestInputs<'_>,
) -> Result<LlmRequest> {
    let RequestInputs {
        agent,
        llm,
        model,
        transfer_targets,
        declarations,
    } = inputs;
    let mut request = LlmRequest {
        model: model.model_name().to_string(),
        config: llm.generate_content_config.clone().unwrap_or_default(),
        ..Default::default()
    };
    if let Some(schema) = &llm.output_schema {
        request.set_output_schema(schema.clone());
    }

    let global = ctx
        .root_agent()
        .as_llm()
        .and_then(|root| root.global_instruction.as_deref());
    if let Some(global) = global {
        request.append_instructions([inject_session_state(global, callback_ctx).await?]);
    }
    if let Some(instruction) = &llm.instruction {
        request.append_instructions([inject_session_state(instruction, callback_ctx).await?]);
    }

    {
        let session = ctx.session().read().await;
        request.contents = build_contents(
            &session.events,
            agent.name(),
            ctx.branch(),
            llm.include_contents,
        );
    }

    if !transfer_targets.is_empty() {
        let parent = Agent::find_parent(ctx.root_agent(), agent.name());
        request.append_instructions([transfer_instructions(transfer_targets, parent.as_ref())]);
    }

    for declaration in declarations {
        request.append_tool(declaration.clone());
    }
    Ok(request)
}
