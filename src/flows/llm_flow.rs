//! The model/tool step loop behind every LLM agent.

use std::sync::Arc;

use async_stream::try_stream;
use futures::{stream, StreamExt};

use super::functions::{
    assign_call_ids, credential_request_event, handle_function_calls, long_running_call_ids,
    ToolMap,
};
use super::processors::{self, build_request, RequestInputs};
use crate::agents::llm::resolve_model;
use crate::agents::{Agent, BeforeModelOutcome, LlmAgent};
use crate::config::StreamingMode;
use crate::context::{CallbackContext, InvocationContext};
use crate::error::{Result, WeftError};
use crate::events::{Event, EventStream};
use crate::models::{FunctionDeclaration, LlmRequest, LlmResponse, LlmResponseStream};
use crate::tools::{Tool, TransferToAgentTool};

/// Whether a flow may hand the turn to other agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPolicy {
    /// No transfer tool is offered.
    Isolated,
    /// `transfer_to_agent` is offered with every eligible target.
    TreeTransferable,
}

/// Drives one LLM agent: call the model, dispatch tools, repeat.
#[derive(Debug, Clone, Copy)]
pub struct LlmFlow {
    policy: TransferPolicy,
}

impl LlmFlow {
    pub fn new(policy: TransferPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> TransferPolicy {
        self.policy
    }

    /// Run steps until a final response, an escalation or the end of the turn.
    pub fn run(&self, ctx: InvocationContext) -> EventStream {
        let policy = self.policy;
        Box::pin(try_stream! {
            loop {
                let mut last: Option<Event> = None;
                let mut step = run_one_step(policy, ctx.clone());
                while let Some(event) = step.next().await {
                    let event = event?;
                    last = Some(event.clone());
                    yield event;
                }

                let Some(last) = last else {
                    break;
                };
                if last.is_final_response() || last.partial || last.actions.escalate || ctx.is_ended() {
                    break;
                }
            }
        })
    }
}

struct StepTools {
    map: ToolMap,
    declarations: Vec<FunctionDeclaration>,
    transfer_targets: Vec<Arc<Agent>>,
}

async fn collect_tools(
    ctx: &InvocationContext,
    agent: &Arc<Agent>,
    llm: &LlmAgent,
    policy: TransferPolicy,
) -> Result<StepTools> {
    let mut tools: Vec<Arc<dyn Tool>> = llm.tools.clone();
    for toolset in &llm.toolsets {
        tools.extend(toolset.get_tools(ctx).await?);
    }

    let transfer_targets = match policy {
        TransferPolicy::Isolated => Vec::new(),
        TransferPolicy::TreeTransferable => {
            processors::transfer_targets(ctx.root_agent(), agent, llm)
        }
    };
    if !transfer_targets.is_empty() {
        let names = transfer_targets.iter().map(|t| t.name().to_string()).collect();
        tools.push(Arc::new(TransferToAgentTool::new(names)));
    }

    let declarations = tools.iter().map(|tool| tool.declaration()).collect();
    let map = tools
        .into_iter()
        .map(|tool| (tool.name().to_string(), tool))
        .collect();
    Ok(StepTools {
        map,
        declarations,
        transfer_targets,
    })
}

fn run_one_step(policy: TransferPolicy, ctx: InvocationContext) -> EventStream {
    Box::pin(try_stream! {
        let agent = Arc::clone(ctx.agent());
        let llm = agent
            .as_llm()
            .ok_or_else(|| WeftError::InvalidState(format!("{} is not an LLM agent", agent.name())))?;
        let tools = collect_tools(&ctx, &agent, llm, policy).await?;

        if let Some(event) = processors::resume_calls_awaiting_credentials(&ctx, &tools.map).await? {
            yield event;
            if ctx.is_ended() {
                return;
            }
        }

        let model = resolve_model(&agent, &ctx)?;
        let callback_ctx = CallbackContext::new(&ctx).await;
        let request = build_request(
            &ctx,
            &callback_ctx,
            RequestInputs {
                agent: &agent,
                llm,
                model: model.as_ref(),
                transfer_targets: &tools.transfer_targets,
                declarations: &tools.declarations,
            },
        )
        .await?;

        tracing::debug!(
            invocation_id = %ctx.invocation_id(),
            agent = %agent.name(),
            branch = ?ctx.branch(),
            model = %request.model,
            contents = request.contents.len(),
            tools = request.tools.len(),
            "Calling model"
        );
        let mut responses: LlmResponseStream = match before_model(llm, &callback_ctx, request).await? {
            BeforeModelOutcome::Respond(response) => Box::pin(stream::once(async move { Ok(response) })),
            BeforeModelOutcome::Continue(request) => {
                ctx.increment_llm_call_count()?;
                let streaming = ctx.run_config().streaming_mode == StreamingMode::Sse;
                model.generate(request, streaming).await?
            }
        };

        let mut callback_actions_pending = true;
        while let Some(response) = responses.next().await {
            let response = after_model(llm, &callback_ctx, response?).await?;
            let mut event = model_event(&ctx, &tools.map, response);
            if !event.partial && callback_actions_pending && callback_ctx.has_changes() {
                let mut actions = callback_ctx.actions();
                actions.merge(std::mem::take(&mut event.actions));
                event.actions = actions;
                callback_actions_pending = false;
            }
            yield event.clone();

            if event.partial || event.function_calls().is_empty() {
                continue;
            }

            let Some(response_event) = handle_function_calls(&ctx, &event, &tools.map, None).await? else {
                continue;
            };
            let credential_event = credential_request_event(&ctx, &response_event)?;
            let transfer = response_event.actions.transfer_to_agent.clone();
            yield response_event;
            if let Some(credential_event) = credential_event {
                yield credential_event;
            }

            if let Some(target_name) = transfer {
                let target = Agent::find_agent(ctx.root_agent(), &target_name)
                    .ok_or_else(|| WeftError::AgentNotFound(target_name.clone()))?;
                tracing::debug!(
                    invocation_id = %ctx.invocation_id(),
                    from = %agent.name(),
                    to = %target.name(),
                    "Transferring"
                );
                let mut transferred = target.run(&ctx);
                while let Some(event) = transferred.next().await {
                    yield event?;
                }
            }
        }
    })
}

async fn before_model(
    llm: &LlmAgent,
    callback_ctx: &CallbackContext,
    request: LlmRequest,
) -> Result<BeforeModelOutcome> {
    let mut request = request;
    for callback in &llm.before_model_callbacks {
        match callback(callback_ctx.clone(), request).await? {
            BeforeModelOutcome::Continue(next) => request = next,
            respond @ BeforeModelOutcome::Respond(_) => return Ok(respond),
        }
    }
    Ok(BeforeModelOutcome::Continue(request))
}

async fn after_model(
    llm: &LlmAgent,
    callback_ctx: &CallbackContext,
    response: LlmResponse,
) -> Result<LlmResponse> {
    for callback in &llm.after_model_callbacks {
        if let Some(replaced) = callback(callback_ctx.clone(), response.clone()).await? {
            return Ok(replaced);
        }
    }
    Ok(response)
}

fn model_event(ctx: &InvocationContext, tools: &ToolMap, response: LlmResponse) -> Event {
    let mut event = Event::new(ctx.invocation_id(), ctx.agent().name())
        .with_branch(ctx.branch().map(str::to_string))
        .with_partial(response.partial);
    event.turn_complete = response.turn_complete;
    event.error_code = response.error_code;
    event.error_message = response.error_message;
    event.usage = response.usage;

    if let Some(mut content) = response.content {
        if !event.partial {
            assign_call_ids(&mut content);
            event.long_running_tool_ids = long_running_call_ids(&content, tools);
        }
        event.content = Some(content);
    }
    event
}
