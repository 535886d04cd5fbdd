//! Tool dispatch: turns a model event's function calls into one response event.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use futures::future;
use serde_json::{json, Value};

use crate::agents::LlmAgent;
use crate::auth::{CredentialRequest, REQUEST_CREDENTIAL_FUNCTION_NAME};
use crate::context::{CallbackContext, InvocationContext, ToolContext};
use crate::error::{Result, WeftError};
use crate::events::{Event, EventActions};
use crate::tools::validation::validate_arguments;
use crate::tools::{Tool, ToolArguments};
use crate::types::{Content, FunctionCall, FunctionResponse, Part, Role};

/// Tools available to one model call, by name.
pub type ToolMap = HashMap<String, Arc<dyn Tool>>;

/// Prefix of call ids generated for calls the model left unnamed.
const GENERATED_CALL_ID_PREFIX: &str = "weft-";

pub(crate) fn generate_call_id() -> String {
    format!("{GENERATED_CALL_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Give every function call without an id a generated one.
pub(crate) fn assign_call_ids(content: &mut Content) {
    for part in &mut content.parts {
        if let Part::FunctionCall(call) = part {
            if call.id.is_empty() {
                call.id = generate_call_id();
            }
        }
    }
}

/// Ids of calls in `content` that target long-running tools.
pub(crate) fn long_running_call_ids(content: &Content, tools: &ToolMap) -> BTreeSet<String> {
    content
        .function_calls()
        .into_iter()
        .filter(|call| tools.get(&call.name).is_some_and(|tool| tool.is_long_running()))
        .map(|call| call.id.clone())
        .collect()
}

struct CallOutcome {
    response: Option<FunctionResponse>,
    actions: EventActions,
}

/// Execute the function calls of `call_event` and build the response event.
///
/// All calls run concurrently. Response parts keep the order of the calls
/// and per-call actions are merged in that same order. With `only` set,
/// calls whose ids are not in the set are skipped. Returns `None` when no
/// call produced a response or an action.
pub async fn handle_function_calls(
    ctx: &InvocationContext,
    call_event: &Event,
    tools: &ToolMap,
    only: Option<&HashSet<String>>,
) -> Result<Option<Event>> {
    let calls: Vec<&FunctionCall> = call_event
        .function_calls()
        .into_iter()
        .filter(|call| only.map_or(true, |ids| ids.contains(&call.id)))
        .collect();
    if calls.is_empty() {
        return Ok(None);
    }

    let agent = ctx.agent();
    let llm = agent.as_llm();
    let base = CallbackContext::new(ctx).await;

    let outcomes = future::join_all(
        calls
            .iter()
            .map(|call| run_call(ctx, &base, call, tools, llm)),
    )
    .await;

    let mut parts = Vec::new();
    let mut actions = EventActions::default();
    for outcome in outcomes {
        let outcome = outcome?;
        if let Some(response) = outcome.response {
            parts.push(Part::FunctionResponse(response));
        }
        actions.merge(outcome.actions);
    }
    if parts.is_empty() && actions.is_empty() {
        return Ok(None);
    }

    let mut event = Event::new(ctx.invocation_id(), agent.name())
        .with_branch(ctx.branch().map(str::to_string))
        .with_actions(actions);
    if !parts.is_empty() {
        event.content = Some(Content::new(Role::User, parts));
    }
    Ok(Some(event))
}

async fn run_call(
    ctx: &InvocationContext,
    base: &CallbackContext,
    call: &FunctionCall,
    tools: &ToolMap,
    llm: Option<&LlmAgent>,
) -> Result<CallOutcome> {
    let tool_ctx = ToolContext::new(base.fork(), call.id.clone());

    let Some(tool) = tools.get(&call.name) else {
        tracing::warn!(
            invocation_id = %ctx.invocation_id(),
            tool = %call.name,
            "Model called an unknown tool"
        );
        return Ok(CallOutcome {
            response: Some(FunctionResponse::new(
                &call.id,
                &call.name,
                json!({ "error": format!("Tool '{}' not found", call.name) }),
            )),
            actions: EventActions::default(),
        });
    };

    let mut result = None;
    if let Some(llm) = llm {
        for callback in &llm.before_tool_callbacks {
            if let Some(value) = callback(tool_ctx.clone(), call.clone()).await? {
                result = Some(value);
                break;
            }
        }
    }
    let mut result = match result {
        Some(value) => value,
        None => invoke_tool(ctx, tool.as_ref(), call, &tool_ctx).await?,
    };

    if let Some(llm) = llm {
        for callback in &llm.after_tool_callbacks {
            if let Some(value) = callback(tool_ctx.clone(), call.clone(), result.clone()).await? {
                result = value;
                break;
            }
        }
    }

    let actions = tool_ctx.actions();
    let awaiting_credential = actions.requested_auth_configs.contains_key(&call.id);
    let response = if awaiting_credential || (tool.is_long_running() && result.is_null()) {
        None
    } else {
        let payload = if result.is_object() {
            result
        } else {
            json!({ "result": result })
        };
        Some(FunctionResponse::new(&call.id, &call.name, payload))
    };

    Ok(CallOutcome { response, actions })
}

/// Validate and execute one call. Failures become `{"error": ...}` payloads
/// except fatal errors, which abort the invocation.
async fn invoke_tool(
    ctx: &InvocationContext,
    tool: &dyn Tool,
    call: &FunctionCall,
    tool_ctx: &ToolContext,
) -> Result<Value> {
    let args = ToolArguments::new(call.args.clone());
    if let Some(parameters) = tool.parameters() {
        if let Err(message) = validate_arguments(args.raw(), &parameters.schema) {
            tracing::debug!(tool = %call.name, %message, "Rejected tool arguments");
            return Ok(json!({
                "error": format!("Invalid arguments for tool '{}': {message}", call.name)
            }));
        }
    }

    tracing::debug!(
        invocation_id = %ctx.invocation_id(),
        tool = %call.name,
        call_id = %call.id,
        "Executing tool"
    );
    let outcome = match tool.retry_policy() {
        Some(policy) => {
            policy
                .execute_when(|| tool.execute(&args, tool_ctx), |e: &WeftError| !e.is_fatal())
                .await
        }
        None => tool.execute(&args, tool_ctx).await,
    };

    match outcome {
        Ok(value) => Ok(value),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
            Ok(json!({ "error": e.to_string() }))
        }
    }
}

/// Event asking the client for the credentials requested during dispatch.
///
/// Each request becomes a long-running `request_credential` call whose
/// arguments name the original call.
pub fn credential_request_event(
    ctx: &InvocationContext,
    response_event: &Event,
) -> Result<Option<Event>> {
    let requested = &response_event.actions.requested_auth_configs;
    if requested.is_empty() {
        return Ok(None);
    }

    let mut parts = Vec::with_capacity(requested.len());
    let mut ids = BTreeSet::new();
    for (call_id, auth_config) in requested {
        let args = serde_json::to_value(CredentialRequest {
            function_call_id: call_id.clone(),
            auth_config: auth_config.clone(),
        })?;
        let id = generate_call_id();
        ids.insert(id.clone());
        parts.push(Part::FunctionCall(FunctionCall::new(
            id,
            REQUEST_CREDENTIAL_FUNCTION_NAME,
            args,
        )));
    }

    tracing::debug!(
        invocation_id = %ctx.invocation_id(),
        agent = %ctx.agent().name(),
        count = parts.len(),
        "Awaiting credentials"
    );
    let mut event = Event::new(ctx.invocation_id(), ctx.agent().name())
        .with_branch(ctx.branch().map(str::to_string))
        .with_content(Content::new(Role::Model, parts));
    event.long_running_tool_ids = ids;
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::agents::Agent;
    use crate::auth::AuthConfig;
    use crate::config::RunConfig;
    use crate::context::testing::context_for;
    use crate::tools::{FunctionTool, ToolParameters};
    use crate::util::RetryPolicy;

    fn add_tool() -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            "add",
            "Add two integers",
            ToolParameters::object()
                .integer("a", "left", true)
                .integer("b", "right", true)
                .build(),
            |args, _ctx| async move { Ok(json!(args.get_i64("a")? + args.get_i64("b")?)) },
        ))
    }

    fn tool_map(tools: Vec<Arc<dyn Tool>>) -> ToolMap {
        tools.into_iter().map(|t| (t.name().to_string(), t)).collect()
    }

    fn call_event(calls: Vec<FunctionCall>) -> Event {
        Event::new("inv", "assistant").with_content(Content::new(
            Role::Model,
            calls.into_iter().map(Part::FunctionCall).collect(),
        ))
    }

    fn ctx() -> InvocationContext {
        context_for(
            Agent::llm("assistant", LlmAgent::builder().build()),
            RunConfig::default(),
        )
    }

    fn responses(event: &Event) -> Vec<(String, Value)> {
        event
            .function_responses()
            .into_iter()
            .map(|r| (r.id.clone(), r.response.clone()))
            .collect()
    }

    #[tokio::test]
    async fn responses_follow_call_order() {
        let slow = Arc::new(FunctionTool::new(
            "slow",
            "Sleeps first",
            ToolParameters::empty(),
            |_args, _ctx| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({"done": "slow"}))
            },
        )) as Arc<dyn Tool>;
        let tools = tool_map(vec![slow, add_tool()]);
        let event = call_event(vec![
            FunctionCall::new("c1", "slow", json!({})),
            FunctionCall::new("c2", "add", json!({"a": 2, "b": 3})),
        ]);

        let response = handle_function_calls(&ctx(), &event, &tools, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            responses(&response),
            vec![
                ("c1".to_string(), json!({"done": "slow"})),
                ("c2".to_string(), json!({"result": 5})),
            ]
        );
        assert_eq!(response.content.as_ref().unwrap().role, Role::User);
        assert_eq!(response.author, "assistant");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_become_error_payloads() {
        let tools = tool_map(vec![add_tool()]);
        let event = call_event(vec![
            FunctionCall::new("c1", "mul", json!({})),
            FunctionCall::new("c2", "add", json!({"a": "two", "b": 3})),
        ]);

        let response = handle_function_calls(&ctx(), &event, &tools, None)
            .await
            .unwrap()
            .unwrap();
        let parts = responses(&response);

        assert_eq!(parts[0].1, json!({"error": "Tool 'mul' not found"}));
        let message = parts[1].1["error"].as_str().unwrap();
        assert!(message.starts_with("Invalid arguments for tool 'add'"), "{message}");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_policy_recovers_from_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let flaky = FunctionTool::new("flaky", "Fails twice", ToolParameters::empty(), move |_args, _ctx| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WeftError::tool("flaky", "upstream unavailable"))
                } else {
                    Ok(json!({"status": "ok"}))
                }
            }
        })
        .with_retry(RetryPolicy::with_max_attempts(3));
        let tools = tool_map(vec![Arc::new(flaky) as Arc<dyn Tool>]);
        let event = call_event(vec![FunctionCall::new("c1", "flaky", json!({}))]);

        let response = handle_function_calls(&ctx(), &event, &tools, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(responses(&response)[0].1, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn failure_without_retry_is_reported_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let broken = FunctionTool::new("broken", "Always fails", ToolParameters::empty(), move |_args, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(WeftError::tool("broken", "boom")) }
        });
        let tools = tool_map(vec![Arc::new(broken) as Arc<dyn Tool>]);
        let event = call_event(vec![FunctionCall::new("c1", "broken", json!({}))]);

        let response = handle_function_calls(&ctx(), &event, &tools, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(response.function_responses()[0].is_error());
    }

    #[tokio::test]
    async fn long_running_tool_without_result_produces_no_response() {
        let approval = FunctionTool::new(
            "approve",
            "Ask a human",
            ToolParameters::empty(),
            |_args, _ctx| async move { Ok(Value::Null) },
        )
        .long_running();
        let tools = tool_map(vec![Arc::new(approval) as Arc<dyn Tool>]);
        let event = call_event(vec![FunctionCall::new("c1", "approve", json!({}))]);

        assert_eq!(long_running_call_ids(event.content.as_ref().unwrap(), &tools).len(), 1);
        let response = handle_function_calls(&ctx(), &event, &tools, None).await.unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn state_writes_are_merged_and_filter_applies() {
        let writer = FunctionTool::new("remember", "Writes state", ToolParameters::empty(), |_args, ctx| async move {
            ctx.state().set(format!("seen:{}", ctx.function_call_id()), json!(true));
            Ok(json!({}))
        });
        let tools = tool_map(vec![Arc::new(writer) as Arc<dyn Tool>]);
        let event = call_event(vec![
            FunctionCall::new("c1", "remember", json!({})),
            FunctionCall::new("c2", "remember", json!({})),
        ]);
        let only: HashSet<String> = ["c2".to_string()].into();

        let response = handle_function_calls(&ctx(), &event, &tools, Some(&only))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.function_responses().len(), 1);
        assert!(response.actions.state_delta.contains_key("seen:c2"));
        assert!(!response.actions.state_delta.contains_key("seen:c1"));
    }

    #[tokio::test]
    async fn credential_request_pauses_the_call() {
        let secured = FunctionTool::new("repos", "Lists repos", ToolParameters::empty(), |_args, ctx| async move {
            let config = AuthConfig::new("github", json!({"type": "oauth2"}));
            match ctx.get_auth_response(&config) {
                Some(credential) => Ok(json!({"token": credential.payload})),
                None => {
                    ctx.request_credential(config);
                    Ok(Value::Null)
                }
            }
        });
        let tools = tool_map(vec![Arc::new(secured) as Arc<dyn Tool>]);
        let event = call_event(vec![FunctionCall::new("c1", "repos", json!({}))]);
        let ctx = ctx();

        let response = handle_function_calls(&ctx, &event, &tools, None)
            .await
            .unwrap()
            .unwrap();
        assert!(response.content.is_none());

        let request = credential_request_event(&ctx, &response).unwrap().unwrap();
        let calls = request.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, REQUEST_CREDENTIAL_FUNCTION_NAME);
        assert_eq!(calls[0].args["function_call_id"], "c1");
        assert!(request.long_running_tool_ids.contains(&calls[0].id));
        assert!(request.is_final_response());
    }

    #[test]
    fn missing_call_ids_are_generated() {
        let mut content = Content::new(
            Role::Model,
            vec![
                Part::FunctionCall(FunctionCall::new("", "add", json!({}))),
                Part::FunctionCall(FunctionCall::new("keep", "add", json!({}))),
            ],
        );
        assign_call_ids(&mut content);
        let calls = content.function_calls();
        assert!(calls[0].id.starts_with(GENERATED_CALL_ID_PREFIX));
        assert_eq!(calls[1].id, "keep");
    }
}
