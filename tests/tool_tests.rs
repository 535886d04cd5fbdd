//! Tests for the tool system.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::*;
use weft::agents::{Agent, LlmAgent};
use weft::error::WeftError;
use weft::tools::*;
use weft::types::Content;
use weft::util::RetryPolicy;

#[test]
fn parameter_builder_constructs_schema() {
    let params = ToolParameters::object()
        .string("query", "Search query", true)
        .number("limit", "Max results", false)
        .boolean("verbose", "Enable verbose output", false)
        .build();

    let schema = &params.schema;
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["query"]["type"], "string");
    assert_eq!(schema["properties"]["limit"]["type"], "number");
    assert_eq!(schema["required"], json!(["query"]));
}

#[test]
fn parameter_builder_string_enum() {
    let params = ToolParameters::object()
        .string_enum("format", "Output format", &["json", "text", "csv"], true)
        .build();

    assert_eq!(
        params.schema["properties"]["format"]["enum"],
        json!(["json", "text", "csv"])
    );
}

#[test]
fn declarations_fall_back_to_an_empty_object_schema() {
    let declaration = ExitLoopTool.declaration();
    assert_eq!(declaration.name, EXIT_LOOP);
    assert_eq!(declaration.parameters, ToolParameters::empty().schema);
}

#[test]
fn transfer_tool_enumerates_its_targets() {
    let tool = TransferToAgentTool::new(vec!["billing".into(), "support".into()]);
    let declaration = tool.declaration();
    assert_eq!(declaration.name, TRANSFER_TO_AGENT);
    assert_eq!(
        declaration.parameters["properties"]["agent_name"]["enum"],
        json!(["billing", "support"])
    );
}

#[test]
fn function_tool_flags() {
    let tool = FunctionTool::new("wait", "Wait for approval", ToolParameters::empty(), |_, _| async {
        Ok(json!(null))
    })
    .long_running();
    assert!(tool.is_long_running());
    assert!(tool.retry_policy().is_none());
}

#[tokio::test]
async fn invalid_arguments_become_an_error_payload() {
    let llm = MockLlm::new("mock");
    llm.queue_call("add", json!({"a": "two", "b": 3}));
    llm.queue_text("sorry");
    let agent = Agent::llm(
        "calc",
        LlmAgent::builder().model(llm.clone()).tools(vec![add_tool()]).build(),
    );

    let events = collect(runner(agent).run("u1", "s1", Content::user("2+3?")))
        .await
        .unwrap();

    let responses = events[1].function_responses();
    assert_eq!(responses.len(), 1);
    let error = responses[0].response["error"].as_str().unwrap();
    assert!(error.contains("Invalid arguments for tool 'add'"), "{error}");
    assert!(error.contains("field 'a' expected type 'integer'"), "{error}");
    assert_eq!(events.last().unwrap().text(), "sorry");
}

#[tokio::test]
async fn unknown_tools_are_reported_to_the_model() {
    let llm = MockLlm::new("mock");
    llm.queue_call("missing_tool", json!({}));
    llm.queue_text("ok");
    let agent = Agent::llm(
        "calc",
        LlmAgent::builder().model(llm.clone()).tools(vec![add_tool()]).build(),
    );

    let events = collect(runner(agent).run("u1", "s1", Content::user("hi")))
        .await
        .unwrap();

    let responses = events[1].function_responses();
    assert!(responses[0].is_error());
    assert_eq!(responses[0].response, json!({"error": "Tool 'missing_tool' not found"}));
    assert_eq!(events.last().unwrap().text(), "ok");
}

#[tokio::test(start_paused = true)]
async fn retry_policy_reruns_failed_executions() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flaky: Arc<dyn Tool> = Arc::new(
        FunctionTool::new("flaky", "Fails twice", ToolParameters::empty(), move |_, _| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WeftError::tool("flaky", "not yet"))
                } else {
                    Ok(json!({"status": "done"}))
                }
            }
        })
        .with_retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
            multiplier: 1.0,
            jitter: false,
        }),
    );

    let llm = MockLlm::new("mock");
    llm.queue_call("flaky", json!({}));
    llm.queue_text("finished");
    let agent = Agent::llm(
        "worker",
        LlmAgent::builder().model(llm.clone()).tools(vec![flaky]).build(),
    );

    let events = collect(runner(agent).run("u1", "s1", Content::user("go")))
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(events[1].function_responses()[0].response, json!({"status": "done"}));
}
