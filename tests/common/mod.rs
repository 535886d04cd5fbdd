//! Shared test helpers and scripted model.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::{json, Value};

use weft::artifacts::InMemoryArtifactService;
use weft::config::RunConfig;
use weft::context::Services;
use weft::error::WeftError;
use weft::events::{Event, EventStream};
use weft::memory::InMemoryMemoryService;
use weft::models::{Llm, LlmRequest, LlmResponse, LlmResponseStream};
use weft::runner::Runner;
use weft::sessions::InMemorySessionService;
use weft::agents::Agent;
use weft::tools::{FunctionTool, Tool, ToolParameters};
use weft::types::{Content, FunctionCall, Part, Role};

/// A model that replays queued replies and records every request.
pub struct MockLlm {
    name: String,
    replies: Mutex<Vec<Content>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Mock answering with `replies` in order, then "Mock response".
    pub fn scripted(name: &str, replies: Vec<Content>) -> Arc<Self> {
        let llm = Self::new(name);
        for reply in replies {
            llm.queue(reply);
        }
        llm
    }

    pub fn queue(&self, reply: Content) {
        self.replies.lock().unwrap().push(reply);
    }

    pub fn queue_text(&self, text: &str) {
        self.queue(Content::model(text));
    }

    pub fn queue_call(&self, name: &str, args: Value) {
        self.queue(call(name, args));
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Llm for MockLlm {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: LlmRequest, _stream: bool) -> Result<LlmResponseStream, WeftError> {
        self.requests.lock().unwrap().push(request);
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Content::model("Mock response")
            } else {
                replies.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(vec![Ok(LlmResponse::from_content(reply))])))
    }
}

/// Model content calling `name`; the runtime assigns the call id.
pub fn call(name: &str, args: Value) -> Content {
    Content::new(
        Role::Model,
        vec![Part::FunctionCall(FunctionCall::new("", name, args))],
    )
}

/// Every text fragment in a request, in order.
pub fn request_texts(request: &LlmRequest) -> Vec<String> {
    request
        .contents
        .iter()
        .map(Content::text)
        .filter(|text| !text.is_empty())
        .collect()
}

pub fn services() -> Services {
    Services {
        session_service: Arc::new(InMemorySessionService::new()),
        artifact_service: Some(Arc::new(InMemoryArtifactService::new())),
        memory_service: Some(Arc::new(InMemoryMemoryService::new())),
    }
}

pub fn runner(agent: Agent) -> Runner {
    Runner::new("test_app", agent, services()).unwrap()
}

pub fn runner_with_config(agent: Agent, run_config: RunConfig) -> Runner {
    runner(agent).with_run_config(run_config)
}

/// Drain a stream, stopping at the first error.
pub async fn collect(mut events: EventStream) -> Result<Vec<Event>, WeftError> {
    let mut collected = Vec::new();
    while let Some(event) = events.next().await {
        collected.push(event?);
    }
    Ok(collected)
}

/// Drain a stream, keeping the events yielded before an error.
pub async fn collect_until_error(mut events: EventStream) -> (Vec<Event>, Option<WeftError>) {
    let mut collected = Vec::new();
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => collected.push(event),
            Err(err) => return (collected, Some(err)),
        }
    }
    (collected, None)
}

pub fn add_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        "add",
        "Add two integers",
        ToolParameters::object()
            .integer("a", "Left operand", true)
            .integer("b", "Right operand", true)
            .build(),
        |args, _ctx| async move { Ok(json!(args.get_i64("a")? + args.get_i64("b")?)) },
    ))
}

pub fn authors(events: &[Event]) -> Vec<&str> {
    events.iter().map(|event| event.author.as_str()).collect()
}
