//! Periodic history compaction.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use common::*;
use weft::agents::{Agent, LlmAgent};
use weft::config::{CompactionConfig, RunConfig};
use weft::error::{Result, WeftError};
use weft::events::Event;
use weft::models::{Llm, LlmRequest, LlmResponse, LlmResponseStream};
use weft::runner::{EventSummarizer, LlmEventSummarizer};
use weft::types::{Content, Role};
use weft::util::RetryPolicy;

/// Summarizer that records how many events it was asked to cover.
struct CountingSummarizer {
    windows: Mutex<Vec<usize>>,
}

#[async_trait]
impl EventSummarizer for CountingSummarizer {
    async fn summarize(&self, events: &[Event]) -> Result<Option<Content>> {
        self.windows.lock().unwrap().push(events.len());
        Ok(Some(Content::model(format!("summary of {} events", events.len()))))
    }
}

fn config(interval: usize) -> RunConfig {
    RunConfig::builder()
        .compaction(CompactionConfig {
            compaction_interval: interval,
            overlap_size: 0,
        })
        .build()
}

#[tokio::test]
async fn summary_replaces_compacted_turns_in_requests() {
    let llm = MockLlm::scripted(
        "mock",
        vec![
            Content::model("first answer"),
            Content::model("second answer"),
            Content::model("third answer"),
        ],
    );
    let summarizer = Arc::new(CountingSummarizer {
        windows: Mutex::new(Vec::new()),
    });
    let agent = Agent::llm("assistant", LlmAgent::builder().model(llm.clone()).build());
    let runner = runner_with_config(agent, config(2)).with_summarizer(summarizer.clone());

    collect(runner.run("u1", "s1", Content::user("first question"))).await.unwrap();
    assert!(summarizer.windows.lock().unwrap().is_empty());
    collect(runner.run("u1", "s1", Content::user("second question"))).await.unwrap();
    assert_eq!(*summarizer.windows.lock().unwrap(), vec![4]);

    let session = runner
        .services()
        .session_service
        .get_session("test_app", "u1", "s1", None)
        .await
        .unwrap()
        .unwrap();
    let compaction_event = session.events.last().unwrap();
    assert_eq!(compaction_event.author, "user");
    let compaction = compaction_event.actions.compaction.as_ref().unwrap();
    assert_eq!(compaction.start_timestamp, session.events[0].timestamp);
    assert_eq!(compaction.end_timestamp, session.events[3].timestamp);
    // Compaction appends; the original events are kept.
    assert_eq!(session.events.len(), 5);

    collect(runner.run("u1", "s1", Content::user("third question"))).await.unwrap();
    let texts = request_texts(llm.requests().last().unwrap());
    assert_eq!(texts, vec!["summary of 4 events", "third question"]);
}

#[tokio::test]
async fn compaction_without_a_summarizer_is_skipped() {
    let llm = MockLlm::new("mock");
    let agent = Agent::llm("assistant", LlmAgent::builder().model(llm).build());
    let runner = runner_with_config(agent, config(1));

    collect(runner.run("u1", "s1", Content::user("hello"))).await.unwrap();

    let session = runner
        .services()
        .session_service
        .get_session("test_app", "u1", "s1", None)
        .await
        .unwrap()
        .unwrap();
    assert!(session.events.iter().all(|e| e.actions.compaction.is_none()));
}

#[tokio::test]
async fn llm_summarizer_formats_history_for_the_model() {
    let model = MockLlm::scripted("summarizer", vec![Content::model("They discussed rust.")]);
    let summarizer = LlmEventSummarizer::new(model.clone());
    let events = vec![
        Event::new("e-1", "user").with_content(Content::user("Tell me about rust")),
        Event::new("e-1", "assistant").with_content(Content::model("Rust is a systems language")),
    ];

    let summary = summarizer.summarize(&events).await.unwrap().unwrap();
    assert_eq!(summary.role, Role::Model);
    assert_eq!(summary.text(), "They discussed rust.");

    let prompt = request_texts(&model.requests()[0]).join("\n");
    assert!(prompt.contains("user: Tell me about rust"));
    assert!(prompt.contains("assistant: Rust is a systems language"));
}

#[tokio::test]
async fn parallel_branches_count_as_a_single_turn() {
    let left = MockLlm::new("left");
    let right = MockLlm::new("right");
    let root = Agent::parallel(
        "fanout",
        vec![
            Agent::llm("left", LlmAgent::builder().model(left).build()),
            Agent::llm("right", LlmAgent::builder().model(right).build()),
        ],
    );
    let summarizer = Arc::new(CountingSummarizer {
        windows: Mutex::new(Vec::new()),
    });
    let runner = runner_with_config(root, config(2)).with_summarizer(summarizer.clone());

    let events = collect(runner.run("u1", "s1", Content::user("first"))).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(summarizer.windows.lock().unwrap().is_empty());

    collect(runner.run("u1", "s1", Content::user("second"))).await.unwrap();
    assert_eq!(*summarizer.windows.lock().unwrap(), vec![6]);
}

/// Model that is overloaded for its first `failures` calls.
struct OverloadedLlm {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Llm for OverloadedLlm {
    fn model_name(&self) -> &str {
        "overloaded"
    }

    async fn generate(&self, _request: LlmRequest, _stream: bool) -> Result<LlmResponseStream> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(WeftError::model("overloaded", "try again later"));
        }
        let reply = LlmResponse::from_content(Content::model("They said hello."));
        Ok(Box::pin(futures::stream::iter(vec![Ok(reply)])))
    }
}

#[tokio::test(start_paused = true)]
async fn llm_summarizer_retries_transient_model_errors() {
    let model = Arc::new(OverloadedLlm {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let summarizer = LlmEventSummarizer::new(model.clone()).with_retry(RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(10),
        multiplier: 1.0,
        jitter: false,
    });
    let events = vec![Event::new("e-1", "user").with_content(Content::user("hello"))];

    let summary = summarizer.summarize(&events).await.unwrap().unwrap();
    assert_eq!(summary.text(), "They said hello.");
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
}
