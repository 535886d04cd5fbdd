//! Sliding-window summarization of session history.
//!
//! Compaction never edits existing events. It appends one event whose
//! [`EventCompaction`] covers a time range; when building model requests,
//! covered events are replaced by the summary.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::config::CompactionConfig;
use crate::context::new_invocation_id;
use crate::error::{Result, WeftError};
use crate::events::{Event, EventActions, EventCompaction, USER_AUTHOR};
use crate::models::{Llm, LlmRequest};
use crate::sessions::Session;
use crate::types::{Content, Part, Role};
use crate::util::RetryPolicy;

/// Produces a summary of a run of events.
#[async_trait]
pub trait EventSummarizer: Send + Sync {
    /// Summary content, or `None` to skip this compaction.
    async fn summarize(&self, events: &[Event]) -> Result<Option<Content>>;
}

const DEFAULT_PROMPT: &str = "The following is a conversation history between a user and an AI \
agent. Summarize the conversation concisely, keeping key facts, decisions, tool results and \
anything the agent will need to continue. Write the summary in the third person.\n\n\
{conversation_history}";

/// Summarizes with a model call. Transient model failures are retried.
pub struct LlmEventSummarizer {
    llm: Arc<dyn Llm>,
    prompt_template: String,
    retry: RetryPolicy,
}

impl LlmEventSummarizer {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            llm,
            prompt_template: DEFAULT_PROMPT.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the prompt. `{conversation_history}` marks where the history goes.
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    fn format_history(events: &[Event]) -> String {
        events
            .iter()
            .filter_map(|event| {
                let content = event.content.as_ref()?;
                let lines: Vec<String> = content
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        Part::Text { text } if !text.is_empty() => Some(text.clone()),
                        Part::FunctionCall(call) => {
                            Some(format!("called {} with {}", call.name, call.args))
                        }
                        Part::FunctionResponse(response) => {
                            Some(format!("{} returned {}", response.name, response.response))
                        }
                        _ => None,
                    })
                    .collect();
                (!lines.is_empty()).then(|| format!("{}: {}", event.author, lines.join("\n")))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl EventSummarizer for LlmEventSummarizer {
    async fn summarize(&self, events: &[Event]) -> Result<Option<Content>> {
        let history = Self::format_history(events);
        if history.is_empty() {
            return Ok(None);
        }
        let prompt = self
            .prompt_template
            .replace("{conversation_history}", &history);
        let request = LlmRequest {
            model: self.llm.model_name().to_string(),
            contents: vec![Content::user(prompt)],
            ..Default::default()
        };

        self.retry
            .execute(|| self.generate_summary(request.clone()))
            .await
    }
}

impl LlmEventSummarizer {
    async fn generate_summary(&self, request: LlmRequest) -> Result<Option<Content>> {
        let mut responses = self.llm.generate(request, false).await?;
        while let Some(response) = responses.next().await {
            let response = response?;
            if response.partial {
                continue;
            }
            if let Some(message) = response.error_message {
                return Err(WeftError::model(self.llm.model_name(), message));
            }
            if let Some(content) = response.content.filter(|c| !c.is_empty()) {
                return Ok(Some(Content::new(Role::Model, content.parts)));
            }
        }
        Ok(None)
    }
}

/// Visible, non-compaction events grouped into turns. A turn opens with the
/// user event the runner appends; events of parallel branches carry their
/// own invocation ids but stay in the turn that started them.
fn turns(session: &Session) -> Vec<Vec<&Event>> {
    let mut turns: Vec<Vec<&Event>> = Vec::new();
    for event in session.visible_events() {
        if event.actions.compaction.is_some() {
            continue;
        }
        match turns.last_mut() {
            Some(turn) if !event.is_user() => turn.push(event),
            _ => turns.push(vec![event]),
        }
    }
    turns
}

/// Events to compact, once enough turns finished since the last compaction.
///
/// The window holds every turn after the last compaction plus
/// `overlap_size` turns before it.
pub(super) fn select_window(session: &Session, config: &CompactionConfig) -> Option<Vec<Event>> {
    if config.compaction_interval == 0 {
        return None;
    }
    let last_end = session
        .visible_events()
        .iter()
        .filter_map(|event| event.actions.compaction.as_ref())
        .map(|compaction| compaction.end_timestamp)
        .max();

    let turns = turns(session);
    let first_new = turns.iter().position(|turn| {
        turn.iter()
            .any(|event| last_end.map_or(true, |end| event.timestamp > end))
    })?;
    if turns.len() - first_new < config.compaction_interval {
        return None;
    }

    let window: Vec<Event> = turns[first_new.saturating_sub(config.overlap_size)..]
        .iter()
        .flatten()
        .map(|event| (*event).clone())
        .collect();
    (!window.is_empty()).then_some(window)
}

/// Compaction event for `window`, if the summarizer produced a summary.
pub(super) async fn summarize(
    summarizer: &dyn EventSummarizer,
    window: &[Event],
) -> Result<Option<Event>> {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return Ok(None);
    };
    let Some(summary) = summarizer.summarize(window).await? else {
        return Ok(None);
    };
    let compaction = EventCompaction {
        start_timestamp: first.timestamp,
        end_timestamp: last.timestamp,
        compacted_content: summary,
    };
    Ok(Some(
        Event::new(new_invocation_id(), USER_AUTHOR).with_actions(EventActions {
            compaction: Some(compaction),
            ..Default::default()
        }),
    ))
}
