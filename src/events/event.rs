//! The immutable history record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthConfig;
use crate::types::{Content, FunctionCall, FunctionResponse, StateMap, Usage};

/// Author name reserved for end-user events.
pub const USER_AUTHOR: &str = "user";

/// One entry in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    /// `"user"` or the name of the agent that produced the event.
    pub author: String,
    /// Dot-separated ancestor chain, e.g. `root.research.search`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Streaming fragment; never persisted.
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Ids of function calls in this event whose tools are long-running.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub long_running_tool_ids: BTreeSet<String>,
    #[serde(default)]
    pub actions: EventActions,
}

impl Event {
    /// New empty event with a generated id and the current timestamp.
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: Self::new_id(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            branch: None,
            timestamp: Utc::now(),
            content: None,
            partial: false,
            turn_complete: false,
            error_code: None,
            error_message: None,
            usage: None,
            long_running_tool_ids: BTreeSet::new(),
            actions: EventActions::default(),
        }
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_actions(mut self, actions: EventActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn is_user(&self) -> bool {
        self.author == USER_AUTHOR
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.content
            .as_ref()
            .map(Content::function_calls)
            .unwrap_or_default()
    }

    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.content
            .as_ref()
            .map(Content::function_responses)
            .unwrap_or_default()
    }

    /// Concatenated text of the content, empty if there is none.
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }

    /// Whether this event ends the agent's turn from the caller's point of view.
    pub fn is_final_response(&self) -> bool {
        if self.actions.skip_summarization || !self.long_running_tool_ids.is_empty() {
            return true;
        }
        !self.partial && self.function_calls().is_empty() && self.function_responses().is_empty()
    }

    /// Function calls in this event that have not been marked long-running.
    pub fn blocking_function_calls(&self) -> Vec<&FunctionCall> {
        self.function_calls()
            .into_iter()
            .filter(|call| !self.long_running_tool_ids.contains(&call.id))
            .collect()
    }
}

/// Summary replacing a contiguous run of earlier events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventCompaction {
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    pub compacted_content: Content,
}

impl EventCompaction {
    pub fn covers(&self, timestamp: DateTime<Utc>) -> bool {
        self.start_timestamp <= timestamp && timestamp <= self.end_timestamp
    }

    pub fn contains(&self, other: &EventCompaction) -> bool {
        self.start_timestamp <= other.start_timestamp && other.end_timestamp <= self.end_timestamp
    }
}

/// Side effects carried by an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventActions {
    /// Merged into session state on append; `null` removes a key.
    #[serde(default, skip_serializing_if = "StateMap::is_empty")]
    pub state_delta: StateMap,
    /// Artifact filename → version saved during this event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifact_delta: BTreeMap<String, u32>,
    /// Ask the enclosing composite agent to stop.
    #[serde(default)]
    pub escalate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,
    /// Do not feed this function response back to the model.
    #[serde(default)]
    pub skip_summarization: bool,
    /// Function call id → credential the call is waiting on.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requested_auth_configs: BTreeMap<String, AuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<EventCompaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewind_before_invocation_id: Option<String>,
}

impl EventActions {
    /// Fold `other` into `self`; later values win, flags are OR-ed.
    pub fn merge(&mut self, other: EventActions) {
        for (key, value) in other.state_delta {
            self.state_delta.insert(key, value);
        }
        self.artifact_delta.extend(other.artifact_delta);
        self.escalate |= other.escalate;
        self.skip_summarization |= other.skip_summarization;
        if other.transfer_to_agent.is_some() {
            self.transfer_to_agent = other.transfer_to_agent;
        }
        self.requested_auth_configs
            .extend(other.requested_auth_configs);
        if other.compaction.is_some() {
            self.compaction = other.compaction;
        }
        if other.rewind_before_invocation_id.is_some() {
            self.rewind_before_invocation_id = other.rewind_before_invocation_id;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
