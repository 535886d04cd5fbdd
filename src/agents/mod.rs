//! Agents: a model-driven leaf and four composites.
//!
//! Every agent is an [`Agent`]; what it does is decided by its [`AgentKind`].
//! Children are moved into their parent, so an agent can only ever be
//! attached once. Parents are found by name from the root instead of being
//! stored as back-references.

pub mod callbacks;
pub mod graph;
pub mod llm;
mod loop_agent;
mod parallel;
mod sequential;

pub use callbacks::{
    AfterAgentCallback, AfterModelCallback, AfterToolCallback, BeforeAgentCallback,
    BeforeModelCallback, BeforeModelOutcome, BeforeToolCallback,
};
pub use graph::{EdgeGuard, GraphConfig, GraphEdge, GraphNode};
pub use llm::{IncludeContents, LlmAgent, ModelRef};

use std::collections::HashSet;
use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;

use crate::context::{CallbackContext, InvocationContext};
use crate::error::{Result, WeftError};
use crate::events::{Event, EventStream, USER_AUTHOR};
use crate::types::Content;

/// What an agent does when run.
pub enum AgentKind {
    /// Calls a model and tools in a step loop.
    Llm(Box<LlmAgent>),
    /// Runs children one after another.
    Sequential,
    /// Runs children concurrently on separate branches.
    Parallel,
    /// Repeats the children in order, up to `max_iterations` times.
    Loop { max_iterations: Option<usize> },
    /// Walks a directed graph of children.
    Graph(GraphConfig),
}

impl AgentKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Llm(_) => "llm",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Loop { .. } => "loop",
            Self::Graph(_) => "graph",
        }
    }
}

/// A named unit in the agent tree.
pub struct Agent {
    name: String,
    description: String,
    kind: AgentKind,
    sub_agents: Vec<Arc<Agent>>,
    before_agent_callbacks: Vec<BeforeAgentCallback>,
    after_agent_callbacks: Vec<AfterAgentCallback>,
}

impl Agent {
    pub fn new(name: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            sub_agents: Vec::new(),
            before_agent_callbacks: Vec::new(),
            after_agent_callbacks: Vec::new(),
        }
    }

    pub fn llm(name: impl Into<String>, agent: LlmAgent) -> Self {
        Self::new(name, AgentKind::Llm(Box::new(agent)))
    }

    pub fn sequential(name: impl Into<String>, sub_agents: Vec<Agent>) -> Self {
        Self::new(name, AgentKind::Sequential).with_sub_agents(sub_agents)
    }

    pub fn parallel(name: impl Into<String>, sub_agents: Vec<Agent>) -> Self {
        Self::new(name, AgentKind::Parallel).with_sub_agents(sub_agents)
    }

    pub fn loop_agent(
        name: impl Into<String>,
        sub_agents: Vec<Agent>,
        max_iterations: Option<usize>,
    ) -> Self {
        Self::new(name, AgentKind::Loop { max_iterations }).with_sub_agents(sub_agents)
    }

    pub fn graph(name: impl Into<String>, sub_agents: Vec<Agent>, config: GraphConfig) -> Self {
        Self::new(name, AgentKind::Graph(config)).with_sub_agents(sub_agents)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach children. They are moved in, so each can only have one parent.
    pub fn with_sub_agents(mut self, sub_agents: Vec<Agent>) -> Self {
        self.sub_agents.extend(sub_agents.into_iter().map(Arc::new));
        self
    }

    pub fn with_before_agent_callback(mut self, callback: BeforeAgentCallback) -> Self {
        self.before_agent_callbacks.push(callback);
        self
    }

    pub fn with_after_agent_callback(mut self, callback: AfterAgentCallback) -> Self {
        self.after_agent_callbacks.push(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> &AgentKind {
        &self.kind
    }

    pub fn as_llm(&self) -> Option<&LlmAgent> {
        match &self.kind {
            AgentKind::Llm(llm) => Some(llm),
            _ => None,
        }
    }

    pub fn sub_agents(&self) -> &[Arc<Agent>] {
        &self.sub_agents
    }

    /// Direct child named `name`.
    pub fn find_sub_agent(&self, name: &str) -> Option<&Arc<Agent>> {
        self.sub_agents.iter().find(|a| a.name == name)
    }

    /// Descendant (not self) named `name`, depth first.
    pub fn find_descendant(&self, name: &str) -> Option<&Arc<Agent>> {
        self.sub_agents.iter().find_map(|child| {
            if child.name == name {
                Some(child)
            } else {
                child.find_descendant(name)
            }
        })
    }

    /// Parent of the descendant named `name`, searching from `root`.
    pub fn find_parent(root: &Arc<Agent>, name: &str) -> Option<Arc<Agent>> {
        if root.sub_agents.iter().any(|child| child.name == name) {
            return Some(Arc::clone(root));
        }
        root.sub_agents
            .iter()
            .find_map(|child| Agent::find_parent(child, name))
    }

    /// `root` itself or its descendant named `name`.
    pub fn find_agent(root: &Arc<Agent>, name: &str) -> Option<Arc<Agent>> {
        if root.name == name {
            return Some(Arc::clone(root));
        }
        root.find_descendant(name).cloned()
    }

    /// Check names and graph wiring across the whole tree.
    pub fn validate_tree(&self) -> Result<()> {
        let mut seen = HashSet::new();
        self.validate_into(&mut seen)
    }

    fn validate_into<'a>(&'a self, seen: &mut HashSet<&'a str>) -> Result<()> {
        validate_name(&self.name)?;
        if !seen.insert(&self.name) {
            return Err(WeftError::InvalidAgentTree(format!(
                "agent name '{}' is used more than once",
                self.name
            )));
        }
        if let AgentKind::Graph(config) = &self.kind {
            config.validate(self)?;
        }
        for child in &self.sub_agents {
            child.validate_into(seen)?;
        }
        Ok(())
    }

    /// Run this agent as part of the turn described by `parent`.
    pub fn run(self: &Arc<Self>, parent: &InvocationContext) -> EventStream {
        let agent = Arc::clone(self);
        let ctx = parent.for_agent(Arc::clone(self));
        Box::pin(try_stream! {
            tracing::debug!(
                agent = %agent.name,
                kind = agent.kind.label(),
                invocation_id = %ctx.invocation_id(),
                branch = ?ctx.branch(),
                "Agent started"
            );

            let (before, skip_body) = agent.handle_before_agent(&ctx).await?;
            if let Some(event) = before {
                yield event;
            }
            if skip_body || ctx.is_ended() {
                return;
            }

            let mut body = agent.run_body(&ctx);
            while let Some(event) = body.next().await {
                yield event?;
            }
            if ctx.is_ended() {
                return;
            }

            if let Some(event) = agent.handle_after_agent(&ctx).await? {
                yield event;
            }
        })
    }

    fn run_body(self: &Arc<Self>, ctx: &InvocationContext) -> EventStream {
        let agent = Arc::clone(self);
        let ctx = ctx.clone();
        match &self.kind {
            AgentKind::Llm(_) => llm::run(agent, ctx),
            AgentKind::Sequential => sequential::run(agent, ctx),
            AgentKind::Parallel => parallel::run(agent, ctx),
            AgentKind::Loop { max_iterations } => loop_agent::run(agent, ctx, *max_iterations),
            AgentKind::Graph(_) => graph::run(agent, ctx),
        }
    }

    /// Event from the before-agent hooks, and whether the body is skipped.
    async fn handle_before_agent(&self, ctx: &InvocationContext) -> Result<(Option<Event>, bool)> {
        if self.before_agent_callbacks.is_empty() {
            return Ok((None, false));
        }
        let callback_ctx = CallbackContext::new(ctx).await;
        let mut reply = None;
        for callback in &self.before_agent_callbacks {
            if let Some(content) = callback(callback_ctx.clone()).await? {
                reply = Some(content);
                break;
            }
        }
        let skip = reply.is_some();
        Ok((self.callback_event(ctx, &callback_ctx, reply), skip))
    }

    async fn handle_after_agent(&self, ctx: &InvocationContext) -> Result<Option<Event>> {
        if self.after_agent_callbacks.is_empty() {
            return Ok(None);
        }
        let callback_ctx = CallbackContext::new(ctx).await;
        let mut reply = None;
        for callback in &self.after_agent_callbacks {
            if let Some(content) = callback(callback_ctx.clone()).await? {
                reply = Some(content);
                break;
            }
        }
        Ok(self.callback_event(ctx, &callback_ctx, reply))
    }

    fn callback_event(
        &self,
        ctx: &InvocationContext,
        callback_ctx: &CallbackContext,
        reply: Option<Content>,
    ) -> Option<Event> {
        if reply.is_none() && !callback_ctx.has_changes() {
            return None;
        }
        let mut event = Event::new(ctx.invocation_id(), &self.name)
            .with_branch(ctx.branch().map(str::to_string))
            .with_actions(callback_ctx.actions());
        event.content = reply;
        Some(event)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name == USER_AUTHOR {
        return Err(WeftError::InvalidAgentTree(
            "'user' is reserved for end-user events".into(),
        ));
    }
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(WeftError::InvalidAgentTree(format!(
            "agent name '{name}' must be an identifier"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field(
                "sub_agents",
                &self.sub_agents.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Arc<Agent> {
        Arc::new(Agent::sequential(
            "root",
            vec![
                Agent::parallel(
                    "fanout",
                    vec![Agent::sequential("left", vec![]), Agent::sequential("right", vec![])],
                ),
                Agent::sequential("tail", vec![]),
            ],
        ))
    }

    #[test]
    fn lookups_walk_the_tree() {
        let root = tree();
        assert_eq!(Agent::find_agent(&root, "right").map(|a| a.name().to_string()), Some("right".into()));
        assert_eq!(
            Agent::find_parent(&root, "right").map(|a| a.name().to_string()),
            Some("fanout".into())
        );
        assert_eq!(
            Agent::find_parent(&root, "fanout").map(|a| a.name().to_string()),
            Some("root".into())
        );
        assert!(Agent::find_parent(&root, "root").is_none());
        assert!(root.find_sub_agent("left").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let agent = Agent::sequential(
            "root",
            vec![Agent::sequential("a", vec![]), Agent::sequential("a", vec![])],
        );
        assert!(matches!(agent.validate_tree(), Err(WeftError::InvalidAgentTree(_))));
    }

    #[test]
    fn reserved_and_non_identifier_names_are_rejected() {
        assert!(Agent::sequential("user", vec![]).validate_tree().is_err());
        assert!(Agent::sequential("my agent", vec![]).validate_tree().is_err());
        assert!(Agent::sequential("9lives", vec![]).validate_tree().is_err());
        assert!(tree().validate_tree().is_ok());
    }
}
