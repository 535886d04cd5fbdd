//! Directed-graph composite.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;

use super::{Agent, AgentKind};
use crate::context::InvocationContext;
use crate::error::{Result, WeftError};
use crate::events::{Event, EventStream};

/// Predicate over the last event a node produced.
pub type EdgeGuard = Arc<dyn Fn(Option<&Event>) -> bool + Send + Sync>;

/// Successor link; unguarded edges are always taken.
#[derive(Clone)]
pub struct GraphEdge {
    pub target: String,
    pub guard: Option<EdgeGuard>,
}

/// A node running one child agent.
#[derive(Clone)]
pub struct GraphNode {
    pub name: String,
    /// Name of the child agent this node runs.
    pub agent: String,
    pub edges: Vec<GraphEdge>,
}

impl GraphNode {
    pub fn new(name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            edges: Vec::new(),
        }
    }

    pub fn edge(mut self, target: impl Into<String>) -> Self {
        self.edges.push(GraphEdge {
            target: target.into(),
            guard: None,
        });
        self
    }

    pub fn edge_if<F>(mut self, target: impl Into<String>, guard: F) -> Self
    where
        F: Fn(Option<&Event>) -> bool + Send + Sync + 'static,
    {
        self.edges.push(GraphEdge {
            target: target.into(),
            guard: Some(Arc::new(guard)),
        });
        self
    }

    fn successors<'a>(&'a self, last: Option<&'a Event>) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |edge| edge.guard.as_ref().map_or(true, |guard| guard(last)))
            .map(|edge| edge.target.as_str())
    }
}

/// Nodes, entry point and traversal ceiling of a graph agent.
#[derive(Clone)]
pub struct GraphConfig {
    pub nodes: Vec<GraphNode>,
    pub root: String,
    /// Node runs allowed before the traversal halts.
    pub max_steps: usize,
}

impl GraphConfig {
    pub fn new(root: impl Into<String>, max_steps: usize) -> Self {
        Self {
            nodes: Vec::new(),
            root: root.into(),
            max_steps,
        }
    }

    pub fn node(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    fn find(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub(super) fn validate(&self, owner: &Agent) -> Result<()> {
        let invalid = |msg: String| Err(WeftError::InvalidAgentTree(format!("graph '{}': {msg}", owner.name())));
        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return invalid(format!("duplicate node '{}'", node.name));
            }
            if owner.find_sub_agent(&node.agent).is_none() {
                return invalid(format!("node '{}' runs unknown agent '{}'", node.name, node.agent));
            }
        }
        if !names.contains(self.root.as_str()) {
            return invalid(format!("root node '{}' does not exist", self.root));
        }
        for node in &self.nodes {
            if let Some(edge) = node.edges.iter().find(|e| !names.contains(e.target.as_str())) {
                return invalid(format!("edge {} -> {} has no target", node.name, edge.target));
            }
        }
        Ok(())
    }
}

pub(super) fn run(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    Box::pin(try_stream! {
        let AgentKind::Graph(config) = agent.kind() else {
            Err::<(), _>(WeftError::InvalidState(format!("{} is not a graph agent", agent.name())))?;
            return;
        };

        let mut frontier = VecDeque::from([config.root.clone()]);
        let mut steps = 0usize;

        while let Some(node_name) = frontier.pop_front() {
            if steps >= config.max_steps {
                tracing::warn!(
                    agent = %agent.name(),
                    max_steps = config.max_steps,
                    pending = frontier.len() + 1,
                    "Graph halted at step ceiling"
                );
                return;
            }
            steps += 1;

            let node = config
                .find(&node_name)
                .ok_or_else(|| WeftError::InvalidAgentTree(format!("unknown graph node '{node_name}'")))?;
            let child = agent
                .find_sub_agent(&node.agent)
                .ok_or_else(|| WeftError::AgentNotFound(node.agent.clone()))?;
            tracing::debug!(agent = %agent.name(), node = %node.name, step = steps, "Graph node");

            let mut last: Option<Event> = None;
            let mut events = child.run(&ctx);
            while let Some(event) = events.next().await {
                let event = event?;
                let escalate = event.actions.escalate;
                last = Some(event.clone());
                yield event;
                if escalate {
                    return;
                }
            }
            if ctx.is_ended() {
                return;
            }

            let next: Vec<String> = node.successors(last.as_ref()).map(str::to_string).collect();
            if next.is_empty() {
                tracing::debug!(
                    agent = %agent.name(),
                    node = %node.name,
                    skipped = frontier.len(),
                    "Graph ended: no successor selected"
                );
                return;
            }
            frontier.extend(next);
        }
    })
}
