//! The model-driven leaf agent.

use std::sync::Arc;

use async_stream::try_stream;
use bon::Builder;
use futures::StreamExt;
use serde_json::Value;

use super::callbacks::{AfterModelCallback, AfterToolCallback, BeforeModelCallback, BeforeToolCallback};
use super::{Agent, AgentKind};
use crate::context::InvocationContext;
use crate::error::{Result, WeftError};
use crate::events::{Event, EventStream};
use crate::flows::{LlmFlow, TransferPolicy};
use crate::models::Llm;
use crate::tools::{Tool, Toolset};
use crate::types::GenerateContentConfig;

/// Which model an agent calls.
#[derive(Clone)]
pub enum ModelRef {
    /// Resolved through the run's model registry.
    Name(String),
    Instance(Arc<dyn Llm>),
}

impl From<&str> for ModelRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl<T: Llm + 'static> From<Arc<T>> for ModelRef {
    fn from(llm: Arc<T>) -> Self {
        Self::Instance(llm)
    }
}

impl std::fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Self::Instance(llm) => f.debug_tuple("Instance").field(&llm.model_name()).finish(),
        }
    }
}

/// How much session history the model sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IncludeContents {
    /// The branch-filtered conversation history.
    #[default]
    Default,
    /// Only the current turn.
    None,
}

/// Configuration of a model-driven agent.
#[derive(Builder)]
pub struct LlmAgent {
    /// Inherited from the nearest ancestor when unset.
    #[builder(into)]
    pub model: Option<ModelRef>,
    /// Agent instruction; `{key}` and `{key?}` are replaced from state.
    #[builder(into)]
    pub instruction: Option<String>,
    /// Instruction applied by the root agent to the whole tree.
    #[builder(into)]
    pub global_instruction: Option<String>,
    #[builder(default)]
    pub tools: Vec<Arc<dyn Tool>>,
    #[builder(default)]
    pub toolsets: Vec<Arc<dyn Toolset>>,
    pub generate_content_config: Option<GenerateContentConfig>,
    #[builder(default)]
    pub disallow_transfer_to_parent: bool,
    #[builder(default)]
    pub disallow_transfer_to_peers: bool,
    #[builder(default)]
    pub include_contents: IncludeContents,
    /// State key the final text reply is saved under.
    #[builder(into)]
    pub output_key: Option<String>,
    /// JSON Schema the reply must follow.
    pub output_schema: Option<Value>,
    #[builder(default)]
    pub before_model_callbacks: Vec<BeforeModelCallback>,
    #[builder(default)]
    pub after_model_callbacks: Vec<AfterModelCallback>,
    #[builder(default)]
    pub before_tool_callbacks: Vec<BeforeToolCallback>,
    #[builder(default)]
    pub after_tool_callbacks: Vec<AfterToolCallback>,
}

impl LlmAgent {
    /// Transfer policy: isolated unless the agent can reach another agent.
    pub fn transfer_policy(&self, agent: &Agent) -> TransferPolicy {
        if self.disallow_transfer_to_parent
            && self.disallow_transfer_to_peers
            && agent.sub_agents().is_empty()
        {
            TransferPolicy::Isolated
        } else {
            TransferPolicy::TreeTransferable
        }
    }
}

impl std::fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgent")
            .field("model", &self.model)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("output_key", &self.output_key)
            .field("include_contents", &self.include_contents)
            .finish()
    }
}

/// Model for `agent`, falling back to the nearest ancestor that names one.
pub fn resolve_model(agent: &Arc<Agent>, ctx: &InvocationContext) -> Result<Arc<dyn Llm>> {
    let mut current = Arc::clone(agent);
    loop {
        if let Some(model) = current.as_llm().and_then(|llm| llm.model.as_ref()) {
            return match model {
                ModelRef::Instance(llm) => Ok(Arc::clone(llm)),
                ModelRef::Name(name) => ctx.llm_registry().resolve(name),
            };
        }
        match Agent::find_parent(ctx.root_agent(), current.name()) {
            Some(parent) => current = parent,
            None => {
                return Err(WeftError::Configuration(format!(
                    "no model configured for agent '{}' or its ancestors",
                    agent.name()
                )))
            }
        }
    }
}

/// Whether `agent` and every ancestor let a conversation move across the tree.
pub fn is_transferable_across_tree(root: &Arc<Agent>, agent: &Arc<Agent>) -> bool {
    let mut current = Arc::clone(agent);
    loop {
        let Some(llm) = current.as_llm() else {
            return false;
        };
        if llm.disallow_transfer_to_parent {
            return false;
        }
        match Agent::find_parent(root, current.name()) {
            Some(parent) => current = parent,
            None => return true,
        }
    }
}

pub(super) fn run(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    Box::pin(try_stream! {
        let AgentKind::Llm(llm) = agent.kind() else {
            Err::<(), _>(WeftError::InvalidState(format!("{} is not an LLM agent", agent.name())))?;
            return;
        };
        let flow = LlmFlow::new(llm.transfer_policy(&agent));
        let mut events = flow.run(ctx.clone());
        while let Some(event) = events.next().await {
            let mut event = event?;
            save_output_to_state(&agent, llm, &mut event);
            yield event;
        }
    })
}

fn save_output_to_state(agent: &Agent, llm: &LlmAgent, event: &mut Event) {
    let Some(key) = &llm.output_key else {
        return;
    };
    if event.author != agent.name() || !event.is_final_response() {
        return;
    }
    let Some(content) = &event.content else {
        return;
    };
    let text = content.text();
    if text.is_empty() {
        return;
    }
    let value = match &llm.output_schema {
        Some(_) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        None => Value::String(text),
    };
    event.actions.state_delta.insert(key.clone(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Content;

    fn leaf(name: &str, disallow_parent: bool) -> Agent {
        Agent::llm(
            name,
            LlmAgent::builder()
                .disallow_transfer_to_parent(disallow_parent)
                .build(),
        )
    }

    #[test]
    fn policy_is_isolated_only_when_nothing_is_reachable() {
        let isolated = LlmAgent::builder()
            .disallow_transfer_to_parent(true)
            .disallow_transfer_to_peers(true)
            .build();
        let agent = Agent::llm("solo", LlmAgent::builder().build());
        assert_eq!(isolated.transfer_policy(&agent), TransferPolicy::Isolated);
        assert_eq!(
            agent.as_llm().unwrap().transfer_policy(&agent),
            TransferPolicy::TreeTransferable
        );
    }

    #[test]
    fn transferability_requires_every_ancestor_to_allow_it() {
        let root = Arc::new(
            Agent::llm("root", LlmAgent::builder().build()).with_sub_agents(vec![
                leaf("open", false),
                leaf("closed", true),
                Agent::sequential("pipeline", vec![leaf("inner", false)]),
            ]),
        );
        let find = |name: &str| Agent::find_agent(&root, name).unwrap();
        assert!(is_transferable_across_tree(&root, &find("open")));
        assert!(!is_transferable_across_tree(&root, &find("closed")));
        assert!(!is_transferable_across_tree(&root, &find("inner")));
    }

    #[test]
    fn output_key_saves_final_text() {
        let agent = Agent::llm("writer", LlmAgent::builder().output_key("draft").build());
        let llm = agent.as_llm().unwrap();

        let mut event = Event::new("inv", "writer").with_content(Content::model("hello"));
        save_output_to_state(&agent, llm, &mut event);
        assert_eq!(event.actions.state_delta.get("draft"), Some(&Value::from("hello")));

        let mut partial = Event::new("inv", "writer")
            .with_content(Content::model("hel"))
            .with_partial(true);
        save_output_to_state(&agent, llm, &mut partial);
        assert!(partial.actions.state_delta.is_empty());
    }
}
