//! Per-turn execution context.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::agents::Agent;
use crate::artifacts::{ArtifactScope, ArtifactService};
use crate::config::RunConfig;
use crate::error::{Result, WeftError};
use crate::memory::MemoryService;
use crate::models::LlmRegistry;
use crate::sessions::{SessionService, SharedSession};
use crate::state::{merge_delta, StateScope};
use crate::types::{Content, StateMap};
use crate::util::lock;

/// Storage collaborators available to a turn.
#[derive(Clone)]
pub struct Services {
    pub session_service: Arc<dyn SessionService>,
    pub artifact_service: Option<Arc<dyn ArtifactService>>,
    pub memory_service: Option<Arc<dyn MemoryService>>,
}

impl Services {
    pub fn new(session_service: Arc<dyn SessionService>) -> Self {
        Self {
            session_service,
            artifact_service: None,
            memory_service: None,
        }
    }
}

/// Identity of the session a turn runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

/// Everything one agent needs while executing part of a turn.
///
/// Cloning is cheap. Clones share the session handle, the LLM call counter,
/// invocation-scoped `temp:` state and the end-invocation token.
#[derive(Clone)]
pub struct InvocationContext {
    invocation_id: String,
    branch: Option<String>,
    agent: Arc<Agent>,
    root_agent: Arc<Agent>,
    user_content: Option<Content>,
    session: SharedSession,
    session_key: Arc<SessionKey>,
    services: Services,
    llm_registry: Arc<LlmRegistry>,
    run_config: Arc<RunConfig>,
    llm_call_count: Arc<AtomicUsize>,
    temp_state: Arc<Mutex<StateMap>>,
    end_token: CancellationToken,
}

/// Fresh invocation id.
pub fn new_invocation_id() -> String {
    format!("e-{}", uuid::Uuid::new_v4())
}

impl InvocationContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: SharedSession,
        session_key: SessionKey,
        root_agent: Arc<Agent>,
        user_content: Option<Content>,
        services: Services,
        llm_registry: Arc<LlmRegistry>,
        run_config: Arc<RunConfig>,
    ) -> Self {
        Self {
            invocation_id: new_invocation_id(),
            branch: None,
            agent: Arc::clone(&root_agent),
            root_agent,
            user_content,
            session,
            session_key: Arc::new(session_key),
            services,
            llm_registry,
            run_config,
            llm_call_count: Arc::new(AtomicUsize::new(0)),
            temp_state: Arc::new(Mutex::new(StateMap::new())),
            end_token: CancellationToken::new(),
        }
    }

    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = invocation_id.into();
        self
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn root_agent(&self) -> &Arc<Agent> {
        &self.root_agent
    }

    pub fn user_content(&self) -> Option<&Content> {
        self.user_content.as_ref()
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn llm_registry(&self) -> &Arc<LlmRegistry> {
        &self.llm_registry
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    pub fn artifact_scope(&self) -> ArtifactScope {
        ArtifactScope::new(
            &self.session_key.app_name,
            &self.session_key.user_id,
            &self.session_key.session_id,
        )
    }

    /// Count one model call, failing once the configured ceiling is exceeded.
    pub fn increment_llm_call_count(&self) -> Result<()> {
        let count = self.llm_call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = self.run_config.max_llm_calls;
        if limit > 0 && count > limit {
            tracing::warn!(
                invocation_id = %self.invocation_id,
                limit,
                "LLM call ceiling exceeded"
            );
            return Err(WeftError::LlmCallLimitExceeded { limit });
        }
        Ok(())
    }

    pub fn llm_call_count(&self) -> usize {
        self.llm_call_count.load(Ordering::SeqCst)
    }

    /// Same invocation, executed by `agent`.
    pub fn for_agent(&self, agent: Arc<Agent>) -> Self {
        Self {
            agent,
            ..self.clone()
        }
    }

    /// Context for a concurrently running child: fresh invocation id and a
    /// branch extended with the child's name. Ending the child does not end
    /// the parent.
    pub fn create_child_context(&self, agent: Arc<Agent>) -> Self {
        let parent_branch = self.branch.as_deref().unwrap_or(self.agent.name());
        Self {
            invocation_id: new_invocation_id(),
            branch: Some(format!("{parent_branch}.{}", agent.name())),
            end_token: self.end_token.child_token(),
            agent,
            ..self.clone()
        }
    }

    /// Stop the turn at the next step boundary.
    pub fn end_invocation(&self) {
        self.end_token.cancel();
    }

    pub fn is_ended(&self) -> bool {
        self.end_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.end_token
    }

    /// `temp:` entries written so far in this turn.
    pub fn temp_state(&self) -> StateMap {
        lock(&self.temp_state).clone()
    }

    /// Keep the `temp:` part of an appended delta visible for the rest of the turn.
    pub fn absorb_temp_delta(&self, delta: &StateMap) {
        let temp: StateMap = delta
            .iter()
            .filter(|(key, _)| StateScope::of(key) == StateScope::Temp)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if !temp.is_empty() {
            merge_delta(&mut lock(&self.temp_state), &temp);
        }
    }

    /// Committed session state plus this turn's `temp:` entries.
    pub async fn state_snapshot(&self) -> StateMap {
        let mut state = self.session.read().await.state.clone();
        state.extend(self.temp_state());
        state
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.invocation_id)
            .field("branch", &self.branch)
            .field("agent", &self.agent.name())
            .field("session", &self.session_key)
            .field("llm_call_count", &self.llm_call_count())
            .field("ended", &self.is_ended())
            .finish()
    }
}
