use std::sync::{Arc, Mutex};

use super::InvocationContext;
use crate::error::{Result, WeftError};
use crate::events::EventActions;
use crate::memory::SearchMemoryResponse;
use crate::state::State;
use crate::types::{Content, Part};
use crate::util::lock;

/// Context handed to agent and model callbacks.
///
/// State writes and artifact saves are recorded as pending actions; they
/// reach the session only through the event that carries them.
#[derive(Clone)]
pub struct CallbackContext {
    invocation: InvocationContext,
    state: State,
    actions: Arc<Mutex<EventActions>>,
}

impl CallbackContext {
    /// Snapshot the session state as the base of a fresh delta.
    pub async fn new(invocation: &InvocationContext) -> Self {
        let base = invocation.state_snapshot().await;
        Self {
            invocation: invocation.clone(),
            state: State::new(base),
            actions: Arc::new(Mutex::new(EventActions::default())),
        }
    }

    /// A sibling context sharing the same state base but with empty pending writes.
    pub(crate) fn fork(&self) -> Self {
        Self {
            invocation: self.invocation.clone(),
            state: self.state.fork(),
            actions: Arc::new(Mutex::new(EventActions::default())),
        }
    }

    pub fn invocation(&self) -> &InvocationContext {
        &self.invocation
    }

    pub fn invocation_id(&self) -> &str {
        self.invocation.invocation_id()
    }

    pub fn agent_name(&self) -> &str {
        self.invocation.agent().name()
    }

    pub fn user_content(&self) -> Option<&Content> {
        self.invocation.user_content()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub(crate) fn update_actions(&self, f: impl FnOnce(&mut EventActions)) {
        f(&mut lock(&self.actions));
    }

    /// Pending actions, with the state delta folded in.
    pub fn actions(&self) -> EventActions {
        let mut actions = lock(&self.actions).clone();
        for (key, value) in self.state.delta() {
            actions.state_delta.insert(key, value);
        }
        actions
    }

    pub fn has_changes(&self) -> bool {
        !self.actions().is_empty()
    }

    /// Store a new artifact version and record it in the artifact delta.
    pub async fn save_artifact(&self, filename: &str, artifact: Part) -> Result<u32> {
        let service = self.artifact_service()?;
        let version = service
            .save_artifact(&self.invocation.artifact_scope(), filename, artifact)
            .await?;
        lock(&self.actions)
            .artifact_delta
            .insert(filename.to_string(), version);
        Ok(version)
    }

    pub async fn load_artifact(&self, filename: &str, version: Option<u32>) -> Result<Option<Part>> {
        self.artifact_service()?
            .load_artifact(&self.invocation.artifact_scope(), filename, version)
            .await
    }

    pub async fn list_artifacts(&self) -> Result<Vec<String>> {
        self.artifact_service()?
            .list_artifact_keys(&self.invocation.artifact_scope())
            .await
    }

    pub async fn search_memory(&self, query: &str) -> Result<SearchMemoryResponse> {
        let service = self
            .invocation
            .services()
            .memory_service
            .as_ref()
            .ok_or_else(|| WeftError::Configuration("memory service is not configured".into()))?;
        let key = self.invocation.session_key();
        service.search_memory(&key.app_name, &key.user_id, query).await
    }

    fn artifact_service(&self) -> Result<&Arc<dyn crate::artifacts::ArtifactService>> {
        self.invocation
            .services()
            .artifact_service
            .as_ref()
            .ok_or_else(|| WeftError::Artifact("artifact service is not configured".into()))
    }
}

impl std::fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackContext")
            .field("invocation", &self.invocation)
            .field("state", &self.state)
            .finish()
    }
}
