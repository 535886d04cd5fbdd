//! Process-local session storage.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{apply_event, persistent_delta, GetSessionConfig, Session, SessionService, SessionSummary};
use crate::error::{Result, WeftError};
use crate::events::Event;
use crate::state::{merge_delta, StateScope};
use crate::types::StateMap;
use crate::util::lock;

#[derive(Debug, Default)]
struct Store {
    /// app → user → session id → session (session-scoped state only).
    sessions: HashMap<String, HashMap<String, HashMap<String, Session>>>,
    app_state: HashMap<String, StateMap>,
    /// app → user → state.
    user_state: HashMap<String, HashMap<String, StateMap>>,
}

impl Store {
    fn session_mut(&mut self, app_name: &str, user_id: &str, session_id: &str) -> Option<&mut Session> {
        self.sessions
            .get_mut(app_name)?
            .get_mut(user_id)?
            .get_mut(session_id)
    }

    /// Split a delta into app, user and session scoped parts and store the first two.
    fn absorb_shared(&mut self, app_name: &str, user_id: &str, delta: &StateMap) -> StateMap {
        let mut session_part = StateMap::new();
        let mut app_part = StateMap::new();
        let mut user_part = StateMap::new();
        for (key, value) in persistent_delta(delta) {
            match StateScope::of(&key) {
                StateScope::App => app_part.insert(key, value),
                StateScope::User => user_part.insert(key, value),
                _ => session_part.insert(key, value),
            };
        }
        if !app_part.is_empty() {
            merge_delta(self.app_state.entry(app_name.to_string()).or_default(), &app_part);
        }
        if !user_part.is_empty() {
            let users = self.user_state.entry(app_name.to_string()).or_default();
            merge_delta(users.entry(user_id.to_string()).or_default(), &user_part);
        }
        session_part
    }

    /// Copy of a stored session with app and user state merged in.
    fn hydrate(&self, stored: &Session) -> Session {
        let mut session = stored.clone();
        if let Some(app) = self.app_state.get(&stored.app_name) {
            session.state.extend(app.clone());
        }
        if let Some(user) = self
            .user_state
            .get(&stored.app_name)
            .and_then(|users| users.get(&stored.user_id))
        {
            session.state.extend(user.clone());
        }
        session
    }
}

/// Session service backed by in-process maps. Not durable.
#[derive(Debug, Default)]
pub struct InMemorySessionService {
    store: Mutex<Store>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        state: Option<StateMap>,
        session_id: Option<String>,
    ) -> Result<Session> {
        let session_id = session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut store = lock(&self.store);
        if store.session_mut(app_name, user_id, &session_id).is_some() {
            return Err(WeftError::InvalidArgument(format!(
                "session {session_id} already exists"
            )));
        }

        let mut session = Session::new(app_name, user_id, session_id.clone());
        if let Some(initial) = state {
            session.initial_state = persistent_delta(&initial);
            session.state = store.absorb_shared(app_name, user_id, &initial);
        }

        tracing::debug!(app = app_name, user = user_id, session = %session_id, "Created session");
        let hydrated = store.hydrate(&session);
        store
            .sessions
            .entry(app_name.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id, session);
        Ok(hydrated)
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        config: Option<GetSessionConfig>,
    ) -> Result<Option<Session>> {
        let mut store = lock(&self.store);
        let Some(stored) = store.session_mut(app_name, user_id, session_id) else {
            return Ok(None);
        };
        let stored = stored.clone();
        let mut session = store.hydrate(&stored);
        if let Some(config) = config {
            config.apply(&mut session);
        }
        Ok(Some(session))
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionSummary>> {
        let store = lock(&self.store);
        let mut summaries: Vec<SessionSummary> = store
            .sessions
            .get(app_name)
            .and_then(|users| users.get(user_id))
            .map(|sessions| sessions.values().map(Session::summary).collect())
            .unwrap_or_default();
        summaries.sort_by(|a, b| a.last_update_time.cmp(&b.last_update_time));
        Ok(summaries)
    }

    async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<()> {
        let mut store = lock(&self.store);
        if let Some(sessions) = store
            .sessions
            .get_mut(app_name)
            .and_then(|users| users.get_mut(user_id))
        {
            sessions.remove(session_id);
        }
        Ok(())
    }

    async fn append_event(&self, session: &mut Session, event: Event) -> Result<Event> {
        if event.partial {
            return Ok(event);
        }

        let mut store = lock(&self.store);
        let (app_name, user_id) = (session.app_name.clone(), session.user_id.clone());
        let stored = store
            .session_mut(&app_name, &user_id, &session.id)
            .ok_or_else(|| WeftError::SessionNotFound {
                app_name: app_name.clone(),
                user_id: user_id.clone(),
                session_id: session.id.clone(),
            })?;
        if stored.last_update_time > session.last_update_time {
            return Err(WeftError::StaleSession {
                session_id: session.id.clone(),
            });
        }

        apply_event(session, &event);

        let session_part = store.absorb_shared(&app_name, &user_id, &event.actions.state_delta);
        if let Some(stored) = store.session_mut(&app_name, &user_id, &session.id) {
            merge_delta(&mut stored.state, &session_part);
            stored.events.push(event.clone());
            stored.last_update_time = session.last_update_time;
        }

        tracing::debug!(
            session = %session.id,
            event_id = %event.id,
            author = %event.author,
            "Appended event"
        );
        Ok(event)
    }
}
