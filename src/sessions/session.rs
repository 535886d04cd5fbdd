//! Session record and the default append semantics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::events::{apply_rewinds, Event};
use crate::state::{StateScope, TEMP_PREFIX};
use crate::types::StateMap;

/// Ordered event log plus merged state for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    #[serde(default)]
    pub state: StateMap,
    /// Persistent state the session was created with, before any event.
    #[serde(default)]
    pub initial_state: StateMap,
    #[serde(default)]
    pub events: Vec<Event>,
    pub last_update_time: DateTime<Utc>,
}

/// Session handle shared by every agent of one turn.
pub type SharedSession = Arc<RwLock<Session>>;

impl Session {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            state: StateMap::new(),
            initial_state: StateMap::new(),
            events: Vec::new(),
            last_update_time: Utc::now(),
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(RwLock::new(self))
    }

    /// Events with rewound invocations (and rewind markers) removed.
    pub fn visible_events(&self) -> Vec<&Event> {
        apply_rewinds(&self.events)
    }

    /// Summary without events or state.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            last_update_time: self.last_update_time,
        }
    }
}

/// Lightweight listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub last_update_time: DateTime<Utc>,
}

/// Filters for [`SessionService::get_session`](super::SessionService::get_session).
#[derive(Debug, Clone, Default)]
pub struct GetSessionConfig {
    /// Keep only the most recent N events.
    pub num_recent_events: Option<usize>,
    /// Keep only events at or after this instant.
    pub after_timestamp: Option<DateTime<Utc>>,
}

impl GetSessionConfig {
    pub(crate) fn apply(&self, session: &mut Session) {
        if let Some(after) = self.after_timestamp {
            session.events.retain(|event| event.timestamp >= after);
        }
        if let Some(n) = self.num_recent_events {
            let skip = session.events.len().saturating_sub(n);
            session.events.drain(..skip);
        }
    }
}

/// Merge an event into a session the way every service does on append.
///
/// Partial events are ignored. `temp:` keys are dropped from the persisted
/// delta; a `null` value removes the key.
pub fn apply_event(session: &mut Session, event: &Event) {
    if event.partial {
        return;
    }
    for (key, value) in &event.actions.state_delta {
        if key.starts_with(TEMP_PREFIX) {
            continue;
        }
        if value.is_null() {
            session.state.remove(key);
        } else {
            session.state.insert(key.clone(), value.clone());
        }
    }
    session.events.push(event.clone());
    session.last_update_time = Utc::now().max(event.timestamp);
}

/// Delta with `temp:` keys removed.
pub fn persistent_delta(delta: &StateMap) -> StateMap {
    delta
        .iter()
        .filter(|(key, _)| StateScope::of(key) != StateScope::Temp)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventActions;
    use serde_json::json;

    fn with_delta(pairs: &[(&str, serde_json::Value)]) -> Event {
        let mut actions = EventActions::default();
        for (key, value) in pairs {
            actions.state_delta.insert((*key).into(), value.clone());
        }
        Event::new("inv", "assistant").with_actions(actions)
    }

    #[test]
    fn state_equals_ordered_merge_of_deltas() {
        let mut session = Session::new("app", "u1", "s1");
        session.state.insert("seed".into(), json!(0));

        let events = vec![
            with_delta(&[("a", json!(1)), ("b", json!("x"))]),
            with_delta(&[("a", json!(2)), ("temp:scratch", json!(true))]),
            with_delta(&[("b", json!(null)), ("c", json!([1, 2]))]),
        ];
        for event in &events {
            apply_event(&mut session, event);
        }

        let mut expected = StateMap::new();
        expected.insert("seed".into(), json!(0));
        expected.insert("a".into(), json!(2));
        expected.insert("c".into(), json!([1, 2]));
        assert_eq!(session.state, expected);
        assert_eq!(session.events.len(), 3);
    }

    #[test]
    fn partial_events_are_not_stored() {
        let mut session = Session::new("app", "u1", "s1");
        apply_event(&mut session, &with_delta(&[("a", json!(1))]).with_partial(true));
        assert!(session.events.is_empty());
        assert!(session.state.is_empty());
    }

    #[test]
    fn config_keeps_recent_events() {
        let mut session = Session::new("app", "u1", "s1");
        for _ in 0..5 {
            apply_event(&mut session, &Event::new("inv", "assistant"));
        }
        GetSessionConfig {
            num_recent_events: Some(2),
            after_timestamp: None,
        }
        .apply(&mut session);
        assert_eq!(session.events.len(), 2);
    }
}
