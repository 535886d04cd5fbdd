//! Delta-tracked key/value state.
//!
//! A [`State`] is a read view over a committed base map plus a pending delta.
//! Writes only ever touch the delta; the session service merges the delta into
//! the session when the event that carries it is appended.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::types::StateMap;
use crate::util::lock;

/// Keys shared by every user and session of an app.
pub const APP_PREFIX: &str = "app:";
/// Keys shared by every session of a user.
pub const USER_PREFIX: &str = "user:";
/// Keys that live only for the current invocation and are never persisted.
pub const TEMP_PREFIX: &str = "temp:";

/// Scope of a state key, derived from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateScope {
    App,
    User,
    Session,
    Temp,
}

impl StateScope {
    pub fn of(key: &str) -> Self {
        if key.starts_with(APP_PREFIX) {
            Self::App
        } else if key.starts_with(USER_PREFIX) {
            Self::User
        } else if key.starts_with(TEMP_PREFIX) {
            Self::Temp
        } else {
            Self::Session
        }
    }
}

/// Apply `delta` to `target`. A `null` value removes the key.
pub fn merge_delta(target: &mut StateMap, delta: &StateMap) {
    for (key, value) in delta {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Read view over committed state with a shared pending delta.
///
/// Clones share the same delta, so a tool and the dispatcher that created it
/// observe each other's writes.
#[derive(Debug, Clone, Default)]
pub struct State {
    base: Arc<StateMap>,
    delta: Arc<Mutex<StateMap>>,
}

impl State {
    pub fn new(base: StateMap) -> Self {
        Self {
            base: Arc::new(base),
            delta: Arc::new(Mutex::new(StateMap::new())),
        }
    }

    /// Same committed base, fresh empty delta.
    pub fn fork(&self) -> Self {
        Self {
            base: Arc::clone(&self.base),
            delta: Arc::new(Mutex::new(StateMap::new())),
        }
    }

    /// Value for `key`, looking at the pending delta first.
    pub fn get(&self, key: &str) -> Option<Value> {
        let delta = lock(&self.delta);
        match delta.get(key) {
            Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
            None => self.base.get(key).cloned(),
        }
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        lock(&self.delta).insert(key.into(), value);
    }

    /// Mark `key` for removal on commit.
    pub fn remove(&self, key: &str) {
        lock(&self.delta).insert(key.to_string(), Value::Null);
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn has_delta(&self) -> bool {
        !lock(&self.delta).is_empty()
    }

    pub fn update(&self, delta: &StateMap) {
        let mut pending = lock(&self.delta);
        for (key, value) in delta {
            pending.insert(key.clone(), value.clone());
        }
    }

    /// Snapshot of the pending delta.
    pub fn delta(&self) -> StateMap {
        lock(&self.delta).clone()
    }

    /// Snapshot of base merged with delta.
    pub fn to_map(&self) -> StateMap {
        let mut merged = (*self.base).clone();
        merge_delta(&mut merged, &lock(&self.delta));
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> StateMap {
        let mut map = StateMap::new();
        map.insert("count".into(), json!(1));
        map.insert("name".into(), json!("ada"));
        map
    }

    #[test]
    fn reads_see_delta_over_base() {
        let state = State::new(base());
        assert_eq!(state.get("count"), Some(json!(1)));
        assert!(!state.has_delta());

        state.set("count", json!(2));

        assert_eq!(state.get("count"), Some(json!(2)));
        assert!(state.has_delta());
        assert_eq!(state.delta().get("count"), Some(&json!(2)));
    }

    #[test]
    fn removal_hides_base_value() {
        let state = State::new(base());
        state.remove("name");

        assert!(!state.has("name"));
        assert_eq!(state.get_or("name", json!("none")), json!("none"));
        assert!(!state.to_map().contains_key("name"));
    }

    #[test]
    fn clones_share_pending_writes() {
        let state = State::new(StateMap::new());
        let view = state.clone();
        view.set("k", json!(true));

        assert_eq!(state.get("k"), Some(json!(true)));
    }

    #[test]
    fn scope_follows_prefix() {
        assert_eq!(StateScope::of("app:theme"), StateScope::App);
        assert_eq!(StateScope::of("user:lang"), StateScope::User);
        assert_eq!(StateScope::of("temp:scratch"), StateScope::Temp);
        assert_eq!(StateScope::of("plain"), StateScope::Session);
    }
}
