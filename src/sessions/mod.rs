//! Session storage contract and in-memory implementation.

pub mod in_memory;
pub mod session;

pub use in_memory::InMemorySessionService;
pub use session::{
    apply_event, persistent_delta, GetSessionConfig, Session, SessionSummary, SharedSession,
};

use async_trait::async_trait;

use crate::error::Result;
use crate::events::Event;
use crate::types::StateMap;

/// Storage for sessions. The single write path for session state.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Create a session, generating an id when none is given.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        state: Option<StateMap>,
        session_id: Option<String>,
    ) -> Result<Session>;

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        config: Option<GetSessionConfig>,
    ) -> Result<Option<Session>>;

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionSummary>>;

    async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str)
        -> Result<()>;

    /// Merge `event` into `session` and persist it.
    ///
    /// Partial events are returned untouched. Fails if the session was deleted
    /// or if `session` is older than the stored copy.
    async fn append_event(&self, session: &mut Session, event: Event) -> Result<Event>;
}
