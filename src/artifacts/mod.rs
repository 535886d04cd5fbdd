//! Versioned binary artifact storage.

pub mod in_memory;

pub use in_memory::InMemoryArtifactService;

use async_trait::async_trait;

use crate::error::Result;
use crate::state::USER_PREFIX;
use crate::types::Part;

/// Owner of an artifact namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactScope {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl ArtifactScope {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Storage path for `filename`. `user:` files are shared across the user's sessions.
    pub fn path(&self, filename: &str) -> String {
        if filename.starts_with(USER_PREFIX) {
            format!("{}/{}/user/{}", self.app_name, self.user_id, filename)
        } else {
            format!(
                "{}/{}/{}/{}",
                self.app_name, self.user_id, self.session_id, filename
            )
        }
    }
}

/// Artifact storage. Each save creates a new version starting at 0.
#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Store a new version and return its number.
    async fn save_artifact(&self, scope: &ArtifactScope, filename: &str, artifact: Part)
        -> Result<u32>;

    /// Load `version`, or the latest when `None`.
    async fn load_artifact(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        version: Option<u32>,
    ) -> Result<Option<Part>>;

    /// Filenames visible to the session, sorted.
    async fn list_artifact_keys(&self, scope: &ArtifactScope) -> Result<Vec<String>>;

    /// Remove every version of `filename`.
    async fn delete_artifact(&self, scope: &ArtifactScope, filename: &str) -> Result<()>;

    async fn list_versions(&self, scope: &ArtifactScope, filename: &str) -> Result<Vec<u32>>;
}
