use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ArtifactScope, ArtifactService};
use crate::error::Result;
use crate::types::Part;
use crate::util::lock;

/// Artifact service keeping every version in memory.
#[derive(Debug, Default)]
pub struct InMemoryArtifactService {
    artifacts: Mutex<BTreeMap<String, Vec<Part>>>,
}

impl InMemoryArtifactService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactService for InMemoryArtifactService {
    async fn save_artifact(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        artifact: Part,
    ) -> Result<u32> {
        let mut artifacts = lock(&self.artifacts);
        let versions = artifacts.entry(scope.path(filename)).or_default();
        versions.push(artifact);
        let version = (versions.len() - 1) as u32;
        tracing::debug!(filename, version, "Saved artifact");
        Ok(version)
    }

    async fn load_artifact(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        version: Option<u32>,
    ) -> Result<Option<Part>> {
        let artifacts = lock(&self.artifacts);
        let Some(versions) = artifacts.get(&scope.path(filename)) else {
            return Ok(None);
        };
        let part = match version {
            Some(v) => versions.get(v as usize),
            None => versions.last(),
        };
        Ok(part.cloned())
    }

    async fn list_artifact_keys(&self, scope: &ArtifactScope) -> Result<Vec<String>> {
        let session_prefix = format!("{}/{}/{}/", scope.app_name, scope.user_id, scope.session_id);
        let user_prefix = format!("{}/{}/user/", scope.app_name, scope.user_id);
        let artifacts = lock(&self.artifacts);
        let mut keys: Vec<String> = artifacts
            .keys()
            .filter_map(|path| {
                path.strip_prefix(&session_prefix)
                    .or_else(|| path.strip_prefix(&user_prefix))
                    .map(str::to_string)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_artifact(&self, scope: &ArtifactScope, filename: &str) -> Result<()> {
        lock(&self.artifacts).remove(&scope.path(filename));
        Ok(())
    }

    async fn list_versions(&self, scope: &ArtifactScope, filename: &str) -> Result<Vec<u32>> {
        let artifacts = lock(&self.artifacts);
        Ok(artifacts
            .get(&scope.path(filename))
            .map(|versions| (0..versions.len() as u32).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(session: &str) -> ArtifactScope {
        ArtifactScope::new("app", "u1", session)
    }

    #[tokio::test]
    async fn versions_increment_and_latest_loads_by_default() {
        let service = InMemoryArtifactService::new();
        let s = scope("s1");
        assert_eq!(service.save_artifact(&s, "notes.txt", Part::text("v0")).await.unwrap(), 0);
        assert_eq!(service.save_artifact(&s, "notes.txt", Part::text("v1")).await.unwrap(), 1);

        let latest = service.load_artifact(&s, "notes.txt", None).await.unwrap();
        assert_eq!(latest, Some(Part::text("v1")));
        let first = service.load_artifact(&s, "notes.txt", Some(0)).await.unwrap();
        assert_eq!(first, Some(Part::text("v0")));
        assert_eq!(service.list_versions(&s, "notes.txt").await.unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn user_scoped_files_cross_sessions() {
        let service = InMemoryArtifactService::new();
        service
            .save_artifact(&scope("s1"), "user:avatar.png", Part::text("img"))
            .await
            .unwrap();
        service
            .save_artifact(&scope("s1"), "draft.md", Part::text("d"))
            .await
            .unwrap();

        let keys = service.list_artifact_keys(&scope("s2")).await.unwrap();
        assert_eq!(keys, vec!["user:avatar.png"]);

        service.delete_artifact(&scope("s2"), "user:avatar.png").await.unwrap();
        assert!(service.list_artifact_keys(&scope("s1")).await.unwrap() == vec!["draft.md"]);
    }
}
