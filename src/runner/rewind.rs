use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::artifacts::{ArtifactScope, ArtifactService};
use crate::context::Services;
use crate::error::{Result, WeftError};
use crate::events::Event;
use crate::sessions::{persistent_delta, Session};
use crate::state::merge_delta;
use crate::types::{Part, StateMap};

/// What a rewind has to undo, computed without touching storage.
pub(super) struct RewindPlan {
    /// Delta taking the current state back to the state before the target.
    pub state_delta: StateMap,
    /// Artifacts changed at or after the target, with the version each had
    /// before it (`None` when it did not exist yet).
    pub artifacts: BTreeMap<String, Option<u32>>,
}

pub(super) fn plan(session: &Session, invocation_id: &str) -> Result<RewindPlan> {
    let index = session
        .events
        .iter()
        .position(|event| event.invocation_id == invocation_id)
        .ok_or_else(|| WeftError::InvocationNotFound(invocation_id.to_string()))?;
    let (before, after) = session.events.split_at(index);

    let state_before = replay_state(&session.initial_state, before);
    let state_now = replay_state(&session.initial_state, &session.events);
    let mut state_delta = StateMap::new();
    for (key, value) in &state_before {
        if state_now.get(key) != Some(value) {
            state_delta.insert(key.clone(), value.clone());
        }
    }
    for key in state_now.keys() {
        if !state_before.contains_key(key) {
            state_delta.insert(key.clone(), Value::Null);
        }
    }

    let versions_before = artifact_versions(before);
    let artifacts = after
        .iter()
        .flat_map(|event| event.actions.artifact_delta.keys())
        .map(|filename| (filename.clone(), versions_before.get(filename).copied()))
        .collect();

    Ok(RewindPlan {
        state_delta,
        artifacts,
    })
}

/// Persistent state produced by `events` on top of `initial`, including
/// earlier rewinds.
fn replay_state(initial: &StateMap, events: &[Event]) -> StateMap {
    let mut state = initial.clone();
    for event in events.iter().filter(|event| !event.partial) {
        merge_delta(&mut state, &persistent_delta(&event.actions.state_delta));
    }
    state
}

fn artifact_versions(events: &[Event]) -> BTreeMap<String, u32> {
    let mut versions = BTreeMap::new();
    for event in events {
        for (filename, version) in &event.actions.artifact_delta {
            versions.insert(filename.clone(), *version);
        }
    }
    versions
}

/// One artifact change a rewind will make once its event is stored.
pub(super) enum ArtifactRestore {
    /// Save `artifact` again; storage will assign `version`.
    Resave {
        filename: String,
        artifact: Part,
        version: u32,
    },
    Delete { filename: String },
}

/// Load every prior artifact version the rewind needs, without writing.
pub(super) async fn load_restores(
    services: &Services,
    scope: &ArtifactScope,
    plan: &RewindPlan,
) -> Result<Vec<ArtifactRestore>> {
    if plan.artifacts.is_empty() {
        return Ok(Vec::new());
    }
    let service = artifact_service(services)?;

    let mut restores = Vec::with_capacity(plan.artifacts.len());
    for (filename, version) in &plan.artifacts {
        let restore = match version {
            Some(version) => {
                let artifact = service
                    .load_artifact(scope, filename, Some(*version))
                    .await?
                    .ok_or_else(|| {
                        WeftError::Artifact(format!("{filename} version {version} is missing"))
                    })?;
                let next = service
                    .list_versions(scope, filename)
                    .await?
                    .into_iter()
                    .max()
                    .map_or(0, |latest| latest + 1);
                ArtifactRestore::Resave {
                    filename: filename.clone(),
                    artifact,
                    version: next,
                }
            }
            None => ArtifactRestore::Delete {
                filename: filename.clone(),
            },
        };
        restores.push(restore);
    }
    Ok(restores)
}

/// Versions the rewind event records, one per re-saved artifact.
pub(super) fn artifact_delta(restores: &[ArtifactRestore]) -> BTreeMap<String, u32> {
    restores
        .iter()
        .filter_map(|restore| match restore {
            ArtifactRestore::Resave {
                filename, version, ..
            } => Some((filename.clone(), *version)),
            ArtifactRestore::Delete { .. } => None,
        })
        .collect()
}

/// Write the loaded restores. Runs only after the rewind event is stored.
pub(super) async fn apply_restores(
    services: &Services,
    scope: &ArtifactScope,
    restores: Vec<ArtifactRestore>,
) -> Result<()> {
    if restores.is_empty() {
        return Ok(());
    }
    let service = artifact_service(services)?;
    for restore in restores {
        match restore {
            ArtifactRestore::Resave {
                filename,
                artifact,
                version,
            } => {
                let saved = service.save_artifact(scope, &filename, artifact).await?;
                if saved != version {
                    tracing::warn!(
                        artifact = %filename,
                        expected = version,
                        saved,
                        "Artifact version moved during rewind"
                    );
                }
            }
            ArtifactRestore::Delete { filename } => service.delete_artifact(scope, &filename).await?,
        }
    }
    Ok(())
}

fn artifact_service(services: &Services) -> Result<&Arc<dyn ArtifactService>> {
    services
        .artifact_service
        .as_ref()
        .ok_or_else(|| WeftError::Artifact("rewinding artifacts requires an artifact service".into()))
}
