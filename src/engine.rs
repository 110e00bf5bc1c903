//! Radar generation orchestrator.
//!
//! Coordinates axis lookup, the AI scoring call, the heuristic fallback, the
//! sanitizer, and snapshot persistence. The contract with callers: a
//! generation request on a live role with a non-empty catalog always yields a
//! persisted draft, AI-scored when possible and heuristic-scored otherwise.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::axes::ActiveAxes;
use crate::extract::{extract_payload, Extracted};
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest};
use crate::heuristic::heuristic_radar;
use crate::prompts;
use crate::radar::{sanitize, Radar, MIN_AXES};
use crate::role::{RoleAnswer, RoleContext};
use crate::store::{SnapshotSource, SqliteRadarStore, StoreError};

/// Default model for scoring calls when none is configured.
pub const DEFAULT_MODEL: &str = "anthropic/claude-3-5-haiku";

/// Which scorer produced a radar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Ai,
    Fallback,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Fallback => "fallback",
        }
    }
}

/// Outcome of a generation request.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub snapshot_id: Uuid,
    pub radar: Radar,
    pub strategy: Strategy,
    /// Why the AI path was not used, when it was not.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no active axes configured")]
    NoActiveAxes,
    #[error("role {0} is archived")]
    RoleArchived(Uuid),
    #[error("sanitized radar has {got} axes, need at least {min}")]
    RadarTooSmall { got: usize, min: usize },
    #[error("role {0} has no confirmed snapshot")]
    NoConfirmedSnapshot(Uuid),
    #[error("draft {snapshot_id} created but its scores failed to persist: {source}")]
    OrphanedDraft {
        snapshot_id: Uuid,
        source: StoreError,
    },
}

/// The radar engine. Cheap to clone; the store and gateway are shared.
#[derive(Clone)]
pub struct RadarEngine {
    pub(crate) store: SqliteRadarStore,
    pub(crate) gateway: Option<Arc<dyn ChatGateway>>,
    pub(crate) model: String,
}

impl RadarEngine {
    /// Engine without an AI gateway; every generation uses the heuristic.
    pub fn heuristic_only(store: SqliteRadarStore) -> Self {
        Self {
            store,
            gateway: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn new(store: SqliteRadarStore, gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            store,
            gateway: Some(gateway),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn store(&self) -> &SqliteRadarStore {
        &self.store
    }

    /// Generate a radar for a role and persist it as a new draft snapshot.
    ///
    /// Hard gates, checked before any mutation: the role must not be
    /// archived and the active catalog must be non-empty. Everything past
    /// those gates degrades instead of failing: an AI error, an unparseable
    /// response, or a missing gateway all switch to the heuristic scorer.
    pub async fn generate(
        &self,
        role: &RoleContext,
        answers: &[RoleAnswer],
        created_by: Option<Uuid>,
    ) -> Result<GenerationResult, EngineError> {
        if role.status.is_archived() {
            return Err(EngineError::RoleArchived(role.id));
        }

        let axes = self.store.active_axes().await?;
        if axes.is_empty() {
            return Err(EngineError::NoActiveAxes);
        }

        let (raw, strategy, fallback_reason) = match self.ai_scores(role, answers, &axes).await {
            Ok(scores) => (scores, Strategy::Ai, None),
            Err(reason) => {
                tracing::info!(role_id = %role.id, %reason, "falling back to heuristic scorer");
                (
                    heuristic_radar(answers, &axes),
                    Strategy::Fallback,
                    Some(reason),
                )
            }
        };

        let radar = sanitize(&raw, &axes);
        if radar.len() < MIN_AXES {
            return Err(EngineError::RadarTooSmall {
                got: radar.len(),
                min: MIN_AXES,
            });
        }

        let snapshot_id = self
            .store
            .create_draft(role.id, SnapshotSource::AiInitial, created_by)
            .await?;

        if let Err(source) = self.store.replace_scores(snapshot_id, &radar, &axes).await {
            tracing::error!(
                %snapshot_id,
                role_id = %role.id,
                error = %source,
                "draft created but score persistence failed"
            );
            return Err(EngineError::OrphanedDraft {
                snapshot_id,
                source,
            });
        }

        Ok(GenerationResult {
            snapshot_id,
            radar,
            strategy,
            fallback_reason,
        })
    }

    /// Publish precondition: the role must have a confirmed snapshot.
    pub async fn ensure_publishable(&self, role_id: Uuid) -> Result<(), EngineError> {
        if self.store.has_confirmed(role_id).await? {
            Ok(())
        } else {
            Err(EngineError::NoConfirmedSnapshot(role_id))
        }
    }

    pub async fn confirm(&self, snapshot_id: Uuid) -> Result<(), EngineError> {
        Ok(self.store.confirm_snapshot(snapshot_id).await?)
    }

    pub async fn delete(&self, snapshot_ids: &[Uuid]) -> Result<usize, EngineError> {
        Ok(self.store.delete_snapshots(snapshot_ids).await?)
    }

    /// Run the AI scoring call end to end. Any failure is reduced to a
    /// human-readable reason string; the caller decides what to do with it.
    async fn ai_scores(
        &self,
        role: &RoleContext,
        answers: &[RoleAnswer],
        axes: &ActiveAxes,
    ) -> Result<Vec<Value>, String> {
        let Some(gateway) = &self.gateway else {
            return Err("no AI gateway configured".to_string());
        };

        let messages = prompts::generation_messages(role, answers, axes);
        let req = ChatRequest::new(
            ChatModel::openrouter(&self.model),
            messages,
            Attribution::new("radar::generate").with_role(role.id),
        )
        .temperature(0.2)
        .max_tokens(2048)
        .with_schema("radar_scores", prompts::generation_schema());

        let resp = gateway
            .chat(req)
            .await
            .map_err(|e| format!("provider call failed: {e}"))?;

        let payload = extract_payload(&[&resp.content])
            .ok_or_else(|| "response contained no JSON payload".to_string())?;

        scores_from_payload(payload).ok_or_else(|| "payload had no scores array".to_string())
    }
}

/// Accept either `{"scores": [...]}` or a bare array of score objects.
pub(crate) fn scores_from_payload(payload: Extracted) -> Option<Vec<Value>> {
    match payload {
        Extracted::Array(items) => Some(items),
        Extracted::Object(map) => match map.get("scores") {
            Some(Value::Array(items)) => Some(items.clone()),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleStatus;
    use crate::store::SnapshotStatus;
    use serde_json::json;

    #[test]
    fn scores_from_wrapped_object() {
        let payload = extract_payload(&[r#"{"scores": [{"axis_key": "a"}]}"#]).unwrap();
        assert_eq!(scores_from_payload(payload).unwrap().len(), 1);
    }

    #[test]
    fn scores_from_bare_array() {
        let payload = extract_payload(&[r#"[{"axis_key": "a"}, {"axis_key": "b"}]"#]).unwrap();
        assert_eq!(scores_from_payload(payload).unwrap().len(), 2);
    }

    #[test]
    fn object_without_scores_is_rejected() {
        let payload = extract_payload(&[r#"{"reply": "hello"}"#]).unwrap();
        assert!(scores_from_payload(payload).is_none());
    }

    #[test]
    fn scores_key_must_be_an_array() {
        let payload = extract_payload(&[json!({"scores": "not an array"}).to_string().as_str()])
            .unwrap();
        assert!(scores_from_payload(payload).is_none());
    }

    #[tokio::test]
    async fn failed_score_persistence_surfaces_the_orphaned_draft() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join("radar.sqlite");
        std::mem::forget(dir);
        let store = SqliteRadarStore::new(&path).expect("create store");
        for key in [
            "communication",
            "teamwork",
            "problem_solving",
            "initiative",
            "adaptability",
            "technical_foundation",
        ] {
            store.insert_axis(key, key, "en").await.expect("insert axis");
        }

        // Break score persistence behind the store's back. Draft creation
        // only touches the snapshots table and still succeeds.
        let raw = rusqlite::Connection::open(&path).expect("open raw connection");
        raw.execute_batch("DROP TABLE scores").expect("drop scores");

        let role = RoleContext {
            id: Uuid::new_v4(),
            title: "Backend Intern".into(),
            description: "Builds and ships internal APIs.".into(),
            responsibilities: vec!["Own a small service.".into()],
            requirements: vec!["Rust basics".into()],
            status: RoleStatus::Active,
        };
        let engine = RadarEngine::heuristic_only(store.clone());
        let err = engine.generate(&role, &[], None).await.unwrap_err();
        let EngineError::OrphanedDraft { snapshot_id, .. } = err else {
            panic!("expected OrphanedDraft, got {err:?}");
        };

        // The draft row survives for inspection and cleanup.
        let snap = store.get_snapshot(snapshot_id).await.expect("draft row");
        assert_eq!(snap.status, SnapshotStatus::Draft);
        assert_eq!(snap.role_id, role.id);
    }
}
