//! Chat refinement loop for radars.
//!
//! Stateless per call: the client sends the full conversation and its working
//! radar each turn, the engine sends both to the AI and returns a revised
//! radar. Failures never fail the turn; the user gets a fixed apology and an
//! unchanged radar, with the reason tagged on the response for observability.

use serde_json::Value;
use uuid::Uuid;

use crate::engine::{EngineError, RadarEngine};
use crate::extract::extract_payload;
use crate::gateway::{Attribution, ChatModel, ChatRequest, Message};
use crate::prompts;
use crate::radar::{radar_to_values, sanitize, Radar, MIN_AXES};
use crate::role::RoleContext;
use crate::store::{SnapshotSource, SnapshotStatus};

/// Fixed reply returned when a refinement turn cannot use the AI.
pub const APOLOGY_REPLY: &str =
    "Sorry, I couldn't process that just now. Your radar is unchanged — please try again.";

/// Read-side view of a role's refinement state.
#[derive(Debug, Clone)]
pub struct ChatSession {
    /// Active axis catalog, in order.
    pub axes: Vec<crate::axes::AxisDef>,
    /// Sanitized radar from the latest snapshot, draft or confirmed.
    /// Empty when the role has no snapshots yet.
    pub radar: Radar,
    pub snapshot_id: Option<Uuid>,
    pub snapshot_status: Option<SnapshotStatus>,
}

/// Outcome of one refinement turn.
#[derive(Debug, Clone)]
pub struct ChatTurnResult {
    pub reply: String,
    pub radar: Radar,
    pub thread_id: Uuid,
    /// Set when the AI path failed and the apology path was taken.
    pub fallback_reason: Option<String>,
}

impl RadarEngine {
    /// Load the session view for a role: catalog plus the sanitized radar of
    /// the latest snapshot regardless of status. Raw persisted scores are
    /// never returned.
    pub async fn session(&self, role_id: Uuid) -> Result<ChatSession, EngineError> {
        let axes = self.store.active_axes().await?;
        let latest = self.store.latest_snapshot(role_id).await?;

        let (radar, snapshot_id, snapshot_status) = match latest {
            Some(snap) => {
                let raw: Vec<Value> = self
                    .store
                    .get_scores(snap.id)
                    .await?
                    .iter()
                    .map(|s| serde_json::to_value(s.to_entry()).unwrap_or(Value::Null))
                    .collect();
                (sanitize(&raw, &axes), Some(snap.id), Some(snap.status))
            }
            None => (Vec::new(), None, None),
        };

        Ok(ChatSession {
            axes: axes.defs().to_vec(),
            radar,
            snapshot_id,
            snapshot_status,
        })
    }

    /// Run one refinement turn.
    ///
    /// `history` is the full conversation, oldest first, ending with the
    /// user's current message. `working` is the client's radar; when empty
    /// the latest persisted snapshot stands in. Nothing is persisted here
    /// except the best-effort thread log.
    pub async fn turn(
        &self,
        role: &RoleContext,
        history: &[Message],
        working: &[Value],
        thread_id: Option<Uuid>,
        user_id: Option<Uuid>,
    ) -> Result<ChatTurnResult, EngineError> {
        let axes = self.store.active_axes().await?;
        if axes.is_empty() {
            return Err(EngineError::NoActiveAxes);
        }

        let working_radar = if working.is_empty() {
            self.session(role.id).await?.radar
        } else {
            sanitize(working, &axes)
        };

        let (reply, radar, fallback_reason) = match self
            .ai_refine(role, history, &working_radar, &axes)
            .await
        {
            Ok((reply, raw_axes)) => {
                let revised = sanitize(&raw_axes, &axes);
                (reply, revised, None)
            }
            Err(reason) => {
                tracing::info!(role_id = %role.id, %reason, "refinement turn fell back");
                (APOLOGY_REPLY.to_string(), working_radar, Some(reason))
            }
        };

        let thread_id = self
            .log_turn(role.id, thread_id, user_id, history, &reply, &radar)
            .await;

        Ok(ChatTurnResult {
            reply,
            radar,
            thread_id,
            fallback_reason,
        })
    }

    /// Persist the client's radar into the role's current draft.
    ///
    /// Hard gates before any mutation: the role must not be archived and the
    /// sanitized radar must reach [`MIN_AXES`]. The draft's existing scores
    /// are fully replaced.
    ///
    /// `source` records how the radar was produced: [`SnapshotSource::Manual`]
    /// for user-edited radars, [`SnapshotSource::AiChat`] for a radar accepted
    /// from a refinement turn. It applies when a new draft is created; a
    /// reused draft keeps the source it was created with.
    pub async fn save(
        &self,
        role: &RoleContext,
        raw: &[Value],
        source: SnapshotSource,
        user_id: Option<Uuid>,
    ) -> Result<Uuid, EngineError> {
        if role.status.is_archived() {
            return Err(EngineError::RoleArchived(role.id));
        }

        let axes = self.store.active_axes().await?;
        if axes.is_empty() {
            return Err(EngineError::NoActiveAxes);
        }

        let radar = sanitize(raw, &axes);
        if radar.len() < MIN_AXES {
            return Err(EngineError::RadarTooSmall {
                got: radar.len(),
                min: MIN_AXES,
            });
        }

        let snapshot_id = match self.store.latest_draft(role.id).await? {
            Some(draft) => draft.id,
            None => self.store.create_draft(role.id, source, user_id).await?,
        };

        self.store.replace_scores(snapshot_id, &radar, &axes).await?;
        Ok(snapshot_id)
    }

    async fn ai_refine(
        &self,
        role: &RoleContext,
        history: &[Message],
        working: &Radar,
        axes: &crate::axes::ActiveAxes,
    ) -> Result<(String, Vec<Value>), String> {
        let Some(gateway) = &self.gateway else {
            return Err("no AI gateway configured".to_string());
        };

        let messages = prompts::refinement_messages(role, axes, working, history);
        let req = ChatRequest::new(
            ChatModel::openrouter(&self.model),
            messages,
            Attribution::new("radar::chat")
                .with_role(role.id),
        )
        .temperature(0.3)
        .max_tokens(2048)
        .with_schema("radar_refinement", prompts::refinement_schema());

        let resp = gateway
            .chat(req)
            .await
            .map_err(|e| format!("provider call failed: {e}"))?;

        let payload = extract_payload(&[&resp.content])
            .ok_or_else(|| "response contained no JSON payload".to_string())?;

        let reply = payload
            .get("reply")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "payload had no reply field".to_string())?;

        let raw_axes = payload
            .get("radar")
            .and_then(|r| r.get("axes"))
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| {
                // Tolerate a flat {"reply", "scores": [...]} shape.
                payload.get("scores").and_then(Value::as_array).cloned()
            })
            .ok_or_else(|| "payload had no radar axes".to_string())?;

        Ok((reply, raw_axes))
    }

    /// Best-effort thread logging. Failures are warned and swallowed; a turn
    /// never fails because its log did not land.
    async fn log_turn(
        &self,
        role_id: Uuid,
        thread_id: Option<Uuid>,
        user_id: Option<Uuid>,
        history: &[Message],
        reply: &str,
        radar: &Radar,
    ) -> Uuid {
        let thread = match self.store.ensure_thread(role_id, user_id, thread_id).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(%role_id, error = %e, "failed to resolve chat thread");
                return thread_id.unwrap_or_else(Uuid::new_v4);
            }
        };

        let user_payload = history
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let ai_payload = serde_json::json!({
            "reply": reply,
            "radar": radar_to_values(radar),
        })
        .to_string();

        if let Err(e) = self
            .store
            .append_messages(
                thread,
                &[
                    ("user".to_string(), user_payload),
                    ("assistant".to_string(), ai_payload),
                ],
            )
            .await
        {
            tracing::warn!(%role_id, %thread, error = %e, "failed to log chat turn");
        }
        thread
    }
}
