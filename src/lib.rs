#![forbid(unsafe_code)]

//! # skill-radar
//!
//! Turn unreliable AI output into bounded, consistent skill radars.
//!
//! An LLM asked to score a role on a set of skill axes produces output that
//! is malformed, out of range, duplicated, or missing as often as it is
//! clean. skill-radar funnels everything — AI responses, client submissions,
//! persisted rows — through one total sanitizer that guarantees a radar of
//! 6 to 10 unique, in-catalog, 0-100 entries, and persists the result as
//! versioned draft/confirmed snapshots with at most one confirmed snapshot
//! per role. When the AI is unavailable a deterministic heuristic scorer
//! stands in, so generation always yields a usable radar.

pub mod axes;
pub mod chat;
pub mod engine;
pub mod extract;
pub mod gateway;
pub mod heuristic;
pub mod prompts;
pub mod radar;
pub mod role;
pub mod store;

pub use axes::{ActiveAxes, AxisDef};
pub use chat::{ChatSession, ChatTurnResult, APOLOGY_REPLY};
pub use engine::{EngineError, GenerationResult, RadarEngine, Strategy};
pub use gateway::{Attribution, ChatGateway, NoopUsageSink, ProviderGateway, UsageSink};
pub use radar::{sanitize, Radar, RadarEntry, MAX_AXES, MIN_AXES};
pub use role::{RoleAnswer, RoleContext, RoleStatus};
pub use store::{Snapshot, SnapshotSource, SnapshotStatus, SqliteRadarStore, StoreError};
