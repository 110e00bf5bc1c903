//! Role context as delivered by the external role/answer store.
//!
//! The engine never loads roles itself; callers resolve them through whatever
//! persistence they own and hand the result in. Only the fields the radar
//! pipeline actually consumes are modeled here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a role, as reported by its owning store.
///
/// The engine only distinguishes "writable" from "archived": archived roles
/// reject radar writes outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    Active,
    Archived,
}

impl RoleStatus {
    pub fn is_archived(self) -> bool {
        matches!(self, RoleStatus::Archived)
    }
}

/// Free-text context describing an internship role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleContext {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub status: RoleStatus,
}

/// One questionnaire answer for a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAnswer {
    /// Stable question identifier (e.g. "daily_work", "team_shape").
    pub slug: String,
    pub text: String,
}

impl RoleAnswer {
    pub fn new(slug: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            text: text.into(),
        }
    }
}
