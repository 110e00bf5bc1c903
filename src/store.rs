//! SQLite-backed persistent store for axes, snapshots, scores, and chat threads.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::axes::{ActiveAxes, AxisDef};
use crate::radar::RadarEntry;

// =============================================================================
// Types
// =============================================================================

/// How a snapshot came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    AiInitial,
    AiChat,
    Manual,
}

impl SnapshotSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiInitial => "ai_initial",
            Self::AiChat => "ai_chat",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ai_initial" => Self::AiInitial,
            "ai_chat" => Self::AiChat,
            "manual" => Self::Manual,
            _ => Self::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Draft,
    Confirmed,
}

impl SnapshotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "confirmed" => Self::Confirmed,
            _ => Self::Draft,
        }
    }
}

/// A versioned radar snapshot for a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonic per-store sequence; newest snapshot has the largest seq.
    pub seq: i64,
    pub id: Uuid,
    pub role_id: Uuid,
    pub source: SnapshotSource,
    pub status: SnapshotStatus,
    pub created_by: Option<Uuid>,
    pub created_at: i64,
}

/// A persisted score row, joined with its axis label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredScore {
    pub axis_id: i64,
    pub axis_key: String,
    pub label: Option<String>,
    pub score_0_100: u8,
    pub min_required_0_100: Option<u8>,
    pub confidence_0_1: Option<f64>,
    pub weight_0_1: Option<f64>,
    pub rationale: Option<String>,
}

impl StoredScore {
    pub fn to_entry(&self) -> RadarEntry {
        RadarEntry {
            axis_key: self.axis_key.clone(),
            label: self.label.clone(),
            score_0_100: self.score_0_100,
            min_required_0_100: self.min_required_0_100,
            confidence_0_1: self.confidence_0_1,
            weight_0_1: self.weight_0_1,
            rationale: self.rationale.clone(),
        }
    }
}

/// A logged chat turn payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: i64,
    pub thread_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

// =============================================================================
// Error
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

// =============================================================================
// Store
// =============================================================================

#[derive(Clone)]
pub struct SqliteRadarStore {
    conn: Arc<Mutex<Connection>>,
    /// Gate concurrent spawn_blocking calls to prevent Tokio blocking pool starvation.
    /// Only one blocking thread waits on the mutex at a time; this also serializes
    /// save/confirm sequences so interleaved writers cannot split a delete+insert.
    sem: Arc<Semaphore>,
}

impl SqliteRadarStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;\
             PRAGMA busy_timeout=5000;",
        )?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            sem: Arc::new(Semaphore::new(1)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("RADAR_STORE") {
            return PathBuf::from(path);
        }
        PathBuf::from(".skill_radar.sqlite")
    }

    /// Lock the connection, recovering from mutex poisoning — the SQLite
    /// connection is still usable.
    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    fn create_tables(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS axes (\
               id INTEGER PRIMARY KEY AUTOINCREMENT,\
               key TEXT NOT NULL,\
               label TEXT NOT NULL,\
               locale TEXT NOT NULL DEFAULT 'en',\
               active INTEGER NOT NULL DEFAULT 1,\
               created_at INTEGER NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS snapshots (\
               seq INTEGER PRIMARY KEY AUTOINCREMENT,\
               id TEXT NOT NULL UNIQUE,\
               role_id TEXT NOT NULL,\
               source TEXT NOT NULL,\
               status TEXT NOT NULL DEFAULT 'draft',\
               created_by TEXT,\
               created_at INTEGER NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS scores (\
               id INTEGER PRIMARY KEY AUTOINCREMENT,\
               snapshot_id TEXT NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,\
               axis_id INTEGER NOT NULL REFERENCES axes(id),\
               axis_key TEXT NOT NULL,\
               score INTEGER NOT NULL,\
               min_required INTEGER,\
               confidence REAL,\
               weight REAL,\
               rationale TEXT,\
               UNIQUE(snapshot_id, axis_id)\
             );\
             CREATE TABLE IF NOT EXISTS threads (\
               id TEXT PRIMARY KEY,\
               role_id TEXT NOT NULL,\
               created_by TEXT,\
               created_at INTEGER NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS thread_messages (\
               id INTEGER PRIMARY KEY AUTOINCREMENT,\
               thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,\
               role TEXT NOT NULL,\
               content TEXT NOT NULL,\
               created_at INTEGER NOT NULL\
             );\
             CREATE UNIQUE INDEX IF NOT EXISTS idx_axes_active_key ON axes(key) WHERE active = 1;\
             CREATE INDEX IF NOT EXISTS idx_snapshots_role ON snapshots(role_id, seq);\
             CREATE INDEX IF NOT EXISTS idx_scores_snapshot ON scores(snapshot_id);\
             CREATE INDEX IF NOT EXISTS idx_threads_role ON threads(role_id);\
             CREATE INDEX IF NOT EXISTS idx_thread_messages_thread ON thread_messages(thread_id, id);",
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Axes
    // -------------------------------------------------------------------------

    /// Insert a new active axis version. Any existing active axis with the
    /// same key is deactivated in the same transaction, so historical scores
    /// keep pointing at the row they were created against.
    pub async fn insert_axis(
        &self,
        key: &str,
        label: &str,
        locale: &str,
    ) -> Result<i64, StoreError> {
        let store = self.clone();
        let key = key.to_string();
        let label = label.to_string();
        let locale = locale.to_string();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "UPDATE axes SET active = 0 WHERE key = ?1 AND active = 1",
                    params![key],
                )?;
                tx.execute(
                    "INSERT INTO axes (key, label, locale, active, created_at) \
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    params![key, label, locale, now_epoch()],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(id)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Retire an axis from the active catalog without touching history.
    pub async fn deactivate_axis(&self, key: &str) -> Result<(), StoreError> {
        let store = self.clone();
        let key = key.to_string();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let rows = conn.execute(
                    "UPDATE axes SET active = 0 WHERE key = ?1 AND active = 1",
                    params![key],
                )?;
                if rows == 0 {
                    return Err(StoreError::NotFound(format!("active axis {key}")));
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn list_active_axes(&self) -> Result<Vec<AxisDef>, StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, key, label, locale FROM axes WHERE active = 1 ORDER BY id",
                )?;
                let mut rows = stmt.query([])?;
                let mut axes = Vec::new();
                while let Some(row) = rows.next()? {
                    axes.push(AxisDef {
                        id: row.get(0)?,
                        key: row.get(1)?,
                        label: row.get(2)?,
                        locale: row.get(3)?,
                    });
                }
                Ok(axes)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Load the active catalog in insertion order, ready for sanitizing.
    pub async fn active_axes(&self) -> Result<ActiveAxes, StoreError> {
        Ok(ActiveAxes::from_defs(self.list_active_axes().await?))
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub async fn create_draft(
        &self,
        role_id: Uuid,
        source: SnapshotSource,
        created_by: Option<Uuid>,
    ) -> Result<Uuid, StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let id = Uuid::new_v4();
                conn.execute(
                    "INSERT INTO snapshots (id, role_id, source, status, created_by, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id.to_string(),
                        role_id.to_string(),
                        source.as_str(),
                        SnapshotStatus::Draft.as_str(),
                        created_by.map(|u| u.to_string()),
                        now_epoch(),
                    ],
                )?;
                Ok(id)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Replace the full score set of a snapshot in one transaction.
    ///
    /// Entries whose axis_key is not in the active catalog are rejected
    /// outright; callers funnel input through the sanitizer first, which
    /// guarantees catalog membership.
    pub async fn replace_scores(
        &self,
        snapshot_id: Uuid,
        entries: &[RadarEntry],
        axes: &ActiveAxes,
    ) -> Result<(), StoreError> {
        let store = self.clone();
        let entries = entries.to_vec();
        let axis_ids: Vec<Option<i64>> = entries
            .iter()
            .map(|e| axes.get(&e.axis_key).map(|d| d.id))
            .collect();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let snapshot_id = snapshot_id.to_string();
                let exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM snapshots WHERE id = ?1",
                    params![snapshot_id],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Err(StoreError::NotFound(format!("snapshot {snapshot_id}")));
                }

                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "DELETE FROM scores WHERE snapshot_id = ?1",
                    params![snapshot_id],
                )?;
                for (entry, axis_id) in entries.iter().zip(axis_ids.iter()) {
                    let Some(axis_id) = axis_id else {
                        return Err(StoreError::Conflict(format!(
                            "unknown axis key {}",
                            entry.axis_key
                        )));
                    };
                    tx.execute(
                        "INSERT INTO scores (snapshot_id, axis_id, axis_key, score, \
                         min_required, confidence, weight, rationale) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            snapshot_id,
                            axis_id,
                            entry.axis_key,
                            entry.score_0_100 as i64,
                            entry.min_required_0_100.map(|v| v as i64),
                            entry.confidence_0_1,
                            entry.weight_0_1,
                            entry.rationale,
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Scores of a snapshot in the order they were written, so a persisted
    /// radar reads back in its original sequence.
    pub async fn get_scores(&self, snapshot_id: Uuid) -> Result<Vec<StoredScore>, StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT s.axis_id, s.axis_key, a.label, s.score, s.min_required, \
                     s.confidence, s.weight, s.rationale \
                     FROM scores s JOIN axes a ON a.id = s.axis_id \
                     WHERE s.snapshot_id = ?1 ORDER BY s.id",
                )?;
                let mut rows = stmt.query(params![snapshot_id.to_string()])?;
                let mut scores = Vec::new();
                while let Some(row) = rows.next()? {
                    scores.push(StoredScore {
                        axis_id: row.get(0)?,
                        axis_key: row.get(1)?,
                        label: row.get(2)?,
                        score_0_100: row.get::<_, i64>(3)?.clamp(0, 100) as u8,
                        min_required_0_100: row
                            .get::<_, Option<i64>>(4)?
                            .map(|v| v.clamp(0, 100) as u8),
                        confidence_0_1: row.get(5)?,
                        weight_0_1: row.get(6)?,
                        rationale: row.get(7)?,
                    });
                }
                Ok(scores)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn list_snapshots(
        &self,
        role_id: Uuid,
        status: Option<SnapshotStatus>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut sql = String::from(
                    "SELECT seq, id, role_id, source, status, created_by, created_at \
                     FROM snapshots WHERE role_id = ?1",
                );
                if status.is_some() {
                    sql.push_str(" AND status = ?2");
                }
                sql.push_str(" ORDER BY seq DESC");

                let mut stmt = conn.prepare(&sql)?;
                let role = role_id.to_string();
                let mut rows = match status {
                    Some(s) => stmt.query(params![role, s.as_str()])?,
                    None => stmt.query(params![role])?,
                };
                let mut snapshots = Vec::new();
                while let Some(row) = rows.next()? {
                    snapshots.push(row_to_snapshot(row)?);
                }
                Ok(snapshots)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Newest snapshot for a role regardless of status.
    pub async fn latest_snapshot(&self, role_id: Uuid) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.list_snapshots(role_id, None).await?.into_iter().next())
    }

    /// Newest draft for a role, if any.
    pub async fn latest_draft(&self, role_id: Uuid) -> Result<Option<Snapshot>, StoreError> {
        Ok(self
            .list_snapshots(role_id, Some(SnapshotStatus::Draft))
            .await?
            .into_iter()
            .next())
    }

    pub async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Snapshot, StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                conn.query_row(
                    "SELECT seq, id, role_id, source, status, created_by, created_at \
                     FROM snapshots WHERE id = ?1",
                    params![snapshot_id.to_string()],
                    row_to_snapshot,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::NotFound(format!("snapshot {snapshot_id}"))
                    }
                    other => StoreError::Sqlite(other),
                })
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Confirm a snapshot and demote any other confirmed snapshot for the
    /// same role back to draft, in one transaction.
    ///
    /// The target must be the newest draft for its role. Confirming an
    /// already-confirmed snapshot is a no-op.
    pub async fn confirm_snapshot(&self, snapshot_id: Uuid) -> Result<(), StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let id = snapshot_id.to_string();
                let target = conn
                    .query_row(
                        "SELECT seq, id, role_id, source, status, created_by, created_at \
                         FROM snapshots WHERE id = ?1",
                        params![id],
                        row_to_snapshot,
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => {
                            StoreError::NotFound(format!("snapshot {snapshot_id}"))
                        }
                        other => StoreError::Sqlite(other),
                    })?;

                if target.status == SnapshotStatus::Confirmed {
                    return Ok(());
                }

                let newer_drafts: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM snapshots \
                     WHERE role_id = ?1 AND status = 'draft' AND seq > ?2",
                    params![target.role_id.to_string(), target.seq],
                    |row| row.get(0),
                )?;
                if newer_drafts > 0 {
                    return Err(StoreError::Conflict(format!(
                        "snapshot {snapshot_id} is not the newest draft for role {}",
                        target.role_id
                    )));
                }

                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "UPDATE snapshots SET status = 'confirmed' WHERE id = ?1",
                    params![id],
                )?;
                tx.execute(
                    "UPDATE snapshots SET status = 'draft' \
                     WHERE role_id = ?1 AND status = 'confirmed' AND id != ?2",
                    params![target.role_id.to_string(), id],
                )?;
                tx.commit()?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Delete snapshots and their scores. Rejected in full if any target is
    /// missing or confirmed; nothing is deleted in that case.
    pub async fn delete_snapshots(&self, snapshot_ids: &[Uuid]) -> Result<usize, StoreError> {
        let store = self.clone();
        let ids: Vec<String> = snapshot_ids.iter().map(|u| u.to_string()).collect();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                for id in &ids {
                    let status: String = tx
                        .query_row(
                            "SELECT status FROM snapshots WHERE id = ?1",
                            params![id],
                            |row| row.get(0),
                        )
                        .map_err(|e| match e {
                            rusqlite::Error::QueryReturnedNoRows => {
                                StoreError::NotFound(format!("snapshot {id}"))
                            }
                            other => StoreError::Sqlite(other),
                        })?;
                    if SnapshotStatus::from_str(&status) == SnapshotStatus::Confirmed {
                        return Err(StoreError::Conflict(format!(
                            "snapshot {id} is confirmed and cannot be deleted"
                        )));
                    }
                }
                let mut deleted = 0;
                for id in &ids {
                    deleted += tx.execute("DELETE FROM snapshots WHERE id = ?1", params![id])?;
                }
                tx.commit()?;
                Ok(deleted)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Whether a role has a confirmed snapshot, the publish precondition.
    pub async fn has_confirmed(&self, role_id: Uuid) -> Result<bool, StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM snapshots WHERE role_id = ?1 AND status = 'confirmed'",
                    params![role_id.to_string()],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    // -------------------------------------------------------------------------
    // Chat threads
    // -------------------------------------------------------------------------

    /// Return the given thread if it exists, otherwise create a new one for
    /// the role and return its id.
    pub async fn ensure_thread(
        &self,
        role_id: Uuid,
        created_by: Option<Uuid>,
        existing: Option<Uuid>,
    ) -> Result<Uuid, StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                if let Some(id) = existing {
                    let count: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM threads WHERE id = ?1",
                        params![id.to_string()],
                        |row| row.get(0),
                    )?;
                    if count > 0 {
                        return Ok(id);
                    }
                }
                let id = existing.unwrap_or_else(Uuid::new_v4);
                conn.execute(
                    "INSERT INTO threads (id, role_id, created_by, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        id.to_string(),
                        role_id.to_string(),
                        created_by.map(|u| u.to_string()),
                        now_epoch(),
                    ],
                )?;
                Ok(id)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Append turn payloads to a thread, oldest first.
    pub async fn append_messages(
        &self,
        thread_id: Uuid,
        messages: &[(String, String)],
    ) -> Result<(), StoreError> {
        let store = self.clone();
        let messages = messages.to_vec();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                let now = now_epoch();
                for (role, content) in &messages {
                    tx.execute(
                        "INSERT INTO thread_messages (thread_id, role, content, created_at) \
                         VALUES (?1, ?2, ?3, ?4)",
                        params![thread_id.to_string(), role, content, now],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn thread_messages(
        &self,
        thread_id: Uuid,
    ) -> Result<Vec<ThreadMessage>, StoreError> {
        let store = self.clone();
        let _permit = self.sem.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, thread_id, role, content, created_at \
                     FROM thread_messages WHERE thread_id = ?1 ORDER BY id",
                )?;
                let mut rows = stmt.query(params![thread_id.to_string()])?;
                let mut messages = Vec::new();
                while let Some(row) = rows.next()? {
                    let thread: String = row.get(1)?;
                    messages.push(ThreadMessage {
                        id: row.get(0)?,
                        thread_id: parse_uuid(&thread, 1)?,
                        role: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    });
                }
                Ok(messages)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

// =============================================================================
// Row converters
// =============================================================================

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    let id: String = row.get(1)?;
    let role_id: String = row.get(2)?;
    let source: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_by: Option<String> = row.get(5)?;
    Ok(Snapshot {
        seq: row.get(0)?,
        id: parse_uuid(&id, 1)?,
        role_id: parse_uuid(&role_id, 2)?,
        source: SnapshotSource::from_str(&source),
        status: SnapshotStatus::from_str(&status),
        created_by: match created_by {
            Some(s) => Some(parse_uuid(&s, 5)?),
            None => None,
        },
        created_at: row.get(6)?,
    })
}

fn parse_uuid(s: &str, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> SqliteRadarStore {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join("test_radar.sqlite");
        // Leak the TempDir so it persists for the test
        std::mem::forget(dir);
        SqliteRadarStore::new(path).expect("create store")
    }

    async fn seed_axes(store: &SqliteRadarStore, keys: &[&str]) -> ActiveAxes {
        for key in keys {
            store
                .insert_axis(key, &key.to_uppercase(), "en")
                .await
                .expect("insert axis");
        }
        store.active_axes().await.expect("load axes")
    }

    fn entry(key: &str, score: u8) -> RadarEntry {
        RadarEntry {
            axis_key: key.to_string(),
            label: None,
            score_0_100: score,
            min_required_0_100: None,
            confidence_0_1: Some(0.8),
            weight_0_1: None,
            rationale: Some("test".to_string()),
        }
    }

    #[tokio::test]
    async fn axis_versioning_keeps_history() {
        let store = temp_store();
        let v1 = store.insert_axis("teamwork", "Teamwork", "en").await.unwrap();
        let v2 = store
            .insert_axis("teamwork", "Team Collaboration", "en")
            .await
            .unwrap();
        assert_ne!(v1, v2);

        let active = store.list_active_axes().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, v2);
        assert_eq!(active[0].label, "Team Collaboration");
    }

    #[tokio::test]
    async fn deactivate_removes_from_catalog() {
        let store = temp_store();
        store.insert_axis("teamwork", "Teamwork", "en").await.unwrap();
        store.deactivate_axis("teamwork").await.unwrap();
        assert!(store.list_active_axes().await.unwrap().is_empty());

        let err = store.deactivate_axis("teamwork").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn replace_scores_is_a_full_replacement() {
        let store = temp_store();
        let axes = seed_axes(&store, &["a", "b", "c"]).await;
        let role = Uuid::new_v4();
        let snap = store
            .create_draft(role, SnapshotSource::AiInitial, None)
            .await
            .unwrap();

        store
            .replace_scores(snap, &[entry("a", 70), entry("b", 60)], &axes)
            .await
            .unwrap();
        store
            .replace_scores(snap, &[entry("c", 90)], &axes)
            .await
            .unwrap();

        let scores = store.get_scores(snap).await.unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].axis_key, "c");
        assert_eq!(scores[0].score_0_100, 90);
        assert_eq!(scores[0].label.as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn get_scores_preserves_written_order() {
        let store = temp_store();
        let axes = seed_axes(&store, &["a", "b", "c"]).await;
        let role = Uuid::new_v4();
        let snap = store
            .create_draft(role, SnapshotSource::Manual, None)
            .await
            .unwrap();

        // Written in non-catalog order; the read-back must not re-sort.
        store
            .replace_scores(snap, &[entry("c", 90), entry("a", 70), entry("b", 60)], &axes)
            .await
            .unwrap();

        let keys: Vec<String> = store
            .get_scores(snap)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.axis_key)
            .collect();
        assert_eq!(keys, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn replace_scores_rejects_unknown_axis() {
        let store = temp_store();
        let axes = seed_axes(&store, &["a"]).await;
        let role = Uuid::new_v4();
        let snap = store
            .create_draft(role, SnapshotSource::Manual, None)
            .await
            .unwrap();

        let err = store
            .replace_scores(snap, &[entry("ghost", 50)], &axes)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_scores(snap).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirm_demotes_previous_confirmed() {
        let store = temp_store();
        let role = Uuid::new_v4();
        let s1 = store
            .create_draft(role, SnapshotSource::AiInitial, None)
            .await
            .unwrap();
        store.confirm_snapshot(s1).await.unwrap();

        let s2 = store
            .create_draft(role, SnapshotSource::Manual, None)
            .await
            .unwrap();
        store.confirm_snapshot(s2).await.unwrap();

        let confirmed = store
            .list_snapshots(role, Some(SnapshotStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, s2);
        assert_eq!(
            store.get_snapshot(s1).await.unwrap().status,
            SnapshotStatus::Draft
        );
    }

    #[tokio::test]
    async fn confirm_rejects_stale_draft() {
        let store = temp_store();
        let role = Uuid::new_v4();
        let old = store
            .create_draft(role, SnapshotSource::AiInitial, None)
            .await
            .unwrap();
        let _newer = store
            .create_draft(role, SnapshotSource::Manual, None)
            .await
            .unwrap();

        let err = store.confirm_snapshot(old).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn confirm_is_idempotent() {
        let store = temp_store();
        let role = Uuid::new_v4();
        let snap = store
            .create_draft(role, SnapshotSource::AiInitial, None)
            .await
            .unwrap();
        store.confirm_snapshot(snap).await.unwrap();
        store.confirm_snapshot(snap).await.unwrap();

        let confirmed = store
            .list_snapshots(role, Some(SnapshotStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(confirmed.len(), 1);
    }

    #[tokio::test]
    async fn delete_rejects_batch_containing_confirmed() {
        let store = temp_store();
        let role = Uuid::new_v4();
        let s1 = store
            .create_draft(role, SnapshotSource::AiInitial, None)
            .await
            .unwrap();
        let s2 = store
            .create_draft(role, SnapshotSource::Manual, None)
            .await
            .unwrap();
        store.confirm_snapshot(s2).await.unwrap();

        let err = store.delete_snapshots(&[s1, s2]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // Nothing was deleted
        assert_eq!(store.list_snapshots(role, None).await.unwrap().len(), 2);

        assert_eq!(store.delete_snapshots(&[s1]).await.unwrap(), 1);
        assert_eq!(store.list_snapshots(role, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_scores() {
        let store = temp_store();
        let axes = seed_axes(&store, &["a"]).await;
        let role = Uuid::new_v4();
        let snap = store
            .create_draft(role, SnapshotSource::AiInitial, None)
            .await
            .unwrap();
        store
            .replace_scores(snap, &[entry("a", 70)], &axes)
            .await
            .unwrap();

        store.delete_snapshots(&[snap]).await.unwrap();
        assert!(store.get_scores(snap).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn has_confirmed_gates_publish() {
        let store = temp_store();
        let role = Uuid::new_v4();
        assert!(!store.has_confirmed(role).await.unwrap());

        let snap = store
            .create_draft(role, SnapshotSource::AiInitial, None)
            .await
            .unwrap();
        assert!(!store.has_confirmed(role).await.unwrap());

        store.confirm_snapshot(snap).await.unwrap();
        assert!(store.has_confirmed(role).await.unwrap());
    }

    #[tokio::test]
    async fn thread_roundtrip() {
        let store = temp_store();
        let role = Uuid::new_v4();
        let thread = store.ensure_thread(role, None, None).await.unwrap();
        // Reusing an existing id returns it untouched
        assert_eq!(
            store.ensure_thread(role, None, Some(thread)).await.unwrap(),
            thread
        );

        store
            .append_messages(
                thread,
                &[
                    ("user".to_string(), "raise teamwork".to_string()),
                    ("assistant".to_string(), "done".to_string()),
                ],
            )
            .await
            .unwrap();

        let messages = store.thread_messages(thread).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].content, "done");
    }

    #[tokio::test]
    async fn latest_snapshot_and_draft() {
        let store = temp_store();
        let role = Uuid::new_v4();
        let s1 = store
            .create_draft(role, SnapshotSource::AiInitial, None)
            .await
            .unwrap();
        store.confirm_snapshot(s1).await.unwrap();
        let s2 = store
            .create_draft(role, SnapshotSource::AiChat, None)
            .await
            .unwrap();

        assert_eq!(store.latest_snapshot(role).await.unwrap().unwrap().id, s2);
        assert_eq!(store.latest_draft(role).await.unwrap().unwrap().id, s2);

        store.confirm_snapshot(s2).await.unwrap();
        // s1 was demoted back to draft, so it is the newest draft again
        assert_eq!(store.latest_draft(role).await.unwrap().unwrap().id, s1);
    }
}
