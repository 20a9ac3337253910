//! Durable session, run, and knowledge storage.
//!
//! [`SessionStore`] is the persistence boundary: sessions (mutable bags keyed
//! by session id), runs (immutable records of one user turn each), and
//! knowledge rows (document descriptors). [`SqliteStore`] persists to SQLite;
//! [`InMemoryStore`] backs tests and store-less development.
//!
//! # Modes
//!
//! A store operates in one [`StoreMode`]; the mode decides which
//! mode-specific columns and indices the session table carries. Deleting a
//! session deletes its runs. Upserts preserve `created_at`; `updated_at`
//! never decreases.

mod in_memory;
mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::message::Message;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Which flavor of session table the store manages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Single-agent sessions (`agent_id`, `agent_data`, `team_session_id`).
    #[default]
    Agent,
    /// Team sessions (`team_id`, `team_data`, `team_session_id`).
    Team,
    /// Workflow sessions (`workflow_id`, `workflow_data`).
    Workflow,
    /// Second-generation workflow sessions (adds `workflow_name`, `runs`).
    WorkflowV2,
}

impl StoreMode {
    /// Stable string form, used in table naming and diagnostics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Team => "team",
            Self::Workflow => "workflow",
            Self::WorkflowV2 => "workflow_v2",
        }
    }
}

/// Seconds since the Unix epoch; the unit for session-table timestamps.
#[must_use]
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// A mutable session bag.
///
/// Base fields are always present; mode-specific fields are populated only
/// under the matching [`StoreMode`]. JSON bag fields round-trip as canonical
/// JSON text in persistent stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Primary key.
    pub session_id: String,
    /// Owning user, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// User-memory bag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<Value>,
    /// Session-scoped data; `session_data.session_state` holds agentic state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_data: Option<Value>,
    /// Free-form extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<Value>,
    /// Agent id (agent mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Agent-scoped data (agent mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_data: Option<Value>,
    /// Team id (team mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Team-scoped data (team mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_data: Option<Value>,
    /// Parent team session (agent and team modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_session_id: Option<String>,
    /// Workflow id (workflow modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Workflow name (workflow v2 mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    /// Workflow-scoped data (workflow modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_data: Option<Value>,
    /// Embedded runs payload (workflow v2 mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs: Option<Value>,
    /// Creation time, epoch seconds. Preserved across upserts.
    pub created_at: i64,
    /// Last write time, epoch seconds. Monotonically non-decreasing.
    pub updated_at: i64,
}

impl SessionRecord {
    /// Create a minimal record for a new session.
    #[must_use]
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = now_epoch();
        Self {
            session_id: session_id.into(),
            user_id,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// Read the agentic session state out of `session_data.session_state`.
    #[must_use]
    pub fn session_state(&self) -> Option<&Value> {
        self.session_data.as_ref()?.get("session_state")
    }

    /// Write the agentic session state into `session_data.session_state`.
    pub fn set_session_state(&mut self, state: Value) {
        match &mut self.session_data {
            Some(Value::Object(map)) => {
                map.insert("session_state".into(), state);
            }
            _ => {
                self.session_data = Some(serde_json::json!({ "session_state": state }));
            }
        }
    }
}

/// An immutable record of one user turn.
///
/// Created after a successful model turn; only `updated_at` may be
/// backfilled later (late metrics). Timestamps are RFC 3339 in persistent
/// stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    /// Primary key.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Owning user, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Optional run label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    /// Free-form run payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_data: Option<Value>,
    /// The raw user input of the turn.
    pub user_message: String,
    /// The final assistant content of the turn.
    pub agent_message: String,
    /// Every message of the turn, in order.
    pub messages: Vec<Message>,
    /// Metrics payload (token usage, durations).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl AgentRun {
    /// Create a run record stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        agent_message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            session_id: session_id.into(),
            user_id: None,
            run_name: None,
            run_data: None,
            user_message: user_message.into(),
            agent_message: agent_message.into(),
            messages: Vec::new(),
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle state of a knowledge row. Transitions are monotonic toward a
/// terminal state per ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeStatus {
    /// Ingestion in progress.
    #[default]
    Processing,
    /// Available for retrieval.
    Ready,
    /// Ingestion failed.
    Failed,
}

impl KnowledgeStatus {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored string form.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text {
            "ready" => Self::Ready,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }
}

/// A persistent document descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRow {
    /// Primary key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Arbitrary metadata bag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Document type (mime-ish tag).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// Size in bytes, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Id of a related row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_to: Option<String>,
    /// Number of retrieval hits.
    #[serde(default)]
    pub access_count: i64,
    /// Ingestion status.
    #[serde(default)]
    pub status: KnowledgeStatus,
    /// Detail accompanying the status (e.g. a failure reason).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Creation time, epoch seconds.
    pub created_at: i64,
    /// Last write time, epoch seconds.
    pub updated_at: i64,
    /// Identifier in an external system (vector DB, object store).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl KnowledgeRow {
    /// Create a row stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_epoch();
        Self {
            id: id.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }
}

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    #[default]
    Desc,
}

impl SortOrder {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Paged listing request for knowledge rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnowledgePage {
    /// Page size; `None` means everything.
    pub limit: Option<usize>,
    /// 1-indexed page number; `None` means the first page.
    pub page: Option<usize>,
    /// Column to sort by; validated against an allowlist.
    pub sort_by: Option<KnowledgeSort>,
    /// Sort direction.
    pub sort_order: SortOrder,
}

/// Allowed sort columns for knowledge listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnowledgeSort {
    /// Sort by creation time.
    CreatedAt,
    /// Sort by last write time.
    UpdatedAt,
    /// Sort by display name.
    Name,
    /// Sort by retrieval hit count.
    AccessCount,
}

impl KnowledgeSort {
    const fn as_column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Name => "name",
            Self::AccessCount => "access_count",
        }
    }
}

/// The persistence boundary for sessions, runs, and knowledge rows.
///
/// Implementations serialize writes per session internally; readers may be
/// concurrent. `read_session` on an unknown id fails with the distinguished
/// [`StoreError::SessionNotFound`], which the orchestrator recovers from by
/// creating a fresh session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The mode this store was created for.
    fn mode(&self) -> StoreMode;

    /// Insert a new session.
    async fn create_session(&self, session: &SessionRecord) -> StoreResult<()>;

    /// Read a session by id.
    async fn read_session(&self, session_id: &str) -> StoreResult<SessionRecord>;

    /// Upsert a session. `created_at` of an existing row is preserved;
    /// `updated_at` never decreases.
    async fn update_session(&self, session: &SessionRecord) -> StoreResult<SessionRecord>;

    /// Delete a session and its runs.
    async fn delete_session(&self, session_id: &str) -> StoreResult<()>;

    /// All session ids belonging to a user, newest first.
    async fn get_all_session_ids(&self, user_id: &str) -> StoreResult<Vec<String>>;

    /// All sessions belonging to a user, newest first.
    async fn get_all_sessions(&self, user_id: &str) -> StoreResult<Vec<SessionRecord>>;

    /// Insert a run record.
    async fn create_run(&self, run: &AgentRun) -> StoreResult<()>;

    /// Read a run by id.
    async fn read_run(&self, run_id: &str) -> StoreResult<AgentRun>;

    /// Update a run record (late metrics backfill bumps `updated_at`).
    async fn update_run(&self, run: &AgentRun) -> StoreResult<()>;

    /// Delete a run by id.
    async fn delete_run(&self, run_id: &str) -> StoreResult<()>;

    /// All runs of a session, ordered by `created_at` ascending.
    async fn get_runs_for_session(&self, session_id: &str) -> StoreResult<Vec<AgentRun>>;

    /// Read a knowledge row by id.
    async fn get_knowledge(&self, id: &str) -> StoreResult<KnowledgeRow>;

    /// List knowledge rows with paging and sorting.
    async fn get_all_knowledge(&self, page: KnowledgePage) -> StoreResult<Vec<KnowledgeRow>>;

    /// Upsert a knowledge row, preserving `created_at`.
    async fn upsert_knowledge(&self, row: &KnowledgeRow) -> StoreResult<()>;

    /// Delete a knowledge row by id.
    async fn delete_knowledge(&self, id: &str) -> StoreResult<()>;

    /// Create all tables and indices for the store's mode.
    async fn create_tables(&self) -> StoreResult<()>;

    /// Additively upgrade an existing schema to the current layout.
    /// Columns are only ever added, never dropped.
    async fn upgrade_schema(&self) -> StoreResult<()>;

    /// Drop every table this store manages.
    async fn drop_tables(&self) -> StoreResult<()>;
}

/// A shared, thread-safe session store.
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Sort + page a knowledge listing in memory (shared by backends that load
/// eagerly, and a reference for SQL backends).
fn page_rows(mut rows: Vec<KnowledgeRow>, page: KnowledgePage) -> Vec<KnowledgeRow> {
    let sort = page.sort_by.unwrap_or(KnowledgeSort::CreatedAt);
    rows.sort_by(|a, b| {
        let ordering = match sort {
            KnowledgeSort::CreatedAt => a.created_at.cmp(&b.created_at),
            KnowledgeSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            KnowledgeSort::Name => a.name.cmp(&b.name),
            KnowledgeSort::AccessCount => a.access_count.cmp(&b.access_count),
        };
        match page.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });

    let limit = page.limit.unwrap_or(usize::MAX);
    let offset = page.page.map_or(0, |p| p.saturating_sub(1)) * page.limit.unwrap_or(0);
    rows.into_iter().skip(offset).take(limit).collect()
}

/// Helpers shared between backends for JSON blob columns.
fn to_json_text(value: &Option<Value>) -> StoreResult<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(StoreError::from))
        .transpose()
}

fn from_json_text(text: Option<String>) -> StoreResult<Option<Value>> {
    text.map(|t| serde_json::from_str(&t).map_err(StoreError::from))
        .transpose()
}

fn messages_to_text(messages: &[Message]) -> StoreResult<String> {
    serde_json::to_string(messages).map_err(StoreError::from)
}

fn messages_from_text(text: &str) -> StoreResult<Vec<Message>> {
    serde_json::from_str(text).map_err(StoreError::from)
}

/// Session-state map helpers used by the orchestrator.
pub(crate) fn state_map_to_value(map: &HashMap<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}
