//! In-process session store.
//!
//! Backs tests and store-less development; state lives in lock-protected
//! maps and dies with the process. Semantics mirror [`SqliteStore`]
//! (upsert preserves `created_at`, deleting a session deletes its runs,
//! `SessionNotFound` is distinguished).
//!
//! [`SqliteStore`]: super::SqliteStore

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::{
    AgentRun, KnowledgePage, KnowledgeRow, SessionRecord, SessionStore, StoreMode, StoreResult,
    now_epoch, page_rows,
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, SessionRecord>,
    runs: HashMap<String, AgentRun>,
    knowledge: HashMap<String, KnowledgeRow>,
}

/// In-memory [`SessionStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    mode: StoreMode,
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create an empty store in the given mode.
    #[must_use]
    pub fn new(mode: StoreMode) -> Self {
        Self {
            mode,
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// Number of stored sessions.
    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    /// Number of stored runs.
    pub async fn run_count(&self) -> usize {
        self.tables.read().await.runs.len()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn mode(&self) -> StoreMode {
        self.mode
    }

    async fn create_session(&self, session: &SessionRecord) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn read_session(&self, session_id: &str) -> StoreResult<SessionRecord> {
        self.tables
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_owned()))
    }

    async fn update_session(&self, session: &SessionRecord) -> StoreResult<SessionRecord> {
        let mut tables = self.tables.write().await;
        let mut stamped = session.clone();
        if let Some(existing) = tables.sessions.get(&session.session_id) {
            stamped.created_at = existing.created_at;
            stamped.updated_at = stamped
                .updated_at
                .max(existing.updated_at)
                .max(now_epoch());
        } else {
            stamped.updated_at = stamped.updated_at.max(now_epoch());
        }
        tables
            .sessions
            .insert(stamped.session_id.clone(), stamped.clone());
        Ok(stamped)
    }

    async fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.remove(session_id);
        tables.runs.retain(|_, run| run.session_id != session_id);
        Ok(())
    }

    async fn get_all_session_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .get_all_sessions(user_id)
            .await?
            .into_iter()
            .map(|s| s.session_id)
            .collect())
    }

    async fn get_all_sessions(&self, user_id: &str) -> StoreResult<Vec<SessionRecord>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<SessionRecord> = tables
            .sessions
            .values()
            .filter(|s| s.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn create_run(&self, run: &AgentRun) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .runs
            .insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn read_run(&self, run_id: &str) -> StoreResult<AgentRun> {
        self.tables
            .read()
            .await
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_owned()))
    }

    async fn update_run(&self, run: &AgentRun) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.runs.contains_key(&run.id) {
            return Err(StoreError::RunNotFound(run.id.clone()));
        }
        let mut stamped = run.clone();
        stamped.updated_at = chrono::Utc::now();
        tables.runs.insert(stamped.id.clone(), stamped);
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> StoreResult<()> {
        self.tables.write().await.runs.remove(run_id);
        Ok(())
    }

    async fn get_runs_for_session(&self, session_id: &str) -> StoreResult<Vec<AgentRun>> {
        let tables = self.tables.read().await;
        let mut runs: Vec<AgentRun> = tables
            .runs
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn get_knowledge(&self, id: &str) -> StoreResult<KnowledgeRow> {
        self.tables
            .read()
            .await
            .knowledge
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::KnowledgeNotFound(id.to_owned()))
    }

    async fn get_all_knowledge(&self, page: KnowledgePage) -> StoreResult<Vec<KnowledgeRow>> {
        let rows: Vec<KnowledgeRow> = self.tables.read().await.knowledge.values().cloned().collect();
        Ok(page_rows(rows, page))
    }

    async fn upsert_knowledge(&self, row: &KnowledgeRow) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let mut stamped = row.clone();
        if let Some(existing) = tables.knowledge.get(&row.id) {
            stamped.created_at = existing.created_at;
            stamped.updated_at = stamped
                .updated_at
                .max(existing.updated_at)
                .max(now_epoch());
        }
        tables.knowledge.insert(stamped.id.clone(), stamped);
        Ok(())
    }

    async fn delete_knowledge(&self, id: &str) -> StoreResult<()> {
        self.tables.write().await.knowledge.remove(id);
        Ok(())
    }

    async fn create_tables(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn upgrade_schema(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn drop_tables(&self) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.clear();
        tables.runs.clear();
        tables.knowledge.clear();
        Ok(())
    }
}
