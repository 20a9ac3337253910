//! User memories and session summaries.
//!
//! [`MemoryManager`] is an adapter contract; the runtime does not prescribe
//! how memories are distilled (an LLM, a heuristic, an external service).
//! Policy lives in the orchestrator: memory creation is best-effort (errors
//! are logged, never fatal), a session summary fires every fifth successful
//! run, and only the ten most recent memories are injected into the system
//! prompt.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::message::Message;

/// How many successful runs between session summaries.
pub const SUMMARY_INTERVAL: usize = 5;

/// How many memories the orchestrator injects into the system prompt.
pub const INJECTED_MEMORY_LIMIT: usize = 10;

/// One remembered fact about a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// The remembered content.
    pub content: String,
    /// Topic tags, if the manager extracts any.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Create a memory stamped with the current time.
    #[must_use]
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            topics: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// The memory adapter contract.
#[async_trait]
pub trait MemoryManager: Send + Sync {
    /// All memories for a user, oldest first.
    async fn get_user_memories(&self, user_id: &str) -> Result<Vec<Memory>>;

    /// Distill a memory from one exchange and store it.
    async fn create_memory(
        &self,
        user_id: &str,
        user_message: &str,
        agent_message: &str,
    ) -> Result<Memory>;

    /// Produce and store a summary of a session's conversation so far.
    async fn create_session_summary(
        &self,
        user_id: &str,
        session_id: &str,
        conversation: &[Message],
    ) -> Result<()>;
}

/// A shared, thread-safe memory manager.
pub type SharedMemoryManager = Arc<dyn MemoryManager>;

/// In-process [`MemoryManager`] that stores exchanges verbatim.
///
/// Useful for tests and small deployments; production systems typically put
/// an LLM-backed distiller behind the same trait.
#[derive(Clone, Default)]
pub struct InMemoryMemoryManager {
    memories: Arc<RwLock<HashMap<String, Vec<Memory>>>>,
    summaries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryMemoryManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the stored summary for a session, if one was produced.
    pub async fn session_summary(&self, session_id: &str) -> Option<String> {
        self.summaries.read().await.get(session_id).cloned()
    }
}

impl std::fmt::Debug for InMemoryMemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMemoryManager").finish_non_exhaustive()
    }
}

#[async_trait]
impl MemoryManager for InMemoryMemoryManager {
    async fn get_user_memories(&self, user_id: &str) -> Result<Vec<Memory>> {
        Ok(self
            .memories
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_memory(
        &self,
        user_id: &str,
        user_message: &str,
        _agent_message: &str,
    ) -> Result<Memory> {
        let memory = Memory::new(user_id, user_message);
        self.memories
            .write()
            .await
            .entry(user_id.to_owned())
            .or_default()
            .push(memory.clone());
        Ok(memory)
    }

    async fn create_session_summary(
        &self,
        _user_id: &str,
        session_id: &str,
        conversation: &[Message],
    ) -> Result<()> {
        let summary = conversation
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.summaries
            .write()
            .await
            .insert(session_id.to_owned(), summary);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memories_accumulate_per_user() {
        let manager = InMemoryMemoryManager::new();
        manager.create_memory("u-1", "likes tea", "noted").await.unwrap();
        manager.create_memory("u-1", "lives in Kyoto", "ok").await.unwrap();
        manager.create_memory("u-2", "likes coffee", "ok").await.unwrap();

        let memories = manager.get_user_memories("u-1").await.unwrap();
        assert_eq!(memories.len(), 2);
        assert_eq!(memories[0].content, "likes tea");
        assert_eq!(manager.get_user_memories("u-3").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn summary_covers_conversation() {
        let manager = InMemoryMemoryManager::new();
        let conversation = vec![Message::user("hi"), Message::assistant("hello")];
        manager
            .create_session_summary("u-1", "s-1", &conversation)
            .await
            .unwrap();

        let summary = manager.session_summary("s-1").await.unwrap();
        assert!(summary.contains("user: hi"));
        assert!(summary.contains("assistant: hello"));
    }
}
