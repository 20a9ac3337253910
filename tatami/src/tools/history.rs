//! Chat and tool-call history tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::message::Message;
use crate::schema::{SchemaField, TypeSchema};
use crate::tool::executor::ToolCallOutcome;
use crate::tool::{ToolMethod, ToolResult, Toolkit};

/// Shared in-memory message history handle.
pub type SharedHistory = Arc<RwLock<Vec<Message>>>;

/// Shared tool-call history handle.
pub type SharedToolCallLog = Arc<RwLock<Vec<ToolCallOutcome>>>;

const DEFAULT_LIMIT: usize = 20;

/// Lets the model read and search the conversation so far, and inspect
/// past tool calls.
#[derive(Clone)]
pub struct HistoryTools {
    history: SharedHistory,
    tool_calls: SharedToolCallLog,
}

impl HistoryTools {
    /// Create over the agent's shared history handles.
    #[must_use]
    pub fn new(history: SharedHistory, tool_calls: SharedToolCallLog) -> Self {
        Self {
            history,
            tool_calls,
        }
    }

    fn limit_arg(args: &Value) -> usize {
        args.get("limit")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_LIMIT, |l| usize::try_from(l).unwrap_or(usize::MAX))
    }

    async fn read(&self, args: &Value) -> Value {
        let limit = Self::limit_arg(args);
        let history = self.history.read().await;
        let tail: Vec<Value> = history
            .iter()
            .rev()
            .take(limit)
            .rev()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        Value::Array(tail)
    }

    async fn search(&self, args: &Value) -> Value {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let limit = Self::limit_arg(args);
        let history = self.history.read().await;
        let hits: Vec<Value> = history
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&query))
            .take(limit)
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        Value::Array(hits)
    }

    async fn read_tool_calls(&self, args: &Value) -> Value {
        let limit = Self::limit_arg(args);
        let calls = self.tool_calls.read().await;
        let tail: Vec<Value> = calls
            .iter()
            .rev()
            .take(limit)
            .rev()
            .map(|outcome| {
                json!({
                    "tool": outcome.tool,
                    "method": outcome.method,
                    "args": outcome.args,
                    "success": outcome.success,
                    "result": outcome.result,
                    "error": outcome.error,
                })
            })
            .collect();
        Value::Array(tail)
    }
}

impl std::fmt::Debug for HistoryTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryTools").finish_non_exhaustive()
    }
}

#[async_trait]
impl Toolkit for HistoryTools {
    fn name(&self) -> &str {
        "history"
    }

    fn methods(&self) -> Vec<ToolMethod> {
        let limit_field = || {
            SchemaField::new("limit", TypeSchema::integer().min(1.0))
                .description("Maximum number of entries to return")
                .optional()
        };
        vec![
            ToolMethod::new(
                "read",
                "Read the most recent messages of this conversation.",
                TypeSchema::object(vec![limit_field()]),
            ),
            ToolMethod::new(
                "search",
                "Search this conversation's messages for a text fragment.",
                TypeSchema::object(vec![
                    SchemaField::new("query", TypeSchema::string().min_len(1))
                        .description("Text to look for"),
                    limit_field(),
                ]),
            ),
            ToolMethod::new(
                "read_tool_calls",
                "Read the most recent tool calls made in this session.",
                TypeSchema::object(vec![limit_field()]),
            ),
        ]
    }

    async fn execute(&self, method: &str, args: Value) -> ToolResult<Value> {
        match method {
            "read" => Ok(self.read(&args).await),
            "search" => Ok(self.search(&args).await),
            "read_tool_calls" => Ok(self.read_tool_calls(&args).await),
            other => Err(crate::error::ToolError::not_found(other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn seeded() -> HistoryTools {
        let history = Arc::new(RwLock::new(vec![
            Message::user("what is rust"),
            Message::assistant("a systems language"),
            Message::user("and tokio?"),
        ]));
        HistoryTools::new(history, Arc::new(RwLock::new(Vec::new())))
    }

    #[tokio::test]
    async fn read_returns_recent_messages() {
        let tools = seeded();
        let result = tools
            .execute("read", json!({"limit": 2}))
            .await
            .unwrap();
        let entries = result.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["content"], "and tokio?");
    }

    #[tokio::test]
    async fn search_filters_by_fragment() {
        let tools = seeded();
        let result = tools
            .execute("search", json!({"query": "rust"}))
            .await
            .unwrap();
        let entries = result.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["role"], "user");
    }

    #[tokio::test]
    async fn methods_register_canonically() {
        let mut toolbox = crate::tool::ToolBox::new();
        toolbox.add_toolkit(seeded());
        assert!(toolbox.contains("history_read"));
        assert!(toolbox.contains("history_search"));
        assert!(toolbox.contains("history_read_tool_calls"));
    }
}
