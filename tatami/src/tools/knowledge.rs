//! Knowledge search and ingestion tools.

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::ToolError;
use crate::knowledge::{DEFAULT_TOP_K, SharedRetriever, truncate_snippet};
use crate::schema::{SchemaField, TypeSchema};
use crate::store::{KnowledgeRow, KnowledgeStatus, SharedSessionStore};
use crate::tool::{ToolMethod, ToolResult, Toolkit};

/// Lets the model search the knowledge base and register new documents.
#[derive(Clone)]
pub struct KnowledgeTools {
    retriever: Option<SharedRetriever>,
    store: Option<SharedSessionStore>,
}

impl KnowledgeTools {
    /// Create over the agent's retriever and store handles.
    #[must_use]
    pub fn new(retriever: Option<SharedRetriever>, store: Option<SharedSessionStore>) -> Self {
        Self { retriever, store }
    }

    async fn search(&self, args: &Value) -> ToolResult<Value> {
        let Some(retriever) = &self.retriever else {
            return Err(ToolError::execution(
                "knowledge",
                "no retriever configured",
            ));
        };
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let k = args
            .get("k")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_TOP_K, |k| usize::try_from(k).unwrap_or(DEFAULT_TOP_K));

        let hits = retriever
            .search(query, k, None)
            .await
            .map_err(|e| ToolError::execution("knowledge", e.to_string()))?;

        Ok(Value::Array(
            hits.into_iter()
                .map(|hit| {
                    json!({
                        "id": hit.document.id,
                        "snippet": truncate_snippet(&hit.document.content),
                        "score": hit.score,
                    })
                })
                .collect(),
        ))
    }

    async fn add(&self, args: &Value) -> ToolResult<Value> {
        let Some(store) = &self.store else {
            return Err(ToolError::execution("knowledge", "no store configured"));
        };
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut row = KnowledgeRow::new(Uuid::new_v4().to_string(), name);
        row.description = description.to_owned();
        row.status = KnowledgeStatus::Ready;
        if let Some(metadata) = args.get("metadata") {
            row.metadata = Some(metadata.clone());
        }

        store
            .upsert_knowledge(&row)
            .await
            .map_err(|e| ToolError::execution("knowledge", e.to_string()))?;

        Ok(json!({"id": row.id, "status": row.status.as_str()}))
    }
}

impl std::fmt::Debug for KnowledgeTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeTools")
            .field("retriever", &self.retriever.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

#[async_trait]
impl Toolkit for KnowledgeTools {
    fn name(&self) -> &str {
        "knowledge"
    }

    fn methods(&self) -> Vec<ToolMethod> {
        vec![
            ToolMethod::new(
                "search",
                "Search the knowledge base for relevant documents.",
                TypeSchema::object(vec![
                    SchemaField::new("query", TypeSchema::string().min_len(1))
                        .description("What to look for"),
                    SchemaField::new("k", TypeSchema::integer().min(1.0))
                        .description("How many documents to return")
                        .optional(),
                ]),
            ),
            ToolMethod::new(
                "add",
                "Register a new document in the knowledge base.",
                TypeSchema::object(vec![
                    SchemaField::new("name", TypeSchema::string().min_len(1))
                        .description("Display name for the document"),
                    SchemaField::new("description", TypeSchema::string())
                        .description("What the document contains")
                        .optional(),
                    SchemaField::new("metadata", TypeSchema::object(vec![]))
                        .description("Arbitrary metadata to attach")
                        .optional(),
                ]),
            ),
        ]
    }

    async fn execute(&self, method: &str, args: Value) -> ToolResult<Value> {
        match method {
            "search" => self.search(&args).await,
            "add" => self.add(&args).await,
            other => Err(ToolError::not_found(other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::knowledge::{Document, InMemoryRetriever};
    use crate::store::{InMemoryStore, KnowledgePage, SessionStore, StoreMode};
    use std::sync::Arc;

    #[tokio::test]
    async fn search_returns_truncated_snippets() {
        let retriever = InMemoryRetriever::with_documents(vec![Document::new(
            "d1",
            "tokio ".repeat(100),
        )]);
        let tools = KnowledgeTools::new(Some(Arc::new(retriever)), None);

        let result = tools
            .execute("search", json!({"query": "tokio", "k": 1}))
            .await
            .unwrap();
        let hits = result.as_array().unwrap();
        assert_eq!(hits.len(), 1);
        let snippet = hits[0]["snippet"].as_str().unwrap();
        assert!(snippet.chars().count() <= crate::knowledge::SNIPPET_LIMIT + 1);
        assert!(snippet.ends_with('…'));
    }

    #[tokio::test]
    async fn add_upserts_a_ready_row() {
        let store = Arc::new(InMemoryStore::new(StoreMode::Agent));
        let tools = KnowledgeTools::new(None, Some(store.clone()));

        let result = tools
            .execute(
                "add",
                json!({"name": "handbook", "description": "employee handbook"}),
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "ready");

        let rows = store.get_all_knowledge(KnowledgePage::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "handbook");
    }

    #[tokio::test]
    async fn unconfigured_handles_error_cleanly() {
        let tools = KnowledgeTools::new(None, None);
        assert!(tools.execute("search", json!({"query": "x"})).await.is_err());
        assert!(tools.execute("add", json!({"name": "x"})).await.is_err());
    }
}
