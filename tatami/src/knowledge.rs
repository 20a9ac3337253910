//! Knowledge retrieval — top-k semantic search behind an adapter.
//!
//! [`KnowledgeRetriever`] is consulted once per run before model invocation;
//! hits are injected into the system frame, truncated to
//! [`SNIPPET_LIMIT`] code units. Vector databases live behind this trait;
//! [`InMemoryRetriever`] ships for tests and small corpora.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;

/// Default number of documents retrieved per run.
pub const DEFAULT_TOP_K: usize = 5;

/// Maximum snippet length injected into the prompt, in `char`s.
pub const SNIPPET_LIMIT: usize = 200;

/// A retrievable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: String,
    /// Document text.
    pub content: String,
    /// Arbitrary metadata bag.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a document stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A document with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    /// The matched document.
    pub document: Document,
    /// Relevance, higher is better.
    pub score: f64,
}

/// The retrieval adapter contract.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Top-`k` documents for a query, ordered by descending relevance.
    ///
    /// `filters` narrows the searched corpus; adapters that cannot filter
    /// may ignore it.
    async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<ScoredDocument>>;
}

/// A shared, thread-safe retriever.
pub type SharedRetriever = Arc<dyn KnowledgeRetriever>;

/// Truncate a snippet to [`SNIPPET_LIMIT`] chars, appending an ellipsis.
#[must_use]
pub fn truncate_snippet(content: &str) -> String {
    if content.chars().count() <= SNIPPET_LIMIT {
        return content.to_owned();
    }
    let mut truncated: String = content.chars().take(SNIPPET_LIMIT).collect();
    truncated.push('…');
    truncated
}

/// In-process retriever scoring by term overlap.
///
/// Scores are the fraction of query terms present in the document (case
/// insensitive). Good enough for tests and toy corpora; real deployments
/// put a vector store behind [`KnowledgeRetriever`].
#[derive(Clone, Default)]
pub struct InMemoryRetriever {
    documents: Arc<RwLock<Vec<Document>>>,
}

impl InMemoryRetriever {
    /// Create an empty retriever.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a retriever over the given documents.
    #[must_use]
    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents: Arc::new(RwLock::new(documents)),
        }
    }

    /// Add a document to the corpus.
    pub async fn add(&self, document: Document) {
        self.documents.write().await.push(document);
    }

    /// Number of documents in the corpus.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Returns `true` if the corpus is empty.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn matches_filters(document: &Document, filters: &HashMap<String, Value>) -> bool {
        filters
            .iter()
            .all(|(key, expected)| document.metadata.get(key) == Some(expected))
    }

    fn score(query_terms: &[String], content: &str) -> f64 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let haystack = content.to_lowercase();
        let hits = query_terms
            .iter()
            .filter(|term| haystack.contains(term.as_str()))
            .count();
        hits as f64 / query_terms.len() as f64
    }
}

impl std::fmt::Debug for InMemoryRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRetriever").finish_non_exhaustive()
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryRetriever {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<ScoredDocument>> {
        let query_terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();

        let documents = self.documents.read().await;
        let mut scored: Vec<ScoredDocument> = documents
            .iter()
            .filter(|doc| filters.is_none_or(|f| Self::matches_filters(doc, f)))
            .map(|doc| ScoredDocument {
                document: doc.clone(),
                score: Self::score(&query_terms, &doc.content),
            })
            .filter(|scored| scored.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn corpus() -> InMemoryRetriever {
        InMemoryRetriever::with_documents(vec![
            Document::new("d1", "Rust has fearless concurrency and ownership"),
            Document::new("d2", "Python emphasizes readability")
                .metadata("lang", json!("python")),
            Document::new("d3", "Rust ownership prevents data races")
                .metadata("lang", json!("rust")),
        ])
    }

    #[tokio::test]
    async fn search_orders_by_descending_score() {
        let retriever = corpus();
        let hits = retriever
            .search("rust ownership races", 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "d3");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn k_bounds_results() {
        let retriever = corpus();
        let hits = retriever.search("rust", 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn filters_narrow_the_corpus() {
        let retriever = corpus();
        let filters = HashMap::from([("lang".to_owned(), json!("rust"))]);
        let hits = retriever
            .search("ownership", 5, Some(&filters))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "d3");
    }

    #[tokio::test]
    async fn unmatched_query_returns_nothing() {
        let retriever = corpus();
        assert!(retriever.search("zig", 5, None).await.unwrap().is_empty());
    }

    #[test]
    fn truncate_appends_ellipsis() {
        let long = "x".repeat(SNIPPET_LIMIT + 50);
        let truncated = truncate_snippet(&long);
        assert_eq!(truncated.chars().count(), SNIPPET_LIMIT + 1);
        assert!(truncated.ends_with('…'));

        let short = "short snippet";
        assert_eq!(truncate_snippet(short), short);
    }
}
