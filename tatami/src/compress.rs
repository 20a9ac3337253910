//! Semantic compression of oversized prompt fragments.
//!
//! When a context fragment's token estimate exceeds the configured budget,
//! a secondary model rewrites it into an ultra-concise equivalent that keeps
//! facts and identifiers. Any failure leaves the original fragment
//! unchanged — compression is an optimization, never a correctness risk.

use tracing::{debug, warn};

use crate::callback::RunContext;
use crate::message::Message;
use crate::model::{InvokeRequest, SharedModelProvider};

const COMPRESS_INSTRUCTIONS: &str = "Rewrite the following content as an ultra-concise \
equivalent. Preserve every fact, identifier, number, and proper name. Do not add \
commentary. Output only the rewritten content.";

/// Rough token estimate: one token per four chars, rounded up.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Shrinks oversized fragments through a secondary model.
#[derive(Clone)]
pub struct SemanticCompressor {
    provider: SharedModelProvider,
    max_tokens: usize,
}

impl SemanticCompressor {
    /// Create a compressor with the given provider and token budget.
    #[must_use]
    pub fn new(provider: SharedModelProvider, max_tokens: usize) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }

    /// The configured per-fragment token budget.
    #[must_use]
    pub const fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Returns `true` if a fragment exceeds the budget.
    #[must_use]
    pub fn is_oversized(&self, fragment: &str) -> bool {
        estimate_tokens(fragment) > self.max_tokens
    }

    /// Compress a fragment if oversized; otherwise return it unchanged.
    ///
    /// Errors from the secondary model leave the fragment unchanged.
    pub async fn compress(&self, ctx: &RunContext, fragment: &str) -> String {
        if !self.is_oversized(fragment) {
            return fragment.to_owned();
        }

        let request = InvokeRequest::with_messages(vec![
            Message::system(COMPRESS_INSTRUCTIONS),
            Message::user(fragment),
        ]);

        match self.provider.invoke(ctx, &request).await {
            Ok(response) if !response.text().trim().is_empty() => {
                debug!(
                    original_tokens = estimate_tokens(fragment),
                    compressed_tokens = estimate_tokens(response.text()),
                    "fragment compressed",
                );
                response.text().to_owned()
            }
            Ok(_) => fragment.to_owned(),
            Err(e) => {
                warn!(error = %e, "semantic compression failed, keeping original");
                fragment.to_owned()
            }
        }
    }
}

impl std::fmt::Debug for SemanticCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCompressor")
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use std::sync::Arc;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[tokio::test]
    async fn small_fragments_pass_through() {
        let provider = Arc::new(MockProvider::with_text_responses(["unused"]));
        let compressor = SemanticCompressor::new(provider.clone(), 100);

        let fragment = "short note";
        let out = compressor.compress(&RunContext::new(), fragment).await;
        assert_eq!(out, fragment);
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn oversized_fragments_are_rewritten() {
        let provider = Arc::new(MockProvider::with_text_responses(["tiny summary"]));
        let compressor = SemanticCompressor::new(provider, 4);

        let fragment = "a very long fragment that easily exceeds four tokens of budget";
        let out = compressor.compress(&RunContext::new(), fragment).await;
        assert_eq!(out, "tiny summary");
    }

    #[tokio::test]
    async fn failures_keep_the_original() {
        let provider = Arc::new(MockProvider::failing("model offline"));
        let compressor = SemanticCompressor::new(provider, 1);

        let fragment = "original stays when the compressor model errors out";
        let out = compressor.compress(&RunContext::new(), fragment).await;
        assert_eq!(out, fragment);
    }
}
