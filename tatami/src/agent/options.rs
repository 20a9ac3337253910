//! Per-call run options.

use std::collections::HashMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A media attachment forwarded to the model adapter via request metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Media {
    pub kind: &'static str,
    pub items: Vec<String>,
}

/// Per-call overrides and toggles for [`Agent::run`](super::Agent::run).
///
/// Every override is an `Option`, so an explicit zero value stays
/// distinguishable from "not set" — `None` falls back to the agent's
/// construction-time configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Override the user identity for this call.
    pub user_id: Option<String>,
    /// Override the session for this call.
    pub session_id: Option<String>,
    /// Extra session state merged into the shared state map before the run.
    pub session_state: Option<HashMap<String, Value>>,
    /// Override the model retry budget for this call.
    pub retries: Option<usize>,
    /// Filters forwarded to the knowledge retriever.
    pub knowledge_filters: Option<HashMap<String, Value>>,
    /// Metadata forwarded to the model adapter.
    pub metadata: Option<HashMap<String, Value>>,
    /// Include reconstructed history in the context.
    pub add_history_to_context: Option<bool>,
    /// Include a resolved-dependencies frame in the context.
    pub add_dependencies_to_context: Option<bool>,
    /// Include a session-state frame in the context.
    pub add_session_state_to_context: Option<bool>,
    /// Dependency values materialized for this call only.
    pub dependencies: Option<HashMap<String, Value>>,
    /// Emit lifecycle events (tool calls, run start/end) during streaming.
    pub stream_events: bool,
    /// Verbose diagnostic logging for this call.
    pub debug_mode: Option<bool>,
    /// External cancellation token; cancel it to abort the run.
    pub cancellation: Option<CancellationToken>,
    pub(crate) media: Vec<Media>,
}

impl RunOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user id.
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Merges extra session state into the run.
    #[must_use]
    pub fn session_state(mut self, state: HashMap<String, Value>) -> Self {
        self.session_state = Some(state);
        self
    }

    /// Overrides the model retry budget.
    #[must_use]
    pub const fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets knowledge filters.
    #[must_use]
    pub fn knowledge_filters(mut self, filters: HashMap<String, Value>) -> Self {
        self.knowledge_filters = Some(filters);
        self
    }

    /// Sets adapter metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Toggles history injection.
    #[must_use]
    pub const fn add_history_to_context(mut self, enabled: bool) -> Self {
        self.add_history_to_context = Some(enabled);
        self
    }

    /// Toggles the dependencies frame.
    #[must_use]
    pub const fn add_dependencies_to_context(mut self, enabled: bool) -> Self {
        self.add_dependencies_to_context = Some(enabled);
        self
    }

    /// Toggles the session-state frame.
    #[must_use]
    pub const fn add_session_state_to_context(mut self, enabled: bool) -> Self {
        self.add_session_state_to_context = Some(enabled);
        self
    }

    /// Sets per-call dependency values.
    #[must_use]
    pub fn dependencies(mut self, dependencies: HashMap<String, Value>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    /// Emits lifecycle events during streaming.
    #[must_use]
    pub const fn stream_events(mut self, enabled: bool) -> Self {
        self.stream_events = enabled;
        self
    }

    /// Toggles verbose diagnostics.
    #[must_use]
    pub const fn debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = Some(enabled);
        self
    }

    /// Attach an external cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Attach audio inputs (urls or base64 payloads).
    #[must_use]
    pub fn audio(mut self, items: Vec<String>) -> Self {
        self.media.push(Media {
            kind: "audio",
            items,
        });
        self
    }

    /// Attach image inputs.
    #[must_use]
    pub fn images(mut self, items: Vec<String>) -> Self {
        self.media.push(Media {
            kind: "images",
            items,
        });
        self
    }

    /// Attach video inputs.
    #[must_use]
    pub fn videos(mut self, items: Vec<String>) -> Self {
        self.media.push(Media {
            kind: "videos",
            items,
        });
        self
    }

    /// Attach file inputs.
    #[must_use]
    pub fn files(mut self, items: Vec<String>) -> Self {
        self.media.push(Media {
            kind: "files",
            items,
        });
        self
    }
}
