//! Per-run context threaded through every suspension point.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::usage::Usage;

/// Shared, lockable session-state map.
pub type SharedState = Arc<RwLock<HashMap<String, Value>>>;

/// Context passed to hooks, guardrails, tools and model adapters during a run.
///
/// Cloning is cheap: the cancellation token and state map are shared handles,
/// while usage and step counters copy with the clone. Only the orchestrator
/// that owns the context mutates usage and step; everything else observes.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Cooperative cancellation for the whole run.
    cancel: CancellationToken,
    /// Cumulative token usage across all model calls in this run.
    usage: Usage,
    /// Current step number (1-indexed during execution, 0 before start).
    step: usize,
    /// Name of the agent driving this run.
    agent_name: Option<String>,
    /// Set while a reasoning pass is active, to forbid reentrant planning.
    reasoning: bool,
    /// Agentic session state shared with the default tools.
    state: SharedState,
}

impl RunContext {
    /// Create a new empty run context with a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent name.
    #[must_use]
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Use an externally owned cancellation token.
    ///
    /// Callers cancel the run by cancelling this token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share an existing session-state map.
    #[must_use]
    pub fn with_state(mut self, state: SharedState) -> Self {
        self.state = state;
        self
    }

    /// Derive a context for a reasoning pass. Reasoners refuse to run when
    /// [`is_reasoning`](Self::is_reasoning) is already set.
    #[must_use]
    pub fn for_reasoning(&self) -> Self {
        let mut child = self.clone();
        child.reasoning = true;
        child
    }

    /// Returns `true` if this context belongs to a reasoning pass.
    #[must_use]
    pub const fn is_reasoning(&self) -> bool {
        self.reasoning
    }

    /// The cancellation token for this run.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Completes when the run is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Get the cumulative token usage.
    #[must_use]
    pub const fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Add usage from a completed model call.
    pub fn add_usage(&mut self, usage: Usage) {
        self.usage += usage;
    }

    /// Get the current step number.
    #[must_use]
    pub const fn step(&self) -> usize {
        self.step
    }

    /// Advance to the next step.
    pub const fn advance_step(&mut self) {
        self.step += 1;
    }

    /// Get the agent name, if set.
    #[must_use]
    pub fn agent_name(&self) -> Option<&str> {
        self.agent_name.as_deref()
    }

    /// Handle on the shared session-state map.
    #[must_use]
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Read a value from the session state.
    pub async fn get_state(&self, key: &str) -> Option<Value> {
        self.state.read().await.get(key).cloned()
    }

    /// Write a value into the session state.
    pub async fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state.write().await.insert(key.into(), value);
    }

    /// Snapshot the session state as a plain map.
    pub async fn state_snapshot(&self) -> HashMap<String, Value> {
        self.state.read().await.clone()
    }
}
