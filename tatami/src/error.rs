//! Error types for the tatami runtime.
//!
//! [`Error`] is the single error surface callers see. Focused sub-enums
//! ([`ToolError`], [`StoreError`]) exist where a subsystem has error states
//! of its own; they convert into [`Error`] via `#[from]`.
//!
//! # Propagation policy
//!
//! - Validation, guardrail, hook, parse, model, and policy failures abort a
//!   run and surface to the caller.
//! - Memory and knowledge failures are logged and swallowed by the
//!   orchestrator; the run continues.
//! - Storage failures on persistence are logged and swallowed; the next turn
//!   falls back to the in-memory history.
//! - Tool failures flow back to the model as tool-role messages unless the
//!   executor config declares fail-fast.
//! - Cancellation is always terminal.

use thiserror::Error;

use crate::schema::ValidationErrors;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle seam at which a guardrail rejected data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailStage {
    /// Raw user input, before any model invocation.
    Input,
    /// The final run response.
    Output,
    /// Arguments of an individual tool call.
    ToolCall,
}

impl std::fmt::Display for GuardrailStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
            Self::ToolCall => f.write_str("tool call"),
        }
    }
}

/// The main error type for agent operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Input or output failed schema validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// A guardrail vetoed the run.
    #[error("guardrail '{guardrail}' blocked {stage}: {message}")]
    GuardrailBlocked {
        /// Name of the guardrail that fired first.
        guardrail: String,
        /// Seam at which the guardrail ran.
        stage: GuardrailStage,
        /// Human-readable reason.
        message: String,
    },

    /// A lifecycle hook failed.
    #[error("hook #{index} '{name}' failed: {message}")]
    Hook {
        /// Position of the hook in the agent's hook list.
        index: usize,
        /// Name of the failing hook.
        name: String,
        /// Human-readable reason.
        message: String,
    },

    /// Error during tool lookup, argument parsing, or execution.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The model adapter failed after all retries.
    #[error("model invocation failed: {message}")]
    Model {
        /// The underlying error message.
        message: String,
    },

    /// The final assistant content could not be parsed into the output schema.
    #[error("output parse failed: {message}")]
    OutputParse {
        /// The parsing error message.
        message: String,
        /// The content that failed to parse.
        output: String,
    },

    /// Error from the session store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Error from the knowledge retriever.
    #[error("knowledge retrieval failed: {message}")]
    Knowledge {
        /// The underlying error message.
        message: String,
    },

    /// Error from the memory manager.
    #[error("memory operation failed: {message}")]
    Memory {
        /// The underlying error message.
        message: String,
    },

    /// The run context was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// A policy limit (e.g. the tool call limit) was exceeded.
    #[error("policy limit exceeded: {message}")]
    PolicyLimit {
        /// Which limit was hit and at what value.
        message: String,
    },

    /// Invalid agent or run configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new model invocation error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create a new knowledge error.
    #[must_use]
    pub fn knowledge(message: impl Into<String>) -> Self {
        Self::Knowledge {
            message: message.into(),
        }
    }

    /// Create a new memory error.
    #[must_use]
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create a new hook failure error.
    #[must_use]
    pub fn hook(index: usize, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            index,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a new guardrail block error.
    #[must_use]
    pub fn guardrail(
        guardrail: impl Into<String>,
        stage: GuardrailStage,
        message: impl Into<String>,
    ) -> Self {
        Self::GuardrailBlocked {
            guardrail: guardrail.into(),
            stage,
            message: message.into(),
        }
    }

    /// Create a new output parse error.
    #[must_use]
    pub fn output_parse(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self::OutputParse {
            message: message.into(),
            output: output.into(),
        }
    }

    /// Create a new policy limit error.
    #[must_use]
    pub fn policy_limit(message: impl Into<String>) -> Self {
        Self::PolicyLimit {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if this error represents cancellation, at any depth.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Tool(ToolError::Cancelled))
    }
}

/// Error during tool lookup or execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No tool registered under the requested name.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// Arguments did not parse or validate against the tool's schema.
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments {
        /// Canonical tool name.
        tool: String,
        /// Parse or validation failure detail.
        message: String,
    },

    /// The tool itself returned an error.
    #[error("tool '{tool}' failed: {message}")]
    Execution {
        /// Canonical tool name.
        tool: String,
        /// The underlying error message.
        message: String,
    },

    /// The per-call timeout elapsed before the tool returned.
    #[error("tool '{tool}' timed out after {seconds}s")]
    Timeout {
        /// Canonical tool name.
        tool: String,
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// The run context was cancelled while the call was in flight.
    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    /// Create a new not-found error.
    #[must_use]
    pub fn not_found(tool: impl Into<String>) -> Self {
        Self::NotFound(tool.into())
    }

    /// Create a new invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new execution error.
    #[must_use]
    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    #[must_use]
    pub fn timeout(tool: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            tool: tool.into(),
            seconds,
        }
    }
}

/// Error from the session store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No session with the given id. The orchestrator recovers from this by
    /// creating a fresh session.
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// No run with the given id.
    #[error("run '{0}' not found")]
    RunNotFound(String),

    /// No knowledge row with the given id.
    #[error("knowledge row '{0}' not found")]
    KnowledgeNotFound(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// A JSON blob column failed to round-trip.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The connection mutex was poisoned.
    #[error("lock error: {0}")]
    Lock(String),

    /// The blocking task was aborted or panicked.
    #[error("task error: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_guardrail_name_and_stage() {
        let err = Error::guardrail("pii-filter", GuardrailStage::Output, "found an email");
        let text = err.to_string();
        assert!(text.contains("pii-filter"));
        assert!(text.contains("output"));
    }

    #[test]
    fn display_includes_hook_index_and_name() {
        let err = Error::hook(2, "audit", "log sink unavailable");
        assert_eq!(err.to_string(), "hook #2 'audit' failed: log sink unavailable");
    }

    #[test]
    fn tool_error_converts_into_error() {
        let err: Error = ToolError::not_found("add").into();
        assert!(matches!(err, Error::Tool(ToolError::NotFound(_))));
    }

    #[test]
    fn store_error_from_rusqlite() {
        let err: StoreError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn is_cancelled_covers_tool_cancellation() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Tool(ToolError::Cancelled).is_cancelled());
        assert!(!Error::model("boom").is_cancelled());
    }

    #[test]
    fn session_not_found_is_distinguishable() {
        let err = StoreError::SessionNotFound("s-1".into());
        assert!(matches!(err, StoreError::SessionNotFound(ref id) if id == "s-1"));
    }
}
