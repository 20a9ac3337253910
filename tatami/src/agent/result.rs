//! Run results and metrics.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;
use crate::usage::Usage;

/// State machine of one run.
///
/// `Pending → Preparing → Invoking → [ToolPhase ↺] → Parsing → Persisting →
/// {Completed | Failed}`. A failure at any state is terminal for the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Created, not started.
    #[default]
    Pending,
    /// Assembling context frames.
    Preparing,
    /// Waiting on the model.
    Invoking,
    /// Dispatching model-requested tool calls.
    ToolPhase,
    /// Parsing structured output.
    Parsing,
    /// Writing the run and session to the store.
    Persisting,
    /// Finished successfully.
    Completed,
    /// Aborted.
    Failed,
}

/// Aggregate metrics of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Token usage summed across every model call of the run.
    pub usage: Usage,
    /// Wall time of the whole run.
    pub duration: Duration,
    /// Number of model invocations (including the tool loop).
    pub model_invocations: usize,
    /// Number of tool calls dispatched.
    pub tool_calls: usize,
    /// Retries spent across model and tool calls.
    pub total_retries: usize,
}

impl RunMetrics {
    /// Render as a JSON value for the run store.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The result of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    /// Run identifier (matches the persisted run, when a store is set).
    pub run_id: String,
    /// Session this run belongs to.
    pub session_id: String,
    /// User identity of the turn, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The final assistant text, verbatim.
    pub text: String,
    /// Parsed structured output when an output schema is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Reasoning text the model exposed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Every message of this turn, in order.
    pub messages: Vec<Message>,
    /// Aggregate metrics.
    pub metrics: RunMetrics,
    /// Terminal phase (`Completed` on success).
    pub phase: RunPhase,
}

impl RunResponse {
    /// Deserialize the structured output into a concrete type.
    ///
    /// # Errors
    ///
    /// Fails when no output schema was configured or the value does not fit
    /// `T`.
    pub fn parse_output<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        let value = self.output.clone().ok_or_else(|| {
            crate::error::Error::output_parse("no structured output on this response", "")
        })?;
        serde_json::from_value(value).map_err(crate::error::Error::from)
    }
}
