//! Streaming response types for model operations.
//!
//! Providers that stream deliver a sequence of [`StreamChunk`]s.
//! [`StreamAggregator`] folds that sequence back into a complete
//! [`ModelResponse`](crate::model::ModelResponse) so the blocking and
//! streaming execution paths share all post-processing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::{Message, ToolCall};
use crate::model::ModelResponse;
use crate::usage::Usage;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum StopReason {
    /// The model completed its turn normally.
    #[default]
    Stop,
    /// Generation was truncated by the token limit.
    Length,
    /// The model stopped to request tool calls.
    ToolCalls,
    /// Provider-specific stop condition.
    Other,
}

impl StopReason {
    /// Returns `true` if the model completed normally or stopped for tools.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Stop | Self::ToolCalls)
    }

    /// Returns `true` if the response was truncated due to length.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        matches!(self, Self::Length)
    }
}

/// A chunk of streaming response from a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum StreamChunk {
    /// Text content delta.
    Text(String),

    /// Reasoning/thinking content delta.
    Thinking(String),

    /// Start of a tool call.
    ToolCallStart {
        /// Index of this tool call in the response.
        index: usize,
        /// Unique identifier for this tool call.
        id: String,
        /// Canonical name of the function being called.
        name: String,
    },

    /// Partial JSON arguments for an in-progress tool call.
    ToolCallDelta {
        /// Index of the tool call being updated.
        index: usize,
        /// Partial JSON argument text.
        partial_arguments: String,
    },

    /// Token usage information (usually the final chunk before `Done`).
    Usage(Usage),

    /// Stream is complete.
    Done {
        /// Stop reason from the model, if reported.
        stop_reason: Option<StopReason>,
    },
}

impl StreamChunk {
    /// Creates a text chunk.
    #[inline]
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// Creates a thinking chunk.
    #[inline]
    #[must_use]
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking(content.into())
    }

    /// Returns the text content if this is a text chunk.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns `true` if this is a done chunk.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// In-progress tool call being assembled from deltas.
#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds a chunk sequence into a complete response.
///
/// Tool call fragments are keyed by stream index so interleaved deltas from
/// parallel calls reassemble correctly; the final call order follows the
/// index order.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    content: String,
    thinking: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    usage: Option<Usage>,
    stop_reason: Option<StopReason>,
}

impl StreamAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk into the accumulated state.
    pub fn apply(&mut self, chunk: &StreamChunk) {
        match chunk {
            StreamChunk::Text(delta) => self.content.push_str(delta),
            StreamChunk::Thinking(delta) => self.thinking.push_str(delta),
            StreamChunk::ToolCallStart { index, id, name } => {
                let entry = self.tool_calls.entry(*index).or_default();
                entry.id.clone_from(id);
                entry.name.clone_from(name);
            }
            StreamChunk::ToolCallDelta {
                index,
                partial_arguments,
            } => {
                self.tool_calls
                    .entry(*index)
                    .or_default()
                    .arguments
                    .push_str(partial_arguments);
            }
            StreamChunk::Usage(usage) => {
                self.usage = Some(self.usage.map_or(*usage, |u| u + *usage));
            }
            StreamChunk::Done { stop_reason } => {
                self.stop_reason = *stop_reason;
            }
        }
    }

    /// Reconstruct a complete [`ModelResponse`] from the accumulated chunks.
    #[must_use]
    pub fn into_response(self) -> ModelResponse {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_values()
            .map(|partial| ToolCall::new(partial.id, partial.name, partial.arguments))
            .collect();

        let mut message = if tool_calls.is_empty() {
            Message::assistant(self.content)
        } else {
            Message::assistant_with_tool_calls(self.content, tool_calls)
        };
        if !self.thinking.is_empty() {
            message = message.with_thinking(self.thinking);
        }

        let stop_reason = self.stop_reason.unwrap_or_else(|| {
            if message.has_tool_calls() {
                StopReason::ToolCalls
            } else {
                StopReason::Stop
            }
        });

        let mut response = ModelResponse::new(message).with_stop_reason(stop_reason);
        if let Some(usage) = self.usage {
            response = response.with_usage(usage);
        }
        response
    }
}
