//! Streamed run events.

/// Events delivered to the chunk handler during a streamed run.
///
/// Text deltas always flow; lifecycle events additionally flow when
/// [`RunOptions::stream_events`](super::RunOptions) is set.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunEvent {
    /// The run began.
    RunStarted {
        /// Run identifier.
        run_id: String,
    },
    /// Incremental assistant text.
    TextDelta(String),
    /// Incremental reasoning text.
    ThinkingDelta(String),
    /// A tool call was dispatched.
    ToolCallStarted {
        /// The tool call id.
        id: String,
        /// Canonical dispatch name.
        name: String,
    },
    /// A tool call finished.
    ToolCallCompleted {
        /// The tool call id.
        id: String,
        /// Canonical dispatch name.
        name: String,
        /// Whether the call produced a result.
        success: bool,
    },
    /// The run finished and the response is final.
    RunCompleted {
        /// Run identifier.
        run_id: String,
    },
}
