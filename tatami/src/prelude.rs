//! Convenience re-exports of the public surface.
//!
//! ```rust,ignore
//! use tatami::prelude::*;
//! ```

pub use crate::agent::{Agent, AgentBuilder, OutputSchema, RunEvent, RunMetrics, RunOptions,
    RunPhase, RunResponse};
pub use crate::cache::{
    CacheConfig, CacheStats, CachedValue, MemoryToolCache, NoopCache, SharedToolCache, ToolCache,
};
pub use crate::callback::{
    HookChain, LoggingHooks, NamedHooks, NoopHooks, RunContext, RunHooks, SharedState,
};
pub use crate::compress::SemanticCompressor;
pub use crate::deps::DependencyRegistry;
pub use crate::error::{Error, GuardrailStage, Result, StoreError, ToolError};
pub use crate::guardrail::{Guardrail, GuardrailCheck};
pub use crate::knowledge::{
    Document, InMemoryRetriever, KnowledgeRetriever, ScoredDocument, SharedRetriever,
};
pub use crate::memory::{InMemoryMemoryManager, Memory, MemoryManager, SharedMemoryManager};
pub use crate::message::{FunctionCall, Message, Role, ToolCall};
pub use crate::model::{
    InvokeRequest, ModelProvider, ModelResponse, ResponseFormat, SharedModelProvider,
};
pub use crate::providers::MockProvider;
pub use crate::reasoning::{NextAction, Reasoner, ReasonerConfig, ReasoningStep};
pub use crate::schema::{SchemaField, TypeSchema, ValidationError, ValidationErrors};
pub use crate::store::{
    AgentRun, InMemoryStore, KnowledgePage, KnowledgeRow, KnowledgeSort, KnowledgeStatus,
    SessionRecord, SessionStore, SharedSessionStore, SortOrder, SqliteStore, StoreMode,
};
pub use crate::stream::{StopReason, StreamAggregator, StreamChunk};
pub use crate::tool::executor::{
    BatchStats, BatchStatus, ExecutorConfig, ToolCallBatch, ToolCallOutcome, ToolExecutor,
};
pub use crate::tool::{Tool, ToolBox, ToolDefinition, ToolMethod, ToolResult, Toolkit};
pub use crate::tools::{HistoryTools, KnowledgeTools, SessionStateTools};
pub use crate::usage::Usage;
