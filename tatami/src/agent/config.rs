//! Agent configuration and construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::cache::{NoopCache, SharedToolCache};
use crate::callback::{NamedHooks, SharedState};
use crate::compress::SemanticCompressor;
use crate::deps::DependencyRegistry;
use crate::error::{Error, Result};
use crate::guardrail::Guardrail;
use crate::knowledge::{DEFAULT_TOP_K, SharedRetriever};
use crate::memory::SharedMemoryManager;
use crate::message::Message;
use crate::model::SharedModelProvider;
use crate::reasoning::{Reasoner, ReasonerConfig};
use crate::schema::{TypeSchema, generate_json_schema};
use crate::store::SharedSessionStore;
use crate::tool::ToolBox;
use crate::tool::executor::ExecutorConfig;
use crate::tools::{
    HistoryTools, KnowledgeTools, SessionStateTools, SharedHistory, SharedToolCallLog,
};

/// The structural contract the final assistant content is parsed into.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    /// Schema name (shown to the formatting model).
    pub name: String,
    /// JSON Schema definition.
    pub schema: Value,
}

impl OutputSchema {
    /// Create from an explicit schema value.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Derive from a Rust type implementing [`schemars::JsonSchema`].
    #[must_use]
    pub fn from_type<T: schemars::JsonSchema>() -> Self {
        let (name, schema) = generate_json_schema::<T>();
        Self { name, schema }
    }

    /// Prompt section instructing the model to emit matching JSON.
    #[must_use]
    pub fn instructions(&self) -> String {
        format!(
            "Respond with JSON only, matching the '{}' schema:\n{}",
            self.name, self.schema,
        )
    }
}

/// A configured agent: the top-level orchestrator.
///
/// `Agent` is a value object — every field is fixed at construction through
/// [`AgentBuilder`], except the explicit setters for session state and
/// history. Cloning shares collaborators and mutable state handles.
#[derive(Clone)]
pub struct Agent {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) goal: Option<String>,
    pub(crate) instructions: Option<String>,
    pub(crate) expected_output: Option<String>,
    pub(crate) additional_information: Vec<String>,
    pub(crate) additional_context: Option<String>,
    pub(crate) context: HashMap<String, Value>,
    pub(crate) timezone: Option<String>,
    pub(crate) default_user_id: Option<String>,
    pub(crate) default_session_id: Option<String>,

    pub(crate) provider: SharedModelProvider,
    pub(crate) output_provider: Option<SharedModelProvider>,
    pub(crate) toolbox: ToolBox,
    pub(crate) store: Option<SharedSessionStore>,
    pub(crate) memory: Option<SharedMemoryManager>,
    pub(crate) retriever: Option<SharedRetriever>,
    pub(crate) knowledge_k: usize,
    pub(crate) cache: SharedToolCache,
    pub(crate) compressor: Option<SemanticCompressor>,
    pub(crate) reasoner: Option<Reasoner>,

    pub(crate) input_guardrails: Vec<Guardrail>,
    pub(crate) output_guardrails: Vec<Guardrail>,
    pub(crate) tool_guardrails: Vec<Guardrail>,
    pub(crate) hooks: Vec<NamedHooks>,
    pub(crate) dependencies: DependencyRegistry,

    pub(crate) input_schema: Option<TypeSchema>,
    pub(crate) output_schema: Option<OutputSchema>,

    pub(crate) executor_config: ExecutorConfig,
    pub(crate) retries: usize,
    pub(crate) retry_delay: Duration,
    pub(crate) exponential_backoff: bool,
    pub(crate) tool_call_limit: usize,
    pub(crate) num_history_runs: usize,
    pub(crate) max_tool_calls_from_history: Option<usize>,
    pub(crate) add_history_to_context: bool,
    pub(crate) add_dependencies_to_context: bool,
    pub(crate) add_session_state_to_context: bool,
    pub(crate) debug_mode: bool,

    pub(crate) session_state: SharedState,
    pub(crate) history: SharedHistory,
    pub(crate) tool_call_log: SharedToolCallLog,
    pub(crate) successful_runs: Arc<AtomicUsize>,
}

impl Agent {
    /// Start building an agent with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    /// The agent's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered tool catalog.
    #[must_use]
    pub const fn toolbox(&self) -> &ToolBox {
        &self.toolbox
    }

    /// Replace the agentic session state.
    ///
    /// One of the two explicit post-construction setters.
    pub async fn set_session_state(&self, state: HashMap<String, Value>) {
        *self.session_state.write().await = state;
    }

    /// Snapshot the agentic session state.
    pub async fn session_state(&self) -> HashMap<String, Value> {
        self.session_state.read().await.clone()
    }

    /// Replace the in-memory history.
    ///
    /// One of the two explicit post-construction setters.
    pub async fn set_history(&self, history: Vec<Message>) {
        *self.history.write().await = history;
    }

    /// Snapshot the in-memory history.
    pub async fn history(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    /// Outcomes of every tool call this agent dispatched, oldest first.
    pub async fn tool_call_history(&self) -> Vec<crate::tool::executor::ToolCallOutcome> {
        self.tool_call_log.read().await.clone()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.toolbox.names())
            .field("store", &self.store.is_some())
            .field("retriever", &self.retriever.is_some())
            .field("reasoning", &self.reasoner.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Agent`].
#[must_use]
pub struct AgentBuilder {
    name: String,
    description: Option<String>,
    goal: Option<String>,
    instructions: Option<String>,
    expected_output: Option<String>,
    additional_information: Vec<String>,
    additional_context: Option<String>,
    context: HashMap<String, Value>,
    timezone: Option<String>,
    default_user_id: Option<String>,
    default_session_id: Option<String>,

    provider: Option<SharedModelProvider>,
    output_provider: Option<SharedModelProvider>,
    reasoning_provider: Option<SharedModelProvider>,
    reasoning: Option<ReasonerConfig>,
    toolbox: ToolBox,
    store: Option<SharedSessionStore>,
    memory: Option<SharedMemoryManager>,
    retriever: Option<SharedRetriever>,
    knowledge_k: usize,
    cache: SharedToolCache,
    semantic_max_tokens: Option<usize>,

    input_guardrails: Vec<Guardrail>,
    output_guardrails: Vec<Guardrail>,
    tool_guardrails: Vec<Guardrail>,
    hooks: Vec<NamedHooks>,
    dependencies: DependencyRegistry,

    input_schema: Option<TypeSchema>,
    output_schema: Option<OutputSchema>,

    executor_config: ExecutorConfig,
    retries: usize,
    retry_delay: Duration,
    exponential_backoff: bool,
    tool_call_limit: usize,
    num_history_runs: usize,
    max_tool_calls_from_history: Option<usize>,
    add_history_to_context: bool,
    add_dependencies_to_context: bool,
    add_session_state_to_context: bool,
    default_tools: bool,
    debug_mode: bool,
}

impl AgentBuilder {
    /// Create a builder with defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            goal: None,
            instructions: None,
            expected_output: None,
            additional_information: Vec::new(),
            additional_context: None,
            context: HashMap::new(),
            timezone: None,
            default_user_id: None,
            default_session_id: None,
            provider: None,
            output_provider: None,
            reasoning_provider: None,
            reasoning: None,
            toolbox: ToolBox::new(),
            store: None,
            memory: None,
            retriever: None,
            knowledge_k: DEFAULT_TOP_K,
            cache: Arc::new(NoopCache),
            semantic_max_tokens: None,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            tool_guardrails: Vec::new(),
            hooks: Vec::new(),
            dependencies: DependencyRegistry::new(),
            input_schema: None,
            output_schema: None,
            executor_config: ExecutorConfig::default(),
            retries: 0,
            retry_delay: Duration::from_millis(500),
            exponential_backoff: true,
            tool_call_limit: 20,
            num_history_runs: 3,
            max_tool_calls_from_history: None,
            add_history_to_context: true,
            add_dependencies_to_context: false,
            add_session_state_to_context: false,
            default_tools: false,
            debug_mode: false,
        }
    }

    /// Sets the description section.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the goal section.
    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    /// Sets the instructions section.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Sets the expected-output section.
    pub fn expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    /// Appends an additional-information bullet.
    pub fn additional_information(mut self, info: impl Into<String>) -> Self {
        self.additional_information.push(info.into());
        self
    }

    /// Sets the trailing additional-context section.
    pub fn additional_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }

    /// Inserts a context map entry (rendered into the system frame).
    pub fn context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Sets the timezone named in the datetime section.
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Sets the default user id.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.default_user_id = Some(user_id.into());
        self
    }

    /// Sets the default session id.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.default_session_id = Some(session_id.into());
        self
    }

    /// Sets the model provider. Required.
    pub fn provider(mut self, provider: SharedModelProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets a separate model used only to format structured output.
    pub fn output_provider(mut self, provider: SharedModelProvider) -> Self {
        self.output_provider = Some(provider);
        self
    }

    /// Enables the reasoning pass with the given bounds.
    pub fn reasoning(mut self, config: ReasonerConfig) -> Self {
        self.reasoning = Some(config);
        self
    }

    /// Sets a dedicated provider for the reasoning pass (defaults to the
    /// main provider).
    pub fn reasoning_provider(mut self, provider: SharedModelProvider) -> Self {
        self.reasoning_provider = Some(provider);
        self
    }

    /// Registers a single tool.
    pub fn tool<T: crate::tool::Tool + 'static>(mut self, tool: T) -> Self
    where
        T::Output: 'static,
    {
        self.toolbox.add(tool);
        self
    }

    /// Registers a toolkit.
    pub fn toolkit(mut self, toolkit: impl crate::tool::Toolkit + 'static) -> Self {
        self.toolbox.add_toolkit(toolkit);
        self
    }

    /// Replaces the whole toolbox.
    pub fn toolbox(mut self, toolbox: ToolBox) -> Self {
        self.toolbox = toolbox;
        self
    }

    /// Sets the session store.
    pub fn store(mut self, store: SharedSessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the memory manager.
    pub fn memory(mut self, memory: SharedMemoryManager) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Sets the knowledge retriever.
    pub fn retriever(mut self, retriever: SharedRetriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Sets how many knowledge documents are retrieved per run.
    pub const fn knowledge_k(mut self, k: usize) -> Self {
        self.knowledge_k = k;
        self
    }

    /// Sets the tool result cache.
    pub fn cache(mut self, cache: SharedToolCache) -> Self {
        self.cache = cache;
        self
    }

    /// Enables semantic compression of fragments over this token estimate.
    pub const fn semantic_max_tokens(mut self, max_tokens: usize) -> Self {
        self.semantic_max_tokens = Some(max_tokens);
        self
    }

    /// Appends an input guardrail.
    pub fn input_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    /// Appends an output guardrail.
    pub fn output_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// Appends a per-tool-call guardrail.
    pub fn tool_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.tool_guardrails.push(guardrail);
        self
    }

    /// Appends lifecycle hooks.
    pub fn hooks(mut self, hooks: NamedHooks) -> Self {
        self.hooks.push(hooks);
        self
    }

    /// Sets the dependency registry.
    pub fn dependencies(mut self, dependencies: DependencyRegistry) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Declares the input schema; inputs are validated before the run.
    pub fn input_schema(mut self, schema: TypeSchema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Declares the output schema; final content is parsed into it.
    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Sets the tool dispatch configuration.
    pub const fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Sets the model retry budget.
    pub const fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the model retry base delay and backoff shape.
    pub const fn retry_delay(mut self, delay: Duration, exponential: bool) -> Self {
        self.retry_delay = delay;
        self.exponential_backoff = exponential;
        self
    }

    /// Caps tool calls dispatched per run.
    pub const fn tool_call_limit(mut self, limit: usize) -> Self {
        self.tool_call_limit = limit;
        self
    }

    /// Sets how many past runs are reconstructed into the context.
    pub const fn num_history_runs(mut self, runs: usize) -> Self {
        self.num_history_runs = runs;
        self
    }

    /// Caps historical tool calls kept in the context, counting from the
    /// most recent.
    pub const fn max_tool_calls_from_history(mut self, max: usize) -> Self {
        self.max_tool_calls_from_history = Some(max);
        self
    }

    /// Toggles history injection (default on).
    pub const fn add_history_to_context(mut self, enabled: bool) -> Self {
        self.add_history_to_context = enabled;
        self
    }

    /// Toggles the dependencies frame (default off).
    pub const fn add_dependencies_to_context(mut self, enabled: bool) -> Self {
        self.add_dependencies_to_context = enabled;
        self
    }

    /// Toggles the session-state frame (default off).
    pub const fn add_session_state_to_context(mut self, enabled: bool) -> Self {
        self.add_session_state_to_context = enabled;
        self
    }

    /// Registers the built-in history, knowledge, and session-state tools.
    pub const fn default_tools(mut self, enabled: bool) -> Self {
        self.default_tools = enabled;
        self
    }

    /// Toggles verbose diagnostics.
    pub const fn debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Finalize the agent.
    ///
    /// # Errors
    ///
    /// Fails when no provider is configured.
    pub fn build(self) -> Result<Agent> {
        let provider = self.provider.ok_or_else(|| {
            Error::configuration(format!(
                "agent '{}' has no model provider configured",
                self.name,
            ))
        })?;

        let session_state: SharedState = Arc::new(RwLock::new(HashMap::new()));
        let history: SharedHistory = Arc::new(RwLock::new(Vec::new()));
        let tool_call_log: SharedToolCallLog = Arc::new(RwLock::new(Vec::new()));

        let mut toolbox = self.toolbox;
        if self.default_tools {
            toolbox.add_toolkit(HistoryTools::new(
                Arc::clone(&history),
                Arc::clone(&tool_call_log),
            ));
            toolbox.add_toolkit(SessionStateTools::new(Arc::clone(&session_state)));
            if self.retriever.is_some() || self.store.is_some() {
                toolbox.add_toolkit(KnowledgeTools::new(
                    self.retriever.clone(),
                    self.store.clone(),
                ));
            }
        }

        let reasoner = self.reasoning.map(|config| {
            let reasoning_provider = self
                .reasoning_provider
                .unwrap_or_else(|| Arc::clone(&provider));
            Reasoner::new(reasoning_provider, toolbox.clone(), config)
        });

        let compressor = self
            .semantic_max_tokens
            .map(|max_tokens| SemanticCompressor::new(Arc::clone(&provider), max_tokens));

        Ok(Agent {
            name: self.name,
            description: self.description,
            goal: self.goal,
            instructions: self.instructions,
            expected_output: self.expected_output,
            additional_information: self.additional_information,
            additional_context: self.additional_context,
            context: self.context,
            timezone: self.timezone,
            default_user_id: self.default_user_id,
            default_session_id: self.default_session_id,
            provider,
            output_provider: self.output_provider,
            toolbox,
            store: self.store,
            memory: self.memory,
            retriever: self.retriever,
            knowledge_k: self.knowledge_k,
            cache: self.cache,
            compressor,
            reasoner,
            input_guardrails: self.input_guardrails,
            output_guardrails: self.output_guardrails,
            tool_guardrails: self.tool_guardrails,
            hooks: self.hooks,
            dependencies: self.dependencies,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            executor_config: self.executor_config,
            retries: self.retries,
            retry_delay: self.retry_delay,
            exponential_backoff: self.exponential_backoff,
            tool_call_limit: self.tool_call_limit,
            num_history_runs: self.num_history_runs,
            max_tool_calls_from_history: self.max_tool_calls_from_history,
            add_history_to_context: self.add_history_to_context,
            add_dependencies_to_context: self.add_dependencies_to_context,
            add_session_state_to_context: self.add_session_state_to_context,
            debug_mode: self.debug_mode,
            session_state,
            history,
            tool_call_log,
            successful_runs: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
