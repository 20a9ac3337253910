//! Run execution: assemble → invoke → tool loop → parse → persist.
//!
//! Both entry points share one body: [`Agent::run`] drives the blocking
//! provider path, [`Agent::run_stream`] the streaming path (chunks flow
//! through a bounded channel into the caller's handler, then join the same
//! post-processing). Per-run state lives in a [`TurnState`] owned by the
//! body; shared agent state (history, session state, tool-call log) is only
//! touched through its locks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::callback::{HookChain, RunContext};
use crate::error::{Error, GuardrailStage, Result, StoreError};
use crate::guardrail::run_all;
use crate::knowledge::truncate_snippet;
use crate::memory::{INJECTED_MEMORY_LIMIT, SUMMARY_INTERVAL};
use crate::message::{Message, Role};
use crate::model::{InvokeRequest, ModelResponse};
use crate::reasoning::Reasoner;
use crate::schema::strip_code_fences;
use crate::store::{AgentRun, SessionRecord, state_map_to_value};
use crate::stream::{StreamAggregator, StreamChunk};
use crate::tool::executor::ToolExecutor;

use super::config::Agent;
use super::events::RunEvent;
use super::options::RunOptions;
use super::result::{RunMetrics, RunPhase, RunResponse};

/// Bounded buffer between the provider stream and the chunk handler.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Budget for detached memory/summary writes after the run returns.
const MEMORY_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Mutable state of one run.
struct TurnState {
    ctx: RunContext,
    run_id: String,
    session_id: String,
    user_id: Option<String>,
    session: Option<SessionRecord>,
    /// The full request context sent to the model.
    context_messages: Vec<Message>,
    /// Messages produced by this turn (user input through final answer).
    turn_messages: Vec<Message>,
    metrics: RunMetrics,
    phase: RunPhase,
    started: Instant,
    input: String,
    retries: usize,
    stream_events: bool,
    metadata: HashMap<String, Value>,
    debug: bool,
}

/// Event sink shared by both execution paths.
type Handler<'a> = Option<&'a mut (dyn FnMut(RunEvent) + Send)>;

fn emit(handler: &mut Handler<'_>, stream_events: bool, event: RunEvent) {
    let is_delta = matches!(
        event,
        RunEvent::TextDelta(_) | RunEvent::ThinkingDelta(_),
    );
    if !is_delta && !stream_events {
        return;
    }
    if let Some(h) = handler.as_mut() {
        (h)(event);
    }
}

impl Agent {
    /// Execute one user turn to completion.
    ///
    /// # Errors
    ///
    /// Validation, guardrail, hook, model, parse, policy, and cancellation
    /// failures abort the run. Memory, knowledge, and persistence failures
    /// are logged and swallowed.
    pub async fn run(&self, input: impl Into<String>, options: RunOptions) -> Result<RunResponse> {
        let input = input.into();
        let span = info_span!(
            "agent_run",
            agent.name = %self.name,
            run.id = tracing::field::Empty,
            error = tracing::field::Empty,
        );
        self.run_inner(input, options, None).instrument(span).await
    }

    /// Execute one user turn, streaming chunks into `on_event`.
    ///
    /// Text deltas always flow; lifecycle events flow when
    /// [`RunOptions::stream_events`] is set. After the stream completes the
    /// run persists and post-processes exactly like [`run`](Self::run).
    pub async fn run_stream<F>(
        &self,
        input: impl Into<String>,
        options: RunOptions,
        mut on_event: F,
    ) -> Result<RunResponse>
    where
        F: FnMut(RunEvent) + Send,
    {
        let input = input.into();
        let span = info_span!(
            "agent_run",
            agent.name = %self.name,
            run.id = tracing::field::Empty,
            streaming = true,
            error = tracing::field::Empty,
        );
        self.run_inner(input, options, Some(&mut on_event))
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        input: String,
        options: RunOptions,
        mut handler: Handler<'_>,
    ) -> Result<RunResponse> {
        let mut state = self.prepare(input, &options).await.inspect_err(|e| {
            tracing::Span::current().record("error", tracing::field::display(e));
        })?;
        tracing::Span::current().record("run.id", state.run_id.as_str());
        emit(
            &mut handler,
            state.stream_events,
            RunEvent::RunStarted {
                run_id: state.run_id.clone(),
            },
        );

        let result = self.drive(&mut state, &mut handler).await;
        match result {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::Span::current().record("error", tracing::field::display(&e));
                warn!(agent = %self.name, error = %e, phase = ?state.phase, "run failed");
                Err(e)
            }
        }
    }

    /// Steps 8–13: invoke, tool loop, parse, persist, guardrails, hooks.
    async fn drive(
        &self,
        state: &mut TurnState,
        handler: &mut Handler<'_>,
    ) -> Result<RunResponse> {
        state.phase = RunPhase::Invoking;
        let mut response = self.invoke_model(state, handler).await?;

        let mut dispatched = 0usize;
        while response.has_tool_calls() {
            state.phase = RunPhase::ToolPhase;
            let calls = response.tool_calls().unwrap_or_default().to_vec();

            dispatched += calls.len();
            if dispatched > self.tool_call_limit {
                state.phase = RunPhase::Failed;
                return Err(Error::policy_limit(format!(
                    "tool call limit of {} exceeded",
                    self.tool_call_limit,
                )));
            }

            state.context_messages.push(response.message.clone());
            state.turn_messages.push(response.message.clone());

            for call in &calls {
                emit(
                    handler,
                    state.stream_events,
                    RunEvent::ToolCallStarted {
                        id: call.id.clone(),
                        name: call.name().to_owned(),
                    },
                );
            }

            let executor = ToolExecutor::new(self.toolbox.clone())
                .with_cache(Arc::clone(&self.cache))
                .with_guardrails(self.tool_guardrails.clone())
                .with_hooks(self.hooks.clone());
            let outcomes = executor
                .execute_parallel(&state.ctx, &calls, &self.executor_config)
                .await
                .inspect_err(|_| {
                    state.phase = RunPhase::Failed;
                })?;

            for outcome in &outcomes {
                emit(
                    handler,
                    state.stream_events,
                    RunEvent::ToolCallCompleted {
                        id: outcome.id.clone(),
                        name: call_name(&calls, &outcome.id),
                        success: outcome.success,
                    },
                );
                let tool_message = Message::tool(outcome.id.clone(), outcome.content_for_model());
                state.context_messages.push(tool_message.clone());
                state.turn_messages.push(tool_message);
            }

            state.metrics.tool_calls += outcomes.len();
            state.metrics.total_retries += outcomes
                .iter()
                .map(|o| o.attempts.saturating_sub(1))
                .sum::<usize>();
            if state.debug {
                debug!(
                    agent = %self.name,
                    batch = outcomes.len(),
                    dispatched,
                    "tool batch finished",
                );
            }
            self.tool_call_log.write().await.extend(outcomes);

            state.phase = RunPhase::Invoking;
            response = self.invoke_model(state, handler).await?;
        }

        // Step 10: structured output.
        state.phase = RunPhase::Parsing;
        let final_text = response.text().to_owned();
        let thinking = response.message.thinking.clone();
        state.context_messages.push(response.message.clone());
        state.turn_messages.push(response.message.clone());

        let output = self.parse_structured(&state.ctx, &final_text).await?;

        if state.ctx.is_cancelled() {
            state.phase = RunPhase::Failed;
            return Err(Error::Cancelled);
        }

        // Step 11: persistence, best-effort.
        state.phase = RunPhase::Persisting;
        self.persist(state, &final_text).await;

        // Step 12: in-memory history, capped at 2·num_history_runs.
        self.update_history(state, &final_text).await;

        // Memory writes are detached: they must not outlive their own budget,
        // and never fail the run.
        self.spawn_memory_writes(state, &final_text);

        state.phase = RunPhase::Completed;
        state.metrics.duration = state.started.elapsed();
        state.metrics.usage = *state.ctx.usage();

        let run_response = RunResponse {
            run_id: state.run_id.clone(),
            session_id: state.session_id.clone(),
            user_id: state.user_id.clone(),
            text: final_text.clone(),
            output,
            thinking,
            messages: state.turn_messages.clone(),
            metrics: state.metrics,
            phase: RunPhase::Completed,
        };

        // Step 13: output guardrails, then post-hooks.
        run_all(
            &self.output_guardrails,
            &state.ctx,
            GuardrailStage::Output,
            &Value::String(final_text),
        )
        .await?;
        HookChain::new(&self.hooks)
            .response(&state.ctx, &run_response)
            .await?;

        self.successful_runs.fetch_add(1, Ordering::SeqCst);
        emit(
            handler,
            state.stream_events,
            RunEvent::RunCompleted {
                run_id: run_response.run_id.clone(),
            },
        );
        info!(
            agent = %self.name,
            run_id = %run_response.run_id,
            tokens = run_response.metrics.usage.total_tokens,
            tool_calls = run_response.metrics.tool_calls,
            "run completed",
        );
        Ok(run_response)
    }

    /// Steps 1–7: hooks, guardrails, input, session, frames, reasoning.
    async fn prepare(&self, input: String, options: &RunOptions) -> Result<TurnState> {
        let cancel = options.cancellation.clone().unwrap_or_default();
        let mut ctx = RunContext::new()
            .with_agent_name(&self.name)
            .with_cancellation(cancel)
            .with_state(Arc::clone(&self.session_state));
        ctx.advance_step();

        if let Some(extra) = &options.session_state {
            for (key, value) in extra {
                ctx.set_state(key.clone(), value.clone()).await;
            }
        }

        let debug_mode = options.debug_mode.unwrap_or(self.debug_mode);

        // Step 1: pre-hooks and input guardrails on the raw input.
        HookChain::new(&self.hooks).input(&ctx, &input).await?;
        run_all(
            &self.input_guardrails,
            &ctx,
            GuardrailStage::Input,
            &Value::String(input.clone()),
        )
        .await?;

        // Step 2: materialize the prompt; validate against the input schema.
        let prompt = match &self.input_schema {
            Some(schema) => {
                let value: Value = serde_json::from_str(&input).map_err(|e| {
                    Error::Validation(crate::schema::ValidationErrors(vec![
                        crate::schema::ValidationError {
                            field: String::new(),
                            message: format!("input is not valid JSON: {e}"),
                            value: None,
                        },
                    ]))
                })?;
                schema.validate(&value)?;
                value.to_string()
            }
            None => input.clone(),
        };

        // Step 3: session and history.
        let user_id = options.user_id.clone().or_else(|| self.default_user_id.clone());
        let session_id = options
            .session_id
            .clone()
            .or_else(|| self.default_session_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let add_history = options
            .add_history_to_context
            .unwrap_or(self.add_history_to_context);

        let mut session = None;
        let mut history = Vec::new();
        if let Some(store) = &self.store {
            match store.read_session(&session_id).await {
                Ok(existing) => {
                    // Restore persisted agentic state without clobbering
                    // per-call overrides.
                    if let Some(Value::Object(persisted)) = existing.session_state() {
                        let mut live = self.session_state.write().await;
                        for (key, value) in persisted {
                            live.entry(key.clone()).or_insert_with(|| value.clone());
                        }
                    }
                    session = Some(existing);
                    if add_history && self.num_history_runs > 0 {
                        match store.get_runs_for_session(&session_id).await {
                            Ok(runs) => {
                                let skip = runs.len().saturating_sub(self.num_history_runs);
                                history = runs
                                    .into_iter()
                                    .skip(skip)
                                    .flat_map(|run| run.messages)
                                    .collect();
                            }
                            Err(e) => {
                                warn!(error = %e, "history reconstruction failed, using in-memory copy");
                            }
                        }
                    }
                }
                Err(StoreError::SessionNotFound(_)) => {
                    debug!(session_id = %session_id, "session not found, starting fresh");
                    session = Some(SessionRecord::new(&session_id, user_id.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "session read failed, continuing without store state");
                }
            }
        }
        if history.is_empty() && add_history && self.num_history_runs > 0 {
            history = self.history.read().await.clone();
        }

        // Step 7: cap historical tool calls, newest first.
        let history = filter_history_tool_calls(history, self.max_tool_calls_from_history);

        // Steps 4–5: the system frame.
        let system = self
            .build_system_frame(&ctx, &prompt, options, user_id.as_deref())
            .await;

        let mut context_messages = Vec::new();
        if !system.is_empty() {
            context_messages.push(Message::system(system));
        }
        context_messages.extend(history);

        // Step 6: reasoning pass.
        if let Some(reasoner) = &self.reasoner {
            let mut planning_view = context_messages.clone();
            planning_view.push(Message::user(prompt.clone()));
            let steps = reasoner.plan(&ctx, &planning_view).await;
            if !steps.is_empty() {
                context_messages.push(Reasoner::chain_to_message(&steps));
            }
        }

        let user_message = Message::user(prompt);
        context_messages.push(user_message.clone());

        let mut metadata = options.metadata.clone().unwrap_or_default();
        for media in &options.media {
            metadata.insert(
                media.kind.to_owned(),
                Value::Array(media.items.iter().cloned().map(Value::String).collect()),
            );
        }

        if debug_mode {
            debug!(
                agent = %self.name,
                context_len = context_messages.len(),
                session_id = %session_id,
                "context assembled",
            );
        }

        Ok(TurnState {
            ctx,
            run_id: Uuid::new_v4().to_string(),
            session_id,
            user_id,
            session,
            context_messages,
            turn_messages: vec![user_message],
            metrics: RunMetrics::default(),
            phase: RunPhase::Preparing,
            started: Instant::now(),
            input,
            retries: options.retries.unwrap_or(self.retries),
            stream_events: options.stream_events,
            metadata,
            debug: debug_mode,
        })
    }

    /// Step 4: fixed-order system frame sections, compressed when oversized,
    /// with the derived session-state and dependency frames prepended.
    async fn build_system_frame(
        &self,
        ctx: &RunContext,
        prompt: &str,
        options: &RunOptions,
        user_id: Option<&str>,
    ) -> String {
        let mut sections: Vec<String> = Vec::new();

        // Step 5 frames come first.
        if options
            .add_session_state_to_context
            .unwrap_or(self.add_session_state_to_context)
        {
            let snapshot = ctx.state_snapshot().await;
            if !snapshot.is_empty() {
                sections.push(format!(
                    "Current session state:\n{}",
                    state_map_to_value(&snapshot),
                ));
            }
        }
        if options
            .add_dependencies_to_context
            .unwrap_or(self.add_dependencies_to_context)
        {
            let mut registry = self.dependencies.clone();
            if let Some(extra) = &options.dependencies {
                registry.merge(crate::deps::DependencyRegistry::from(extra.clone()));
            }
            match registry.resolve_all().await {
                Ok(resolved) if !resolved.is_empty() => {
                    sections.push(format!(
                        "Resolved dependencies:\n{}",
                        state_map_to_value(&resolved),
                    ));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "dependency resolution failed"),
            }
        }

        if !self.name.is_empty() {
            sections.push(format!("Your name is {}.", self.name));
        }
        let now = Utc::now().to_rfc3339();
        sections.push(match &self.timezone {
            Some(tz) => format!("The current time is {now} ({tz})."),
            None => format!("The current time is {now}."),
        });
        if let Some(goal) = &self.goal {
            sections.push(format!("Goal: {goal}"));
        }
        if let Some(description) = &self.description {
            sections.push(description.clone());
        }
        if let Some(instructions) = &self.instructions {
            sections.push(format!("Instructions:\n{instructions}"));
        }
        if let Some(expected) = &self.expected_output {
            sections.push(format!("Expected output:\n{expected}"));
        }

        // User memories, capped.
        if let (Some(memory), Some(user)) = (&self.memory, user_id) {
            match memory.get_user_memories(user).await {
                Ok(memories) if !memories.is_empty() => {
                    let skip = memories.len().saturating_sub(INJECTED_MEMORY_LIMIT);
                    let lines: Vec<String> = memories
                        .into_iter()
                        .skip(skip)
                        .map(|m| format!("- {}", m.content))
                        .collect();
                    sections.push(format!(
                        "You remember these facts about the user:\n{}",
                        lines.join("\n"),
                    ));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "memory lookup failed"),
            }
        }

        // Knowledge hits, capped at k, snippets truncated.
        if let Some(retriever) = &self.retriever {
            match retriever
                .search(prompt, self.knowledge_k, options.knowledge_filters.as_ref())
                .await
            {
                Ok(hits) if !hits.is_empty() => {
                    let lines: Vec<String> = hits
                        .into_iter()
                        .map(|hit| format!("- {}", truncate_snippet(&hit.document.content)))
                        .collect();
                    sections.push(format!("Relevant knowledge:\n{}", lines.join("\n")));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "knowledge retrieval failed"),
            }
        }

        if !self.additional_information.is_empty() {
            let lines: Vec<String> = self
                .additional_information
                .iter()
                .map(|info| format!("- {info}"))
                .collect();
            sections.push(format!("Additional information:\n{}", lines.join("\n")));
        }
        if !self.context.is_empty() {
            sections.push(format!("Context:\n{}", state_map_to_value(&self.context)));
        }
        if let (Some(schema), None) = (&self.output_schema, &self.output_provider) {
            sections.push(schema.instructions());
        }
        if let Some(additional) = &self.additional_context {
            sections.push(additional.clone());
        }

        // Oversized fragments shrink through the secondary model.
        if let Some(compressor) = &self.compressor {
            let mut compressed = Vec::with_capacity(sections.len());
            for section in sections {
                compressed.push(compressor.compress(ctx, &section).await);
            }
            return compressed.join("\n\n");
        }

        sections.join("\n\n")
    }

    /// Step 8: model invocation with `retries + 1` attempts.
    async fn invoke_model(
        &self,
        state: &mut TurnState,
        handler: &mut Handler<'_>,
    ) -> Result<ModelResponse> {
        let mut request = InvokeRequest::with_messages(state.context_messages.clone())
            .metadata_map(state.metadata.clone());
        if !self.toolbox.is_empty() {
            request = request
                .tools(self.toolbox.definitions())
                .parallel_tool_calls(true);
        }

        let attempts = state.retries + 1;
        let mut last_error: Option<Error> = None;
        for attempt in 0..attempts {
            if state.ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let result = if handler.is_some() && self.provider.supports_streaming() {
                self.invoke_streaming(state, &request, handler).await
            } else {
                self.provider.invoke(&state.ctx, &request).await
            };

            match result {
                Ok(response) => {
                    state.metrics.model_invocations += 1;
                    if let Some(usage) = response.usage {
                        state.ctx.add_usage(usage);
                    }
                    // The blocking path with a handler still surfaces the
                    // text, as a single delta.
                    if handler.is_some() && !self.provider.supports_streaming() {
                        emit(
                            handler,
                            state.stream_events,
                            RunEvent::TextDelta(response.text().to_owned()),
                        );
                    }
                    return Ok(response);
                }
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(agent = %self.name, attempt, error = %e, "model invocation failed");
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        state.metrics.total_retries += 1;
                        let delay = if self.exponential_backoff {
                            self.retry_delay
                                .saturating_mul(2u32.saturating_pow(
                                    u32::try_from(attempt).unwrap_or(u32::MAX),
                                ))
                        } else {
                            self.retry_delay
                        };
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = state.ctx.cancelled() => return Err(Error::Cancelled),
                        }
                    }
                }
            }
        }

        Err(Error::model(format!(
            "invocation failed after {attempts} attempts: {}",
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string()),
        )))
    }

    /// One streaming invocation: chunks flow through a bounded channel into
    /// the handler while the aggregator rebuilds the full response.
    async fn invoke_streaming(
        &self,
        state: &TurnState,
        request: &InvokeRequest,
        handler: &mut Handler<'_>,
    ) -> Result<ModelResponse> {
        let mut stream = self.provider.invoke_stream(&state.ctx, request).await?;
        let (tx, mut rx) = mpsc::channel::<Result<StreamChunk>>(STREAM_CHANNEL_CAPACITY);

        let producer_ctx = state.ctx.clone();
        let producer = tokio::spawn(async move {
            use futures::StreamExt as _;
            loop {
                tokio::select! {
                    item = stream.next() => {
                        let Some(item) = item else { break };
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                    () = producer_ctx.cancelled() => break,
                }
            }
        });

        let mut aggregator = StreamAggregator::new();
        while let Some(item) = rx.recv().await {
            let chunk = item?;
            match &chunk {
                StreamChunk::Text(delta) => emit(
                    handler,
                    state.stream_events,
                    RunEvent::TextDelta(delta.clone()),
                ),
                StreamChunk::Thinking(delta) => emit(
                    handler,
                    state.stream_events,
                    RunEvent::ThinkingDelta(delta.clone()),
                ),
                StreamChunk::ToolCallStart { id, name, .. } => emit(
                    handler,
                    state.stream_events,
                    RunEvent::ToolCallStarted {
                        id: id.clone(),
                        name: name.clone(),
                    },
                ),
                _ => {}
            }
            aggregator.apply(&chunk);
        }
        producer.abort();

        if state.ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(aggregator.into_response())
    }

    /// Step 10: parse the final content (directly or via the formatter
    /// model) into the output schema.
    async fn parse_structured(&self, ctx: &RunContext, text: &str) -> Result<Option<Value>> {
        let Some(schema) = &self.output_schema else {
            return Ok(None);
        };

        let source = match &self.output_provider {
            Some(formatter) => {
                let request = InvokeRequest::with_messages(vec![
                    Message::system(format!(
                        "Convert the user's content into JSON matching the '{}' schema:\n{}\n\
                         Respond with JSON only.",
                        schema.name, schema.schema,
                    )),
                    Message::user(text),
                ]);
                let response = formatter
                    .invoke(ctx, &request)
                    .await
                    .map_err(|e| Error::model(format!("output formatting failed: {e}")))?;
                response.text().to_owned()
            }
            None => text.to_owned(),
        };

        let body = strip_code_fences(&source);
        serde_json::from_str(body)
            .map(Some)
            .map_err(|e| Error::output_parse(e.to_string(), body))
    }

    /// Step 11: upsert the session and write the run record. Best-effort.
    async fn persist(&self, state: &mut TurnState, final_text: &str) {
        let Some(store) = &self.store else { return };

        let mut session = state
            .session
            .take()
            .unwrap_or_else(|| SessionRecord::new(&state.session_id, state.user_id.clone()));
        session.user_id = state.user_id.clone();
        session.agent_id = Some(self.name.clone());
        session.set_session_state(state_map_to_value(&state.ctx.state_snapshot().await));
        match store.update_session(&session).await {
            Ok(updated) => state.session = Some(updated),
            Err(e) => warn!(error = %e, "session upsert failed"),
        }

        let mut run = AgentRun::new(
            &state.run_id,
            &state.session_id,
            &state.input,
            final_text,
        );
        run.user_id = state.user_id.clone();
        run.messages = state.turn_messages.clone();
        run.metrics = Some(state.metrics.to_value());
        if let Err(e) = store.create_run(&run).await {
            warn!(error = %e, "run persistence failed");
        }
    }

    /// Step 12: append the exchange, keep at most `2·num_history_runs`
    /// messages.
    async fn update_history(&self, state: &TurnState, final_text: &str) {
        if self.num_history_runs == 0 {
            return;
        }
        let mut history = self.history.write().await;
        history.push(Message::user(state.input.clone()));
        history.push(Message::assistant(final_text.to_owned()));
        let cap = 2 * self.num_history_runs;
        if history.len() > cap {
            let excess = history.len() - cap;
            history.drain(..excess);
        }
    }

    /// Best-effort memory creation and periodic session summaries, detached
    /// from the run with their own timeout.
    fn spawn_memory_writes(&self, state: &TurnState, final_text: &str) {
        let Some(memory) = &self.memory else { return };
        let Some(user_id) = &state.user_id else { return };

        let memory = Arc::clone(memory);
        let user_id = user_id.clone();
        let session_id = state.session_id.clone();
        let input = state.input.clone();
        let final_text = final_text.to_owned();
        let conversation = state.turn_messages.clone();
        let completed = self.successful_runs.load(Ordering::SeqCst) + 1;

        tokio::spawn(async move {
            let writes = async {
                if let Err(e) = memory.create_memory(&user_id, &input, &final_text).await {
                    warn!(error = %e, "memory creation failed");
                }
                if completed % SUMMARY_INTERVAL == 0
                    && let Err(e) = memory
                        .create_session_summary(&user_id, &session_id, &conversation)
                        .await
                {
                    warn!(error = %e, "session summary failed");
                }
            };
            if tokio::time::timeout(MEMORY_WRITE_TIMEOUT, writes).await.is_err() {
                warn!("memory writes timed out");
            }
        });
    }
}

fn call_name(calls: &[crate::message::ToolCall], id: &str) -> String {
    calls
        .iter()
        .find(|call| call.id == id)
        .map_or_else(String::new, |call| call.name().to_owned())
}

/// Keep only the `max` most recent historical tool calls; older assistant
/// messages lose their tool calls and their orphaned tool results are
/// dropped.
fn filter_history_tool_calls(mut messages: Vec<Message>, max: Option<usize>) -> Vec<Message> {
    let Some(max) = max else {
        return messages;
    };

    let mut kept = 0usize;
    let mut stripped: HashSet<String> = HashSet::new();
    for message in messages.iter_mut().rev() {
        if message.role == Role::Assistant && message.has_tool_calls() {
            let count = message.tool_call_count();
            if kept + count <= max {
                kept += count;
            } else {
                for call in message.tool_calls.iter().flatten() {
                    stripped.insert(call.id.clone());
                }
                message.strip_tool_calls();
            }
        }
    }

    messages.retain(|message| {
        let orphaned_result = message.role == Role::Tool
            && message
                .tool_call_id
                .as_ref()
                .is_some_and(|id| stripped.contains(id));
        let empty_husk = message.role == Role::Assistant
            && message.content.is_empty()
            && !message.has_tool_calls();
        !(orphaned_result || empty_husk)
    });
    messages
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    fn exchange_with_calls(call_ids: &[&str]) -> Vec<Message> {
        let mut messages = vec![Message::user("question")];
        let calls: Vec<ToolCall> = call_ids
            .iter()
            .map(|id| ToolCall::new(*id, "math_add", "{}"))
            .collect();
        messages.push(Message::assistant_with_tool_calls("", calls));
        for id in call_ids {
            messages.push(Message::tool(*id, "5"));
        }
        messages.push(Message::assistant("answer"));
        messages
    }

    #[test]
    fn no_cap_keeps_everything() {
        let messages = exchange_with_calls(&["c1", "c2"]);
        let filtered = filter_history_tool_calls(messages.clone(), None);
        assert_eq!(filtered.len(), messages.len());
    }

    #[test]
    fn cap_strips_oldest_calls_first() {
        let mut messages = exchange_with_calls(&["c1"]);
        messages.extend(exchange_with_calls(&["c2"]));

        let filtered = filter_history_tool_calls(messages, Some(1));

        // The older exchange lost its tool call and its tool result.
        let tool_messages: Vec<&Message> = filtered
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 1);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("c2"));

        let with_calls = filtered
            .iter()
            .filter(|m| m.has_tool_calls())
            .count();
        assert_eq!(with_calls, 1);
    }

    #[test]
    fn cap_of_zero_strips_all_calls() {
        let filtered = filter_history_tool_calls(exchange_with_calls(&["c1", "c2"]), Some(0));
        assert!(filtered.iter().all(|m| !m.has_tool_calls()));
        assert!(filtered.iter().all(|m| m.role != Role::Tool));
    }
}
