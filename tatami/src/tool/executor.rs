//! Parallel tool dispatch with retries, validation, and wrapping.
//!
//! [`ToolExecutor::execute_parallel`] schedules a batch of model-requested
//! tool calls under a counting semaphore, retries transient failures with
//! jittered (optionally exponential) backoff, validates arguments against
//! each method's [`TypeSchema`](crate::schema::TypeSchema), and wraps every
//! call in the configured order: tool guardrails → before hooks → underlying
//! tool → after hooks. The returned outcome vector preserves request order
//! regardless of real-time completion order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::cache::{CachedValue, NoopCache, SharedToolCache};
use crate::callback::{HookChain, NamedHooks, RunContext};
use crate::error::{Error, GuardrailStage, Result, ToolError};
use crate::guardrail::{Guardrail, run_all};
use crate::message::ToolCall;

use super::ToolBox;

/// Configuration for one dispatch batch.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Width of the concurrency semaphore.
    pub max_parallel: usize,
    /// Extra tries after the first failure (total tries = `retry_attempts + 1`).
    pub retry_attempts: usize,
    /// Base delay between tries.
    pub retry_delay: Duration,
    /// Double the delay each attempt instead of keeping it constant.
    pub exponential_backoff: bool,
    /// Validate arguments against the method schema before invocation.
    pub validate_args: bool,
    /// Per-call timeout; `None` waits indefinitely (still cancellable).
    pub timeout_per_call: Option<Duration>,
    /// Abort the whole batch on the first failed call instead of reporting
    /// the failure back to the model.
    pub fail_fast: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            retry_attempts: 0,
            retry_delay: Duration::from_millis(100),
            exponential_backoff: false,
            validate_args: true,
            timeout_per_call: None,
            fail_fast: false,
        }
    }
}

impl ExecutorConfig {
    /// Sets the semaphore width.
    #[must_use]
    pub const fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn retries(mut self, attempts: usize, delay: Duration, exponential: bool) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self.exponential_backoff = exponential;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_call = Some(timeout);
        self
    }

    /// Enables fail-fast batch semantics.
    #[must_use]
    pub const fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }
}

/// Result record of one dispatched call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallOutcome {
    /// The tool call id from the model.
    pub id: String,
    /// Toolkit name (the call name itself when no binding resolved).
    pub tool: String,
    /// Method name within the toolkit.
    pub method: String,
    /// Parsed arguments (Null when parsing failed).
    pub args: Value,
    /// Output value on success.
    pub result: Option<Value>,
    /// Error rendering on failure.
    pub error: Option<String>,
    /// Wall time spent on this call.
    pub duration: Duration,
    /// Tries performed (0 when the call never reached the tool).
    pub attempts: usize,
    /// Whether the call produced a result.
    pub success: bool,
    /// Whether the result came from the cache.
    pub cached: bool,
}

impl ToolCallOutcome {
    /// Render the outcome as tool-role message content for the model.
    #[must_use]
    pub fn content_for_model(&self) -> String {
        match (&self.result, &self.error) {
            (Some(value), _) => value.to_string(),
            (None, Some(error)) => format!("Error: {error}"),
            (None, None) => String::new(),
        }
    }
}

/// Aggregate statistics over one outcome vector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    /// Number of calls dispatched.
    pub total_calls: usize,
    /// Calls that produced a result.
    pub successful: usize,
    /// Calls that failed.
    pub failed: usize,
    /// Sum of per-call wall times.
    pub total_duration: Duration,
    /// Fastest call.
    pub min_duration: Duration,
    /// Slowest call.
    pub max_duration: Duration,
    /// Mean call duration.
    pub avg_duration: Duration,
    /// Sum of retries across all calls.
    pub total_retries: usize,
}

impl BatchStats {
    /// Compute statistics over an outcome vector.
    #[must_use]
    pub fn from_outcomes(outcomes: &[ToolCallOutcome]) -> Self {
        if outcomes.is_empty() {
            return Self::default();
        }
        let total_duration: Duration = outcomes.iter().map(|o| o.duration).sum();
        Self {
            total_calls: outcomes.len(),
            successful: outcomes.iter().filter(|o| o.success).count(),
            failed: outcomes.iter().filter(|o| !o.success).count(),
            total_duration,
            min_duration: outcomes.iter().map(|o| o.duration).min().unwrap_or_default(),
            max_duration: outcomes.iter().map(|o| o.duration).max().unwrap_or_default(),
            avg_duration: total_duration / u32::try_from(outcomes.len()).unwrap_or(u32::MAX),
            total_retries: outcomes
                .iter()
                .map(|o| o.attempts.saturating_sub(1))
                .sum(),
        }
    }
}

/// Lifecycle of a [`ToolCallBatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchStatus {
    /// Not yet started.
    #[default]
    Pending,
    /// Dispatch in progress.
    Running,
    /// Every call succeeded.
    Completed,
    /// At least one call failed, or the batch aborted.
    Failed,
}

/// A batch of tool calls moving through `Pending → Running → {Completed | Failed}`.
#[derive(Debug)]
pub struct ToolCallBatch {
    /// Batch identifier.
    pub id: String,
    /// The requested calls, in model order.
    pub requests: Vec<ToolCall>,
    /// Dispatch configuration.
    pub config: ExecutorConfig,
    /// Current lifecycle state.
    pub status: BatchStatus,
    /// Failure rendering when the batch failed.
    pub error: Option<String>,
    /// Wall time of the whole batch.
    pub duration: Duration,
    /// Per-call outcomes, in request order.
    pub results: Vec<ToolCallOutcome>,
}

impl ToolCallBatch {
    /// Create a pending batch.
    #[must_use]
    pub fn new(requests: Vec<ToolCall>, config: ExecutorConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            requests,
            config,
            status: BatchStatus::Pending,
            error: None,
            duration: Duration::ZERO,
            results: Vec::new(),
        }
    }

    /// Dispatch the batch through an executor.
    pub async fn run(&mut self, executor: &ToolExecutor, ctx: &RunContext) -> Result<()> {
        self.status = BatchStatus::Running;
        let started = Instant::now();

        match executor
            .execute_parallel(ctx, &self.requests, &self.config)
            .await
        {
            Ok(results) => {
                self.duration = started.elapsed();
                self.status = if results.iter().all(|r| r.success) {
                    BatchStatus::Completed
                } else {
                    BatchStatus::Failed
                };
                self.error = results
                    .iter()
                    .find(|r| !r.success)
                    .and_then(|r| r.error.clone());
                self.results = results;
                Ok(())
            }
            Err(e) => {
                self.duration = started.elapsed();
                self.status = BatchStatus::Failed;
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Statistics over the batch results.
    #[must_use]
    pub fn stats(&self) -> BatchStats {
        BatchStats::from_outcomes(&self.results)
    }
}

/// Schedules and wraps tool calls for an agent.
#[derive(Clone)]
pub struct ToolExecutor {
    toolbox: ToolBox,
    cache: SharedToolCache,
    guardrails: Vec<Guardrail>,
    hooks: Vec<NamedHooks>,
}

impl ToolExecutor {
    /// Create an executor over a toolbox, with caching disabled.
    #[must_use]
    pub fn new(toolbox: ToolBox) -> Self {
        Self {
            toolbox,
            cache: Arc::new(NoopCache),
            guardrails: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Attach a result cache.
    #[must_use]
    pub fn with_cache(mut self, cache: SharedToolCache) -> Self {
        self.cache = cache;
        self
    }

    /// Attach per-tool-call guardrails.
    #[must_use]
    pub fn with_guardrails(mut self, guardrails: Vec<Guardrail>) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Attach before/after tool hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Vec<NamedHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Dispatch a batch of calls, bounded by the config's semaphore width.
    ///
    /// The returned vector preserves request order. Individual failures are
    /// reported inside their [`ToolCallOutcome`]; the method itself fails
    /// only on cancellation or under fail-fast semantics.
    pub async fn execute_parallel(
        &self,
        ctx: &RunContext,
        calls: &[ToolCall],
        config: &ExecutorConfig,
    ) -> Result<Vec<ToolCallOutcome>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(config.max_parallel.max(1)));
        let futures: Vec<_> = calls
            .iter()
            .map(|call| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = tokio::select! {
                        permit = semaphore.acquire() => permit,
                        () = ctx.cancelled() => return Self::cancelled_outcome(call),
                    };
                    self.execute_one(ctx, call, config).await
                }
            })
            .collect();

        // join_all preserves order: outcomes[i] corresponds to calls[i].
        let outcomes = futures::future::join_all(futures).await;

        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if config.fail_fast
            && let Some(failed) = outcomes.iter().find(|o| !o.success)
        {
            return Err(ToolError::execution(
                failed.tool.clone(),
                failed.error.clone().unwrap_or_else(|| "failed".to_owned()),
            )
            .into());
        }

        Ok(outcomes)
    }

    fn cancelled_outcome(call: &ToolCall) -> ToolCallOutcome {
        ToolCallOutcome {
            id: call.id.clone(),
            tool: call.name().to_owned(),
            method: String::new(),
            args: Value::Null,
            result: None,
            error: Some(ToolError::Cancelled.to_string()),
            duration: Duration::ZERO,
            attempts: 0,
            success: false,
            cached: false,
        }
    }

    /// Execute one call with validation, wrapping, caching, and retries.
    async fn execute_one(
        &self,
        ctx: &RunContext,
        call: &ToolCall,
        config: &ExecutorConfig,
    ) -> ToolCallOutcome {
        let span = info_span!(
            "tool",
            tool.name = %call.name(),
            tool.id = %call.id,
            tool.success = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            let name = call.name();
            let mut outcome = Self::cancelled_outcome(call);

            // Parse arguments before anything touches them.
            let args = match call.parse_arguments() {
                Ok(args) => args,
                Err(e) => {
                    let error = ToolError::invalid_arguments(name, e.to_string());
                    return Self::finish(outcome, None, Some(error.to_string()), started);
                }
            };
            outcome.args = args.clone();

            // Resolve the binding.
            let Some(binding) = self.toolbox.binding(name) else {
                let error = ToolError::not_found(name);
                warn!(tool = name, "tool not found");
                return Self::finish(outcome, None, Some(error.to_string()), started);
            };
            outcome.tool = binding.tool.clone();
            outcome.method = binding.method.clone();

            // Declared types and required fields, before invocation.
            if config.validate_args
                && let Err(errors) = binding.params.validate(&args)
            {
                let error = ToolError::invalid_arguments(name, errors.to_string());
                return Self::finish(outcome, None, Some(error.to_string()), started);
            }

            // Tool guardrails → before hooks → tool → after hooks.
            if let Err(e) = run_all(&self.guardrails, ctx, GuardrailStage::ToolCall, &args).await {
                return Self::finish(outcome, None, Some(e.to_string()), started);
            }

            let hooks = HookChain::new(&self.hooks);
            if let Err(e) = hooks.tool_start(ctx, name, &args).await {
                return Self::finish(outcome, None, Some(e.to_string()), started);
            }

            // Cache consult happens inside the wrapping so hooks observe hits.
            if let Some(cached) = self.cache.get(name, &args).await {
                outcome.cached = true;
                let (result, error) = match cached {
                    CachedValue::Success(value) => (Some(value), None),
                    CachedValue::Failure(message) => (None, Some(message)),
                };
                let rendered = result.clone().unwrap_or(Value::Null);
                let _ = hooks.tool_end(ctx, name, &rendered).await;
                return Self::finish(outcome, result, error, started);
            }

            // Invocation with retries.
            let mut attempts = 0usize;
            let invoked = loop {
                attempts += 1;
                match self.invoke(ctx, binding, name, &args, config).await {
                    Ok(value) => break Ok(value),
                    Err(ToolError::Cancelled) => break Err(ToolError::Cancelled),
                    Err(e) if attempts <= config.retry_attempts => {
                        let delay = retry_delay(config, attempts - 1);
                        debug!(tool = name, attempt = attempts, ?delay, error = %e, "retrying tool call");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = ctx.cancelled() => break Err(ToolError::Cancelled),
                        }
                    }
                    Err(e) => break Err(e),
                }
            };
            outcome.attempts = attempts;

            match invoked {
                Ok(value) => {
                    self.cache.set(name, &args, value.clone()).await;
                    if let Err(e) = hooks.tool_end(ctx, name, &value).await {
                        return Self::finish(outcome, None, Some(e.to_string()), started);
                    }
                    Self::finish(outcome, Some(value), None, started)
                }
                Err(error) => {
                    let rendered = error.to_string();
                    if !matches!(error, ToolError::Cancelled) {
                        self.cache.set_error(name, &args, &rendered).await;
                    }
                    // The tool error wins over any after-hook failure.
                    let _ = hooks
                        .tool_end(ctx, name, &Value::String(rendered.clone()))
                        .await;
                    Self::finish(outcome, None, Some(rendered), started)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// One invocation attempt, bounded by timeout and cancellation.
    async fn invoke(
        &self,
        ctx: &RunContext,
        binding: &super::ToolBinding,
        name: &str,
        args: &Value,
        config: &ExecutorConfig,
    ) -> super::ToolResult<Value> {
        let call = binding.execute(args.clone());
        let bounded = async {
            match config.timeout_per_call {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::timeout(name, limit.as_secs())),
                },
                None => call.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            () = ctx.cancelled() => Err(ToolError::Cancelled),
        }
    }

    fn finish(
        mut outcome: ToolCallOutcome,
        result: Option<Value>,
        error: Option<String>,
        started: Instant,
    ) -> ToolCallOutcome {
        outcome.success = result.is_some();
        outcome.result = result;
        outcome.error = error;
        outcome.duration = started.elapsed();

        let span = tracing::Span::current();
        span.record("tool.success", outcome.success);
        if let Some(error) = &outcome.error {
            span.record("error", error.as_str());
        }
        outcome
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.toolbox.names())
            .field("guardrails", &self.guardrails.len())
            .finish_non_exhaustive()
    }
}

/// Delay before the next try: base, or base·2^attempt, with ±10% jitter.
fn retry_delay(config: &ExecutorConfig, attempt: usize) -> Duration {
    let base = if config.exponential_backoff {
        let factor = 2u32.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
        config.retry_delay.saturating_mul(factor)
    } else {
        config.retry_delay
    };
    base.mul_f64(0.9 + fastrand::f64() * 0.2)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, MemoryToolCache};
    use crate::schema::{SchemaField, TypeSchema};
    use crate::tool::{ToolMethod, Toolkit, ToolResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `failures` times, then succeeds.
    struct FlakyToolkit {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Toolkit for FlakyToolkit {
        fn name(&self) -> &str {
            "flaky"
        }

        fn methods(&self) -> Vec<ToolMethod> {
            vec![ToolMethod::new(
                "work",
                "Fails a configured number of times.",
                TypeSchema::object(vec![]),
            )]
        }

        async fn execute(&self, _method: &str, _args: Value) -> ToolResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ToolError::execution("flaky", "transient"))
            } else {
                Ok(Value::from("done"))
            }
        }
    }

    struct MathToolkit;

    #[async_trait]
    impl Toolkit for MathToolkit {
        fn name(&self) -> &str {
            "math"
        }

        fn methods(&self) -> Vec<ToolMethod> {
            vec![ToolMethod::new(
                "add",
                "Add two integers.",
                TypeSchema::object(vec![
                    SchemaField::new("a", TypeSchema::integer()),
                    SchemaField::new("b", TypeSchema::integer()),
                ]),
            )]
        }

        async fn execute(&self, _method: &str, args: Value) -> ToolResult<Value> {
            let a = args["a"].as_i64().unwrap_or_default();
            let b = args["b"].as_i64().unwrap_or_default();
            Ok(Value::from(a + b))
        }
    }

    struct SlowToolkit;

    #[async_trait]
    impl Toolkit for SlowToolkit {
        fn name(&self) -> &str {
            "slow"
        }

        fn methods(&self) -> Vec<ToolMethod> {
            vec![ToolMethod::new(
                "wait",
                "Sleeps for a while.",
                TypeSchema::object(vec![]),
            )]
        }

        async fn execute(&self, _method: &str, _args: Value) -> ToolResult<Value> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
    }

    fn executor_with(toolkit: impl Toolkit + 'static) -> ToolExecutor {
        let mut toolbox = ToolBox::new();
        toolbox.add_toolkit(toolkit);
        ToolExecutor::new(toolbox)
    }

    #[tokio::test]
    async fn dispatch_preserves_request_order() {
        let executor = executor_with(MathToolkit);
        let calls = vec![
            ToolCall::new("c1", "math_add", r#"{"a":1,"b":1}"#),
            ToolCall::new("c2", "math_add", r#"{"a":2,"b":2}"#),
            ToolCall::new("c3", "math_add", r#"{"a":3,"b":3}"#),
        ];
        let outcomes = executor
            .execute_parallel(&RunContext::new(), &calls, &ExecutorConfig::default())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].result, Some(Value::from(2)));
        assert_eq!(outcomes[1].result, Some(Value::from(4)));
        assert_eq!(outcomes[2].result, Some(Value::from(6)));
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[0].tool, "math");
        assert_eq!(outcomes[0].method, "add");
    }

    #[tokio::test]
    async fn retry_until_success_counts_attempts() {
        let executor = executor_with(FlakyToolkit {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let config = ExecutorConfig::default().retries(2, Duration::from_millis(10), true);
        let calls = vec![ToolCall::new("c1", "flaky_work", "{}")];

        let started = Instant::now();
        let outcomes = executor
            .execute_parallel(&RunContext::new(), &calls, &config)
            .await
            .unwrap();

        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].attempts, 3);
        // Two sleeps: ~10ms then ~20ms, each with ±10% jitter.
        assert!(started.elapsed() >= Duration::from_millis(26));

        let stats = BatchStats::from_outcomes(&outcomes);
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.successful, 1);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let executor = executor_with(FlakyToolkit {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let config = ExecutorConfig::default().retries(2, Duration::from_millis(1), false);
        let calls = vec![ToolCall::new("c1", "flaky_work", "{}")];

        let outcomes = executor
            .execute_parallel(&RunContext::new(), &calls, &config)
            .await
            .unwrap();
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].attempts, 3);
    }

    #[tokio::test]
    async fn validation_rejects_before_invocation() {
        let executor = executor_with(MathToolkit);
        let calls = vec![ToolCall::new("c1", "math_add", r#"{"a":"one"}"#)];

        let outcomes = executor
            .execute_parallel(&RunContext::new(), &calls, &ExecutorConfig::default())
            .await
            .unwrap();
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].attempts, 0);
        assert!(outcomes[0].error.as_ref().unwrap().contains("invalid arguments"));
    }

    #[tokio::test]
    async fn unknown_tool_reports_not_found() {
        let executor = executor_with(MathToolkit);
        let calls = vec![ToolCall::new("c1", "ghost", "{}")];

        let outcomes = executor
            .execute_parallel(&RunContext::new(), &calls, &ExecutorConfig::default())
            .await
            .unwrap();
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_ref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn timeout_produces_timeout_error() {
        let executor = executor_with(SlowToolkit);
        let config = ExecutorConfig::default().timeout(Duration::from_millis(20));
        let calls = vec![ToolCall::new("c1", "slow_wait", "{}")];

        let outcomes = executor
            .execute_parallel(&RunContext::new(), &calls, &config)
            .await
            .unwrap();
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_ref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_batch() {
        let executor = executor_with(SlowToolkit);
        let ctx = RunContext::new();
        let calls = vec![ToolCall::new("c1", "slow_wait", "{}")];

        let cancel_ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_ctx.cancel();
        });

        let started = Instant::now();
        let err = executor
            .execute_parallel(&ctx, &calls, &ExecutorConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_during_retry_sleep_returns_promptly() {
        let executor = executor_with(FlakyToolkit {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let config = ExecutorConfig::default().retries(5, Duration::from_secs(10), false);
        let ctx = RunContext::new();
        let calls = vec![ToolCall::new("c1", "flaky_work", "{}")];

        let cancel_ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_ctx.cancel();
        });

        let started = Instant::now();
        let result = executor.execute_parallel(&ctx, &calls, &config).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn fail_fast_propagates_the_failure() {
        let executor = executor_with(FlakyToolkit {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let config = ExecutorConfig::default().fail_fast(true);
        let calls = vec![ToolCall::new("c1", "flaky_work", "{}")];

        let err = executor
            .execute_parallel(&RunContext::new(), &calls, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(ToolError::Execution { .. })));
    }

    #[tokio::test]
    async fn cache_hit_skips_invocation() {
        let cache = Arc::new(MemoryToolCache::new(CacheConfig::default()));
        let counting = FlakyToolkit {
            failures: 0,
            calls: AtomicUsize::new(0),
        };
        let mut toolbox = ToolBox::new();
        toolbox.add_toolkit(counting);
        let executor = ToolExecutor::new(toolbox).with_cache(cache);

        let calls = vec![ToolCall::new("c1", "flaky_work", "{}")];
        let config = ExecutorConfig::default();
        let ctx = RunContext::new();

        let first = executor.execute_parallel(&ctx, &calls, &config).await.unwrap();
        assert!(!first[0].cached);

        let second = executor.execute_parallel(&ctx, &calls, &config).await.unwrap();
        assert!(second[0].cached);
        assert_eq!(second[0].attempts, 0);
        assert_eq!(second[0].result, Some(Value::from("done")));
    }

    #[tokio::test]
    async fn tool_guardrail_blocks_invocation() {
        use crate::guardrail::{Guardrail, GuardrailCheck};

        struct Deny;

        #[async_trait]
        impl GuardrailCheck for Deny {
            async fn check(&self, _ctx: &RunContext, _data: &Value) -> crate::error::Result<()> {
                Err(Error::configuration("arguments rejected"))
            }
        }

        let mut toolbox = ToolBox::new();
        toolbox.add_toolkit(MathToolkit);
        let executor =
            ToolExecutor::new(toolbox).with_guardrails(vec![Guardrail::new("deny", Deny)]);

        let calls = vec![ToolCall::new("c1", "math_add", r#"{"a":1,"b":1}"#)];
        let outcomes = executor
            .execute_parallel(&RunContext::new(), &calls, &ExecutorConfig::default())
            .await
            .unwrap();
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].attempts, 0);
        assert!(outcomes[0].error.as_ref().unwrap().contains("deny"));
    }

    #[tokio::test]
    async fn batch_state_machine_transitions() {
        let executor = executor_with(MathToolkit);
        let mut batch = ToolCallBatch::new(
            vec![ToolCall::new("c1", "math_add", r#"{"a":2,"b":3}"#)],
            ExecutorConfig::default(),
        );
        assert_eq!(batch.status, BatchStatus::Pending);

        batch.run(&executor, &RunContext::new()).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.stats().total_calls, 1);

        let mut failing = ToolCallBatch::new(
            vec![ToolCall::new("c1", "ghost", "{}")],
            ExecutorConfig::default(),
        );
        failing.run(&executor, &RunContext::new()).await.unwrap();
        assert_eq!(failing.status, BatchStatus::Failed);
        assert!(failing.error.is_some());
    }

    #[tokio::test]
    async fn semaphore_bounds_concurrency() {
        struct Gauge {
            current: AtomicUsize,
            peak: AtomicUsize,
        }

        struct GaugedToolkit(Arc<Gauge>);

        #[async_trait]
        impl Toolkit for GaugedToolkit {
            fn name(&self) -> &str {
                "gauged"
            }

            fn methods(&self) -> Vec<ToolMethod> {
                vec![ToolMethod::new("tick", "", TypeSchema::object(vec![]))]
            }

            async fn execute(&self, _method: &str, _args: Value) -> ToolResult<Value> {
                let now = self.0.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.0.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.0.current.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let executor = executor_with(GaugedToolkit(Arc::clone(&gauge)));
        let config = ExecutorConfig::default().max_parallel(2);

        let calls: Vec<ToolCall> = (0..6)
            .map(|i| ToolCall::new(format!("c{i}"), "gauged_tick", "{}"))
            .collect();
        executor
            .execute_parallel(&RunContext::new(), &calls, &config)
            .await
            .unwrap();

        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }
}
