//! Lifecycle hook traits and the ordered hook chain.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::context::RunContext;
use crate::agent::RunResponse;
use crate::error::{Error, Result};

/// A shared, thread-safe [`RunHooks`] trait object.
pub type SharedRunHooks = Arc<dyn RunHooks>;

/// Callbacks fired at the lifecycle seams of a run.
///
/// All methods default to `Ok(())`, so implementations override only the
/// events they care about. Unlike guardrails, hooks are not policy checks —
/// but a hook returning an error still aborts the run with
/// [`Error::Hook`] naming the hook's list position and name.
#[async_trait]
pub trait RunHooks: Send + Sync {
    /// Called on the raw input before any processing.
    async fn on_input(&self, _ctx: &RunContext, _input: &str) -> Result<()> {
        Ok(())
    }

    /// Called after the run produced its response, before it is returned.
    async fn on_response(&self, _ctx: &RunContext, _response: &RunResponse) -> Result<()> {
        Ok(())
    }

    /// Called immediately before a tool is invoked.
    async fn on_tool_start(&self, _ctx: &RunContext, _tool: &str, _args: &Value) -> Result<()> {
        Ok(())
    }

    /// Called immediately after a tool completes.
    ///
    /// `result` is the tool output on success or the error rendering on
    /// failure.
    async fn on_tool_end(&self, _ctx: &RunContext, _tool: &str, _result: &Value) -> Result<()> {
        Ok(())
    }
}

/// A hook implementation registered under a name.
///
/// The name identifies the hook in [`Error::Hook`] failures and in logs.
#[derive(Clone)]
pub struct NamedHooks {
    name: String,
    hooks: SharedRunHooks,
}

impl NamedHooks {
    /// Register hook callbacks under a name.
    #[must_use]
    pub fn new(name: impl Into<String>, hooks: impl RunHooks + 'static) -> Self {
        Self {
            name: name.into(),
            hooks: Arc::new(hooks),
        }
    }

    /// The registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for NamedHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedHooks")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Dispatches an ordered hook list, wrapping failures with position and name.
#[derive(Debug, Clone, Copy)]
pub struct HookChain<'a> {
    hooks: &'a [NamedHooks],
}

impl<'a> HookChain<'a> {
    /// Wrap a hook list.
    #[must_use]
    pub const fn new(hooks: &'a [NamedHooks]) -> Self {
        Self { hooks }
    }

    /// Returns `true` if no hooks are registered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Fire `on_input` across the chain, in order.
    pub async fn input(&self, ctx: &RunContext, input: &str) -> Result<()> {
        for (index, named) in self.hooks.iter().enumerate() {
            named
                .hooks
                .on_input(ctx, input)
                .await
                .map_err(|e| wrap(index, named.name(), &e))?;
        }
        Ok(())
    }

    /// Fire `on_response` across the chain, in order.
    pub async fn response(&self, ctx: &RunContext, response: &RunResponse) -> Result<()> {
        for (index, named) in self.hooks.iter().enumerate() {
            named
                .hooks
                .on_response(ctx, response)
                .await
                .map_err(|e| wrap(index, named.name(), &e))?;
        }
        Ok(())
    }

    /// Fire `on_tool_start` across the chain, in order.
    pub async fn tool_start(&self, ctx: &RunContext, tool: &str, args: &Value) -> Result<()> {
        for (index, named) in self.hooks.iter().enumerate() {
            named
                .hooks
                .on_tool_start(ctx, tool, args)
                .await
                .map_err(|e| wrap(index, named.name(), &e))?;
        }
        Ok(())
    }

    /// Fire `on_tool_end` across the chain, in order.
    pub async fn tool_end(&self, ctx: &RunContext, tool: &str, result: &Value) -> Result<()> {
        for (index, named) in self.hooks.iter().enumerate() {
            named
                .hooks
                .on_tool_end(ctx, tool, result)
                .await
                .map_err(|e| wrap(index, named.name(), &e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: RunHooks + ?Sized> RunHooks for Arc<T> {
    async fn on_input(&self, ctx: &RunContext, input: &str) -> Result<()> {
        (**self).on_input(ctx, input).await
    }

    async fn on_response(&self, ctx: &RunContext, response: &RunResponse) -> Result<()> {
        (**self).on_response(ctx, response).await
    }

    async fn on_tool_start(&self, ctx: &RunContext, tool: &str, args: &Value) -> Result<()> {
        (**self).on_tool_start(ctx, tool, args).await
    }

    async fn on_tool_end(&self, ctx: &RunContext, tool: &str, result: &Value) -> Result<()> {
        (**self).on_tool_end(ctx, tool, result).await
    }
}

/// Label a hook failure with its list position and registered name.
fn wrap(index: usize, name: &str, err: &Error) -> Error {
    Error::hook(index, name, err.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        inputs: AtomicUsize,
        tool_starts: AtomicUsize,
    }

    #[async_trait]
    impl RunHooks for Counting {
        async fn on_input(&self, _ctx: &RunContext, _input: &str) -> Result<()> {
            self.inputs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_tool_start(
            &self,
            _ctx: &RunContext,
            _tool: &str,
            _args: &Value,
        ) -> Result<()> {
            self.tool_starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl RunHooks for Failing {
        async fn on_input(&self, _ctx: &RunContext, _input: &str) -> Result<()> {
            Err(Error::configuration("broken sink"))
        }
    }

    #[tokio::test]
    async fn chain_fires_in_order() {
        let hooks = vec![NamedHooks::new("a", Counting::default())];
        let chain = HookChain::new(&hooks);
        let ctx = RunContext::new();

        chain.input(&ctx, "hello").await.unwrap();
        chain
            .tool_start(&ctx, "math_add", &Value::Null)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failure_names_hook_and_index() {
        let hooks = vec![
            NamedHooks::new("first", Counting::default()),
            NamedHooks::new("audit", Failing),
        ];
        let chain = HookChain::new(&hooks);
        let ctx = RunContext::new();

        let err = chain.input(&ctx, "hello").await.unwrap_err();
        match err {
            Error::Hook { index, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(name, "audit");
            }
            other => panic!("expected hook error, got {other}"),
        }
    }

    #[tokio::test]
    async fn empty_chain_is_noop() {
        let chain = HookChain::new(&[]);
        assert!(chain.is_empty());
        chain.input(&RunContext::new(), "x").await.unwrap();
    }
}
