//! Tracing-backed hook implementation.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::context::RunContext;
use super::hooks::RunHooks;
use crate::agent::RunResponse;
use crate::error::Result;

/// Hooks that log every lifecycle event through `tracing`.
///
/// Input and response bodies are logged at debug level; tool boundaries at
/// info level with the tool name.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

#[async_trait]
impl RunHooks for LoggingHooks {
    async fn on_input(&self, ctx: &RunContext, input: &str) -> Result<()> {
        debug!(
            agent = ctx.agent_name().unwrap_or("<unnamed>"),
            input_len = input.len(),
            "run input received",
        );
        Ok(())
    }

    async fn on_response(&self, ctx: &RunContext, response: &RunResponse) -> Result<()> {
        info!(
            agent = ctx.agent_name().unwrap_or("<unnamed>"),
            run_id = %response.run_id,
            tokens = ctx.usage().total_tokens,
            "run response produced",
        );
        Ok(())
    }

    async fn on_tool_start(&self, ctx: &RunContext, tool: &str, args: &Value) -> Result<()> {
        info!(
            agent = ctx.agent_name().unwrap_or("<unnamed>"),
            tool,
            args = %args,
            "tool call starting",
        );
        Ok(())
    }

    async fn on_tool_end(&self, ctx: &RunContext, tool: &str, result: &Value) -> Result<()> {
        debug!(
            agent = ctx.agent_name().unwrap_or("<unnamed>"),
            tool,
            result = %result,
            "tool call finished",
        );
        Ok(())
    }
}
