//! Guardrails — named policy checks with veto power.
//!
//! A [`Guardrail`] wraps a [`GuardrailCheck`]: an async predicate over the
//! run context and a JSON rendering of the data at one of three seams —
//! the raw input, the final output, or an individual tool call's arguments.
//! Guardrail lists run in order and the first failure aborts with
//! [`Error::GuardrailBlocked`](crate::error::Error) naming that guardrail.
//!
//! ```rust,ignore
//! struct NoInjection;
//!
//! #[async_trait::async_trait]
//! impl GuardrailCheck for NoInjection {
//!     async fn check(&self, _ctx: &RunContext, data: &Value) -> Result<()> {
//!         let text = data.as_str().unwrap_or_default();
//!         if text.contains("ignore previous instructions") {
//!             return Err(Error::configuration("prompt injection detected"));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let agent = Agent::builder("support")
//!     .input_guardrail(Guardrail::new("no-injection", NoInjection))
//!     .build()?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::callback::RunContext;
use crate::error::{Error, GuardrailStage, Result};

/// Check logic behind a guardrail.
#[async_trait]
pub trait GuardrailCheck: Send + Sync {
    /// Inspect the data; return an error to veto the run.
    async fn check(&self, ctx: &RunContext, data: &Value) -> Result<()>;
}

/// A named policy check applied at a run seam.
#[derive(Clone)]
pub struct Guardrail {
    name: String,
    description: String,
    check: Arc<dyn GuardrailCheck>,
}

impl Guardrail {
    /// Create a guardrail with the given name and check logic.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl GuardrailCheck + 'static) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            check: Arc::new(check),
        }
    }

    /// Attach a description (for diagnostics and tool listings).
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The guardrail's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The guardrail's description.
    #[must_use]
    pub fn describe(&self) -> &str {
        &self.description
    }

    /// Run the check, mapping a veto into [`Error::GuardrailBlocked`].
    pub async fn run(&self, ctx: &RunContext, stage: GuardrailStage, data: &Value) -> Result<()> {
        self.check
            .check(ctx, data)
            .await
            .map_err(|e| Error::guardrail(&self.name, stage, e.to_string()))
    }
}

impl std::fmt::Debug for Guardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardrail")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Run a guardrail list in order; the first failure aborts.
pub async fn run_all(
    guardrails: &[Guardrail],
    ctx: &RunContext,
    stage: GuardrailStage,
    data: &Value,
) -> Result<()> {
    for guardrail in guardrails {
        guardrail.run(ctx, stage, data).await?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Reject(&'static str);

    #[async_trait]
    impl GuardrailCheck for Reject {
        async fn check(&self, _ctx: &RunContext, _data: &Value) -> Result<()> {
            Err(Error::configuration(self.0))
        }
    }

    struct Accept;

    #[async_trait]
    impl GuardrailCheck for Accept {
        async fn check(&self, _ctx: &RunContext, _data: &Value) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn passing_list_returns_ok() {
        let guardrails = vec![
            Guardrail::new("a", Accept),
            Guardrail::new("b", Accept),
        ];
        run_all(
            &guardrails,
            &RunContext::new(),
            GuardrailStage::Input,
            &Value::String("hello".into()),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn first_failure_wins() {
        let guardrails = vec![
            Guardrail::new("pass", Accept),
            Guardrail::new("first-block", Reject("nope")),
            Guardrail::new("second-block", Reject("also nope")),
        ];
        let err = run_all(
            &guardrails,
            &RunContext::new(),
            GuardrailStage::Input,
            &Value::Null,
        )
        .await
        .unwrap_err();

        match err {
            Error::GuardrailBlocked {
                guardrail, stage, ..
            } => {
                assert_eq!(guardrail, "first-block");
                assert_eq!(stage, GuardrailStage::Input);
            }
            other => panic!("expected guardrail error, got {other}"),
        }
    }

    #[tokio::test]
    async fn stage_is_carried_through() {
        let guardrails = vec![Guardrail::new("tool-check", Reject("bad args"))];
        let err = run_all(
            &guardrails,
            &RunContext::new(),
            GuardrailStage::ToolCall,
            &Value::Null,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("tool call"));
    }

    #[test]
    fn description_builder() {
        let guardrail = Guardrail::new("pii", Accept).description("blocks personal data");
        assert_eq!(guardrail.name(), "pii");
        assert_eq!(guardrail.describe(), "blocks personal data");
    }
}
