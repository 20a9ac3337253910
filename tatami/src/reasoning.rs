//! Step-wise reasoning sub-agent.
//!
//! A [`Reasoner`] runs before the main model invocation: it drives its own
//! provider (which may differ from the agent's) over the same tool set and
//! produces a bounded chain of [`ReasoningStep`]s. The chain is serialized
//! into a single assistant message appended to the working context.
//!
//! Planning is best-effort: any failure yields an empty chain. A reasoner
//! never runs inside another reasoning pass — one level, enforced through
//! [`RunContext::is_reasoning`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::callback::RunContext;
use crate::message::Message;
use crate::model::{InvokeRequest, SharedModelProvider};
use crate::schema::strip_code_fences;
use crate::tool::ToolBox;
use crate::tool::executor::{ExecutorConfig, ToolExecutor};

/// What the planner wants to do after a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Keep reasoning.
    #[default]
    Continue,
    /// Double-check the result so far.
    Validate,
    /// The chain is complete.
    FinalAnswer,
    /// Discard the chain and start over.
    Reset,
}

/// One element of a reasoning chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Short step label.
    #[serde(default)]
    pub title: String,
    /// The reasoning behind this step.
    #[serde(default)]
    pub reasoning: String,
    /// Action taken (e.g. a tool consulted).
    #[serde(default)]
    pub action: Option<String>,
    /// Observed result of the action.
    #[serde(default)]
    pub result: Option<String>,
    /// Planner confidence in `0.0..=1.0`.
    #[serde(default)]
    pub confidence: f64,
    /// What to do next.
    #[serde(default)]
    pub next: NextAction,
}

/// Bounds on the chain length.
#[derive(Debug, Clone, Copy)]
pub struct ReasonerConfig {
    /// Fewest steps worth emitting.
    pub min_steps: usize,
    /// Hard cap on chain length and planner turns.
    pub max_steps: usize,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            min_steps: 1,
            max_steps: 3,
        }
    }
}

/// Wire shape the planner model is asked to produce.
#[derive(Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    steps: Vec<ReasoningStep>,
}

const PLANNER_INSTRUCTIONS: &str = "You are a planning assistant. Break the user's request \
into reasoning steps before it is answered. Respond with JSON only: \
{\"steps\": [{\"title\": string, \"reasoning\": string, \"action\": string|null, \
\"result\": string|null, \"confidence\": number, \
\"next\": \"continue\"|\"validate\"|\"final_answer\"|\"reset\"}]}. \
You may call the available tools to ground a step's result. \
End the chain with a step whose next is \"final_answer\".";

/// The reasoning sub-agent.
#[derive(Clone)]
pub struct Reasoner {
    provider: SharedModelProvider,
    toolbox: ToolBox,
    config: ReasonerConfig,
}

impl Reasoner {
    /// Create a reasoner with its own provider and the agent's tool set.
    #[must_use]
    pub fn new(provider: SharedModelProvider, toolbox: ToolBox, config: ReasonerConfig) -> Self {
        Self {
            provider,
            toolbox,
            config,
        }
    }

    /// Produce a reasoning chain for the pending request.
    ///
    /// Returns an empty chain on any failure, on cancellation, or when
    /// invoked from inside another reasoning pass.
    pub async fn plan(&self, ctx: &RunContext, conversation: &[Message]) -> Vec<ReasoningStep> {
        if ctx.is_reasoning() {
            warn!("nested reasoning pass refused");
            return Vec::new();
        }
        let ctx = ctx.for_reasoning();

        let mut messages = vec![Message::system(PLANNER_INSTRUCTIONS)];
        messages.extend(conversation.iter().cloned());

        let executor = ToolExecutor::new(self.toolbox.clone());
        let dispatch = ExecutorConfig::default();

        // The planner gets at most max_steps turns: tool turns included.
        for _ in 0..self.config.max_steps.max(1) {
            let request = InvokeRequest::with_messages(messages.clone())
                .tools(self.toolbox.definitions());

            let response = match self.provider.invoke(&ctx, &request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "reasoning pass failed");
                    return Vec::new();
                }
            };

            if let Some(calls) = response.tool_calls() {
                let calls = calls.to_vec();
                messages.push(response.message.clone());
                match executor.execute_parallel(&ctx, &calls, &dispatch).await {
                    Ok(outcomes) => {
                        for outcome in outcomes {
                            messages.push(Message::tool(
                                outcome.id.clone(),
                                outcome.content_for_model(),
                            ));
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "reasoning tool dispatch failed");
                        return Vec::new();
                    }
                }
                continue;
            }

            return self.parse_steps(response.text());
        }

        warn!(max_steps = self.config.max_steps, "planner exhausted its turns");
        Vec::new()
    }

    fn parse_steps(&self, text: &str) -> Vec<ReasoningStep> {
        let body = strip_code_fences(text);
        let parsed: Option<Vec<ReasoningStep>> = serde_json::from_str::<PlannerOutput>(body)
            .map(|output| output.steps)
            .or_else(|_| serde_json::from_str::<Vec<ReasoningStep>>(body))
            .ok();

        let Some(mut steps) = parsed else {
            warn!("planner output did not parse, skipping reasoning");
            return Vec::new();
        };

        // Truncate at the first terminal step, then apply the hard cap.
        if let Some(end) = steps.iter().position(|s| s.next == NextAction::FinalAnswer) {
            steps.truncate(end + 1);
        }
        steps.truncate(self.config.max_steps.max(self.config.min_steps));
        debug!(steps = steps.len(), "reasoning chain produced");
        steps
    }

    /// Serialize a chain into one assistant message.
    #[must_use]
    pub fn chain_to_message(steps: &[ReasoningStep]) -> Message {
        let mut text = String::from("Reasoning so far:\n");
        for (index, step) in steps.iter().enumerate() {
            text.push_str(&format!("{}. {}: {}", index + 1, step.title, step.reasoning));
            if let Some(action) = &step.action {
                text.push_str(&format!(" [action: {action}]"));
            }
            if let Some(result) = &step.result {
                text.push_str(&format!(" [result: {result}]"));
            }
            text.push('\n');
        }
        Message::assistant(text.trim_end())
    }
}

impl std::fmt::Debug for Reasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reasoner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use std::sync::Arc;

    fn steps_json() -> &'static str {
        r#"{"steps": [
            {"title": "understand", "reasoning": "user wants a sum", "confidence": 0.9,
             "next": "continue"},
            {"title": "answer", "reasoning": "2+3 is 5", "confidence": 1.0,
             "next": "final_answer"}
        ]}"#
    }

    #[tokio::test]
    async fn plan_parses_scripted_steps() {
        let provider = Arc::new(MockProvider::with_text_responses([steps_json()]));
        let reasoner = Reasoner::new(provider, ToolBox::new(), ReasonerConfig::default());

        let steps = reasoner
            .plan(&RunContext::new(), &[Message::user("Add 2 and 3")])
            .await;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].title, "understand");
        assert_eq!(steps[1].next, NextAction::FinalAnswer);
    }

    #[tokio::test]
    async fn plan_accepts_fenced_bare_array() {
        let fenced = format!(
            "```json\n[{{\"title\": \"only\", \"reasoning\": \"r\", \"next\": \"final_answer\"}}]\n```",
        );
        let provider = Arc::new(MockProvider::with_text_responses([fenced]));
        let reasoner = Reasoner::new(provider, ToolBox::new(), ReasonerConfig::default());

        let steps = reasoner.plan(&RunContext::new(), &[]).await;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].title, "only");
    }

    #[tokio::test]
    async fn chain_is_capped_at_max_steps() {
        let many: Vec<String> = (0..6)
            .map(|i| format!("{{\"title\": \"s{i}\", \"reasoning\": \"r\", \"next\": \"continue\"}}"))
            .collect();
        let body = format!("{{\"steps\": [{}]}}", many.join(","));
        let provider = Arc::new(MockProvider::with_text_responses([body]));
        let reasoner = Reasoner::new(provider, ToolBox::new(), ReasonerConfig::default());

        let steps = reasoner.plan(&RunContext::new(), &[]).await;
        assert_eq!(steps.len(), 3);
    }

    #[tokio::test]
    async fn failures_yield_empty_chain() {
        let provider = Arc::new(MockProvider::failing("planner offline"));
        let reasoner = Reasoner::new(provider, ToolBox::new(), ReasonerConfig::default());
        assert!(reasoner.plan(&RunContext::new(), &[]).await.is_empty());
    }

    #[tokio::test]
    async fn garbage_output_yields_empty_chain() {
        let provider = Arc::new(MockProvider::with_text_responses(["not json at all"]));
        let reasoner = Reasoner::new(provider, ToolBox::new(), ReasonerConfig::default());
        assert!(reasoner.plan(&RunContext::new(), &[]).await.is_empty());
    }

    #[tokio::test]
    async fn nested_reasoning_is_refused() {
        let provider = Arc::new(MockProvider::with_text_responses([steps_json()]));
        let reasoner = Reasoner::new(provider.clone(), ToolBox::new(), ReasonerConfig::default());

        let nested_ctx = RunContext::new().for_reasoning();
        assert!(reasoner.plan(&nested_ctx, &[]).await.is_empty());
        assert_eq!(provider.request_count(), 0);
    }

    #[test]
    fn chain_renders_as_single_assistant_message() {
        let steps = vec![
            ReasoningStep {
                title: "look up".into(),
                reasoning: "need the total".into(),
                action: Some("math_add".into()),
                result: Some("5".into()),
                confidence: 0.8,
                next: NextAction::Continue,
            },
            ReasoningStep {
                title: "conclude".into(),
                reasoning: "the total is 5".into(),
                confidence: 1.0,
                next: NextAction::FinalAnswer,
                ..Default::default()
            },
        ];

        let message = Reasoner::chain_to_message(&steps);
        assert_eq!(message.role, crate::message::Role::Assistant);
        assert!(message.content.contains("1. look up"));
        assert!(message.content.contains("[action: math_add]"));
        assert!(message.content.contains("2. conclude"));
    }
}
