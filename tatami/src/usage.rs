//! Token usage tracking for model operations.
//!
//! [`Usage`] accumulates across every model call in a run; the orchestrator
//! surfaces the total in [`RunResponse::metrics`](crate::agent::RunMetrics).

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token usage statistics from a model operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input/prompt.
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u32,

    /// Number of tokens in the output/completion.
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u32,

    /// Total tokens used (input + output).
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// A zero usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Returns `true` if no tokens were consumed.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.total_tokens == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_computes_total() {
        let usage = Usage::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn zero_is_zero() {
        assert!(Usage::zero().is_zero());
        assert!(!Usage::new(1, 0).is_zero());
    }

    #[test]
    fn add_accumulates_all_fields() {
        let total = Usage::new(100, 50) + Usage::new(10, 5);
        assert_eq!(total.input_tokens, 110);
        assert_eq!(total.output_tokens, 55);
        assert_eq!(total.total_tokens, 165);
    }

    #[test]
    fn add_assign_matches_add() {
        let mut usage = Usage::new(1, 2);
        usage += Usage::new(3, 4);
        assert_eq!(usage, Usage::new(4, 6));
    }

    #[test]
    fn deserializes_openai_aliases() {
        let usage: Usage =
            serde_json::from_str(r#"{"prompt_tokens": 7, "completion_tokens": 3}"#)
                .expect("aliases should parse");
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 3);
    }
}
