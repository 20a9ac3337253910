//! Agentic session-state tools.

use async_trait::async_trait;
use serde_json::Value;

use crate::callback::SharedState;
use crate::error::ToolError;
use crate::schema::{SchemaField, TypeSchema};
use crate::tool::{ToolMethod, ToolResult, Toolkit};

/// Lets the model read and mutate the shared session-state map.
///
/// Values are passed as strings; JSON-looking strings are stored parsed so
/// the model can round-trip structured state.
#[derive(Clone)]
pub struct SessionStateTools {
    state: SharedState,
}

impl SessionStateTools {
    /// Create over the run's shared state handle.
    #[must_use]
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    fn key_arg(args: &Value) -> ToolResult<String> {
        args.get("key")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| ToolError::invalid_arguments("session_state", "missing 'key'"))
    }
}

impl std::fmt::Debug for SessionStateTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateTools").finish_non_exhaustive()
    }
}

#[async_trait]
impl Toolkit for SessionStateTools {
    fn name(&self) -> &str {
        "session_state"
    }

    fn methods(&self) -> Vec<ToolMethod> {
        let key_field = || {
            SchemaField::new("key", TypeSchema::string().min_len(1))
                .description("State key")
        };
        vec![
            ToolMethod::new(
                "get",
                "Read one session-state value.",
                TypeSchema::object(vec![key_field()]),
            ),
            ToolMethod::new(
                "set",
                "Write one session-state value.",
                TypeSchema::object(vec![
                    key_field(),
                    SchemaField::new("value", TypeSchema::string())
                        .description("Value to store; JSON strings are stored parsed"),
                ]),
            ),
            ToolMethod::new(
                "delete",
                "Remove one session-state value.",
                TypeSchema::object(vec![key_field()]),
            ),
            ToolMethod::new(
                "list",
                "List all session-state keys.",
                TypeSchema::object(vec![]),
            ),
        ]
    }

    async fn execute(&self, method: &str, args: Value) -> ToolResult<Value> {
        match method {
            "get" => {
                let key = Self::key_arg(&args)?;
                Ok(self
                    .state
                    .read()
                    .await
                    .get(&key)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            "set" => {
                let key = Self::key_arg(&args)?;
                let raw = args
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let value = serde_json::from_str(raw)
                    .unwrap_or_else(|_| Value::String(raw.to_owned()));
                self.state.write().await.insert(key, value);
                Ok(Value::Bool(true))
            }
            "delete" => {
                let key = Self::key_arg(&args)?;
                let removed = self.state.write().await.remove(&key).is_some();
                Ok(Value::Bool(removed))
            }
            "list" => {
                let mut keys: Vec<String> =
                    self.state.read().await.keys().cloned().collect();
                keys.sort_unstable();
                Ok(Value::Array(keys.into_iter().map(Value::String).collect()))
            }
            other => Err(ToolError::not_found(other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn tools() -> SessionStateTools {
        SessionStateTools::new(Arc::new(RwLock::new(HashMap::new())))
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let tools = tools();
        tools
            .execute("set", json!({"key": "step", "value": "3"}))
            .await
            .unwrap();
        assert_eq!(
            tools.execute("get", json!({"key": "step"})).await.unwrap(),
            json!(3),
        );

        let removed = tools
            .execute("delete", json!({"key": "step"}))
            .await
            .unwrap();
        assert_eq!(removed, json!(true));
        assert_eq!(
            tools.execute("get", json!({"key": "step"})).await.unwrap(),
            Value::Null,
        );
    }

    #[tokio::test]
    async fn plain_strings_stay_strings() {
        let tools = tools();
        tools
            .execute("set", json!({"key": "name", "value": "mina"}))
            .await
            .unwrap();
        assert_eq!(
            tools.execute("get", json!({"key": "name"})).await.unwrap(),
            json!("mina"),
        );
    }

    #[tokio::test]
    async fn list_returns_sorted_keys() {
        let tools = tools();
        for key in ["zeta", "alpha"] {
            tools
                .execute("set", json!({"key": key, "value": "1"}))
                .await
                .unwrap();
        }
        assert_eq!(
            tools.execute("list", json!({})).await.unwrap(),
            json!(["alpha", "zeta"]),
        );
    }
}
