//! Message types for agent-model communication.
//!
//! Messages follow the chat completion conventions: a role, text content,
//! optional tool calls (assistant messages), and an optional tool call id
//! (tool messages). Order within a run is significant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    #[default]
    Assistant,
    /// Tool result message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// The function half of a tool call: name plus raw JSON argument string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Canonical dispatch name (`<tool>_<method>` for toolkit methods).
    pub name: String,
    /// Arguments as a JSON string, exactly as the model produced them.
    pub arguments: String,
}

/// A tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for the tool call.
    pub id: String,
    /// The function to call.
    pub function: FunctionCall,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Get the name of the function being called.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parse the raw argument string into a JSON value.
    ///
    /// An empty argument string parses as an empty object, which is what
    /// models produce for zero-parameter tools.
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.function.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.function.arguments)
    }
}

/// A chat message in a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    #[serde(default)]
    pub content: String,
    /// Tool calls made by the model (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call this message responds to (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Reasoning text produced alongside the content, when the model
    /// exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl Message {
    /// Create a new message with the given role and content.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            thinking: None,
        }
    }

    /// Create a new system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            thinking: None,
        }
    }

    /// Create a new tool result message.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            thinking: None,
        }
    }

    /// Attach reasoning text.
    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    /// Check if this message carries at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }

    /// Number of tool calls on this message.
    #[must_use]
    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.as_ref().map_or(0, Vec::len)
    }

    /// Drop the tool calls, keeping the text content.
    pub fn strip_tool_calls(&mut self) {
        self.tool_calls = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod role {
        use super::*;

        #[test]
        fn as_str_covers_all_roles() {
            assert_eq!(Role::System.as_str(), "system");
            assert_eq!(Role::User.as_str(), "user");
            assert_eq!(Role::Assistant.as_str(), "assistant");
            assert_eq!(Role::Tool.as_str(), "tool");
        }

        #[test]
        fn serde_uses_lowercase() {
            let json = serde_json::to_string(&Role::Assistant).unwrap();
            assert_eq!(json, r#""assistant""#);
        }
    }

    mod tool_call {
        use super::*;

        #[test]
        fn new_sets_id_and_function() {
            let call = ToolCall::new("call_1", "add", r#"{"a":2,"b":3}"#);
            assert_eq!(call.id, "call_1");
            assert_eq!(call.name(), "add");
        }

        #[test]
        fn parse_arguments_reads_json_string() {
            let call = ToolCall::new("call_1", "add", r#"{"a":2,"b":3}"#);
            let args = call.parse_arguments().unwrap();
            assert_eq!(args["a"], 2);
            assert_eq!(args["b"], 3);
        }

        #[test]
        fn parse_arguments_accepts_empty_string() {
            let call = ToolCall::new("call_1", "list", "");
            let args = call.parse_arguments().unwrap();
            assert!(args.as_object().unwrap().is_empty());
        }

        #[test]
        fn parse_arguments_rejects_garbage() {
            let call = ToolCall::new("call_1", "add", "{not json");
            assert!(call.parse_arguments().is_err());
        }
    }

    mod message {
        use super::*;

        #[test]
        fn constructors_set_roles() {
            assert_eq!(Message::system("s").role, Role::System);
            assert_eq!(Message::user("u").role, Role::User);
            assert_eq!(Message::assistant("a").role, Role::Assistant);
            assert_eq!(Message::tool("id", "r").role, Role::Tool);
        }

        #[test]
        fn tool_message_carries_call_id() {
            let msg = Message::tool("call_9", "5");
            assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
            assert_eq!(msg.content, "5");
        }

        #[test]
        fn has_tool_calls_ignores_empty_vec() {
            let mut msg = Message::assistant("");
            assert!(!msg.has_tool_calls());
            msg.tool_calls = Some(Vec::new());
            assert!(!msg.has_tool_calls());
            msg.tool_calls = Some(vec![ToolCall::new("1", "t", "{}")]);
            assert!(msg.has_tool_calls());
        }

        #[test]
        fn strip_tool_calls_keeps_content() {
            let mut msg = Message::assistant_with_tool_calls(
                "calling",
                vec![ToolCall::new("1", "t", "{}")],
            );
            msg.strip_tool_calls();
            assert!(!msg.has_tool_calls());
            assert_eq!(msg.content, "calling");
        }

        #[test]
        fn serde_roundtrip_with_thinking() {
            let msg = Message::assistant("done").with_thinking("step 1: think");
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, msg);
        }

        #[test]
        fn serde_skips_absent_fields() {
            let json = serde_json::to_string(&Message::user("hi")).unwrap();
            assert!(!json.contains("tool_calls"));
            assert!(!json.contains("thinking"));
        }
    }
}
