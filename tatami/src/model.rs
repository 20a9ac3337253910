//! Provider-agnostic model invocation.
//!
//! [`ModelProvider`] is the boundary every vendor adapter implements:
//! a blocking [`invoke`](ModelProvider::invoke) and a streaming
//! [`invoke_stream`](ModelProvider::invoke_stream), both fed by an
//! [`InvokeRequest`]. The adapter is single-turn — when the model requests
//! tool calls they come back inside [`ModelResponse`], and the orchestrator
//! owns the follow-up turn.
//!
//! The crate ships no vendor HTTP clients; see
//! [`providers::MockProvider`](crate::providers::MockProvider) for the
//! scripted adapter used in tests.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callback::RunContext;
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::stream::{StopReason, StreamChunk};
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// A pinned, boxed stream of response chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Response format specification for structured outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ResponseFormat {
    /// Plain text response.
    Text,
    /// JSON object response.
    JsonObject,
    /// JSON response constrained by a schema.
    JsonSchema {
        /// Schema name.
        name: String,
        /// JSON Schema definition.
        schema: Value,
    },
}

/// A model invocation request.
///
/// Built by the orchestrator from the assembled context frame; adapters
/// translate it into vendor form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Conversation messages, in order.
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Tools available for the model to call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether the model may emit several tool calls in one turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// Response format for structured output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-call metadata forwarded verbatim to the adapter (media
    /// attachments, request tags, vendor knobs).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl InvokeRequest {
    /// Creates a request with messages.
    #[must_use]
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Adds a message.
    #[must_use]
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Sets the available tools.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Enables or disables parallel tool calls.
    #[must_use]
    pub const fn parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.parallel_tool_calls = Some(enabled);
        self
    }

    /// Sets the response format.
    #[must_use]
    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the max token budget.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Inserts a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Replaces the whole metadata map.
    #[must_use]
    pub fn metadata_map(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A model invocation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated assistant message (text and/or tool calls).
    pub message: Message,

    /// Why the model stopped generating.
    #[serde(default)]
    pub stop_reason: StopReason,

    /// Token usage for this call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Identifier of the model that produced this response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ModelResponse {
    /// Creates a new response wrapping a message.
    #[must_use]
    pub const fn new(message: Message) -> Self {
        Self {
            message,
            stop_reason: StopReason::Stop,
            usage: None,
            model: None,
        }
    }

    /// Creates a response from assistant text.
    #[must_use]
    pub fn from_text(content: impl Into<String>) -> Self {
        Self::new(Message::assistant(content))
    }

    /// Sets the stop reason.
    #[must_use]
    pub const fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.stop_reason = reason;
        self
    }

    /// Sets usage statistics.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Returns the text content of the response.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.message.content
    }

    /// Returns `true` if the response contains tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }

    /// Returns the tool calls if present.
    #[must_use]
    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        self.message.tool_calls.as_deref()
    }

    /// Deserialize the response text into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if the text is not valid JSON for `T`.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.text())
    }
}

impl Default for ModelResponse {
    fn default() -> Self {
        Self::new(Message::default())
    }
}

/// The boundary every model backend implements.
///
/// Implementations must be safe for concurrent calls; the runtime shares one
/// provider across parallel runs.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send a request and receive the complete response.
    ///
    /// Implementations must observe `ctx` cancellation and return
    /// [`Error::Cancelled`] promptly when the run is aborted.
    async fn invoke(&self, ctx: &RunContext, request: &InvokeRequest) -> Result<ModelResponse>;

    /// Send a request and receive a stream of chunks.
    ///
    /// Providers that do not stream keep the default, which fails with a
    /// model error; the orchestrator then falls back to [`invoke`](Self::invoke).
    async fn invoke_stream(
        &self,
        ctx: &RunContext,
        request: &InvokeRequest,
    ) -> Result<ChunkStream> {
        let _ = (ctx, request);
        Err(Error::model("streaming not supported by this provider"))
    }

    /// Identifier of the model behind this provider.
    fn model_id(&self) -> &str;

    /// Whether [`invoke_stream`](Self::invoke_stream) is implemented.
    fn supports_streaming(&self) -> bool {
        false
    }
}

/// A shared, thread-safe model provider.
pub type SharedModelProvider = Arc<dyn ModelProvider>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod invoke_request {
        use super::*;

        #[test]
        fn builder_chain() {
            let request = InvokeRequest::with_messages(vec![Message::user("hi")])
                .temperature(0.2)
                .max_tokens(256)
                .parallel_tool_calls(true)
                .metadata("trace_id", Value::String("t-1".into()));

            assert_eq!(request.messages.len(), 1);
            assert_eq!(request.temperature, Some(0.2));
            assert_eq!(request.max_tokens, Some(256));
            assert_eq!(request.parallel_tool_calls, Some(true));
            assert_eq!(request.metadata["trace_id"], "t-1");
        }

        #[test]
        fn serde_skips_empty_fields() {
            let json =
                serde_json::to_string(&InvokeRequest::with_messages(vec![Message::user("x")]))
                    .unwrap();
            assert!(!json.contains("tools"));
            assert!(!json.contains("metadata"));
            assert!(!json.contains("temperature"));
        }
    }

    mod model_response {
        use super::*;

        #[test]
        fn from_text_wraps_assistant_message() {
            let response = ModelResponse::from_text("four");
            assert_eq!(response.text(), "four");
            assert_eq!(response.message.role, crate::message::Role::Assistant);
            assert!(!response.has_tool_calls());
        }

        #[test]
        fn tool_calls_surface() {
            let message = Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("1", "math_add", "{}")],
            );
            let response = ModelResponse::new(message).with_stop_reason(StopReason::ToolCalls);
            assert!(response.has_tool_calls());
            assert_eq!(response.tool_calls().unwrap()[0].name(), "math_add");
        }

        #[test]
        fn parse_reads_json_text() {
            #[derive(Deserialize)]
            struct Out {
                answer: u32,
            }
            let response = ModelResponse::from_text(r#"{"answer": 4}"#);
            let parsed: Out = response.parse().unwrap();
            assert_eq!(parsed.answer, 4);
        }

        #[test]
        fn builder_chain() {
            let response = ModelResponse::from_text("ok")
                .with_model("mock-1")
                .with_usage(Usage::new(5, 2));
            assert_eq!(response.model.as_deref(), Some("mock-1"));
            assert!(response.usage.is_some());
        }
    }
}
