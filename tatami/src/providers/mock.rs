//! Scripted model provider for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::callback::RunContext;
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::model::{ChunkStream, InvokeRequest, ModelProvider, ModelResponse};
use crate::stream::{StopReason, StreamChunk};
use crate::usage::Usage;

/// A provider that replays a scripted response sequence.
///
/// Responses are served in order; once the script is exhausted the last
/// response repeats. Every received request is recorded for assertions.
/// An optional artificial delay makes cancellation observable in tests.
pub struct MockProvider {
    model_id: String,
    responses: Vec<ModelResponse>,
    next: AtomicUsize,
    requests: Mutex<Vec<InvokeRequest>>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Script a sequence of full responses.
    #[must_use]
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            model_id: "mock-model".to_owned(),
            responses,
            next: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            failure: None,
            delay: None,
        }
    }

    /// Script a sequence of plain text responses.
    #[must_use]
    pub fn with_text_responses<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            texts
                .into_iter()
                .map(|text| ModelResponse::from_text(text).with_usage(Usage::new(10, 5)))
                .collect(),
        )
    }

    /// A provider whose every invocation fails.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Override the reported model id.
    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Sleep this long inside every invocation (observing cancellation).
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Build a response that requests the given tool calls.
    #[must_use]
    pub fn tool_call_response(calls: Vec<ToolCall>) -> ModelResponse {
        ModelResponse::new(Message::assistant_with_tool_calls("", calls))
            .with_stop_reason(StopReason::ToolCalls)
            .with_usage(Usage::new(10, 5))
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().map_or(0, |requests| requests.len())
    }

    /// The `index`-th received request, if any.
    #[must_use]
    pub fn request(&self, index: usize) -> Option<InvokeRequest> {
        self.requests
            .lock()
            .ok()
            .and_then(|requests| requests.get(index).cloned())
    }

    /// The most recent received request, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<InvokeRequest> {
        self.requests
            .lock()
            .ok()
            .and_then(|requests| requests.last().cloned())
    }

    fn next_response(&self) -> Result<ModelResponse> {
        if let Some(message) = &self.failure {
            return Err(Error::model(message.clone()));
        }
        if self.responses.is_empty() {
            return Err(Error::model("mock provider has no scripted responses"));
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let clamped = index.min(self.responses.len() - 1);
        Ok(self.responses[clamped]
            .clone()
            .with_model(self.model_id.clone()))
    }

    async fn observe(&self, ctx: &RunContext, request: &InvokeRequest) -> Result<()> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancelled() => return Err(Error::Cancelled),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("model_id", &self.model_id)
            .field("scripted", &self.responses.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn invoke(&self, ctx: &RunContext, request: &InvokeRequest) -> Result<ModelResponse> {
        self.observe(ctx, request).await?;
        self.next_response()
    }

    async fn invoke_stream(
        &self,
        ctx: &RunContext,
        request: &InvokeRequest,
    ) -> Result<ChunkStream> {
        self.observe(ctx, request).await?;
        let response = self.next_response()?;

        let mut chunks: Vec<Result<StreamChunk>> = Vec::new();
        let text = response.text();
        if !text.is_empty() {
            // Split in two so aggregation across deltas is exercised.
            let mid = text.chars().count() / 2;
            let head: String = text.chars().take(mid).collect();
            let tail: String = text.chars().skip(mid).collect();
            if !head.is_empty() {
                chunks.push(Ok(StreamChunk::text(head)));
            }
            chunks.push(Ok(StreamChunk::text(tail)));
        }
        if let Some(calls) = response.tool_calls() {
            for (index, call) in calls.iter().enumerate() {
                chunks.push(Ok(StreamChunk::ToolCallStart {
                    index,
                    id: call.id.clone(),
                    name: call.name().to_owned(),
                }));
                chunks.push(Ok(StreamChunk::ToolCallDelta {
                    index,
                    partial_arguments: call.function.arguments.clone(),
                }));
            }
        }
        if let Some(usage) = response.usage {
            chunks.push(Ok(StreamChunk::Usage(usage)));
        }
        chunks.push(Ok(StreamChunk::Done {
            stop_reason: Some(response.stop_reason),
        }));

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    #[tokio::test]
    async fn serves_responses_in_order_then_repeats_last() {
        let provider = MockProvider::with_text_responses(["first", "second"]);
        let ctx = RunContext::new();
        let request = InvokeRequest::default();

        assert_eq!(provider.invoke(&ctx, &request).await.unwrap().text(), "first");
        assert_eq!(provider.invoke(&ctx, &request).await.unwrap().text(), "second");
        assert_eq!(provider.invoke(&ctx, &request).await.unwrap().text(), "second");
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn failing_provider_always_errors() {
        let provider = MockProvider::failing("offline");
        let err = provider
            .invoke(&RunContext::new(), &InvokeRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model { .. }));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let provider =
            MockProvider::with_text_responses(["never"]).with_delay(Duration::from_secs(5));
        let ctx = RunContext::new();
        ctx.cancel();

        let err = provider
            .invoke(&ctx, &InvokeRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn stream_roundtrips_through_aggregator() {
        let provider = MockProvider::with_text_responses(["hello world"]);
        let mut stream = provider
            .invoke_stream(&RunContext::new(), &InvokeRequest::default())
            .await
            .unwrap();

        let mut aggregator = crate::stream::StreamAggregator::new();
        while let Some(chunk) = stream.next().await {
            aggregator.apply(&chunk.unwrap());
        }
        let response = aggregator.into_response();
        assert_eq!(response.message.content, "hello world");
        assert!(response.usage.is_some());
    }

    #[tokio::test]
    async fn tool_call_response_streams_calls() {
        let provider = MockProvider::new(vec![MockProvider::tool_call_response(vec![
            ToolCall::new("call_1", "math_add", r#"{"a":2,"b":3}"#),
        ])]);
        let mut stream = provider
            .invoke_stream(&RunContext::new(), &InvokeRequest::default())
            .await
            .unwrap();

        let mut aggregator = crate::stream::StreamAggregator::new();
        while let Some(chunk) = stream.next().await {
            aggregator.apply(&chunk.unwrap());
        }
        let response = aggregator.into_response();
        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls().unwrap()[0].name(), "math_add");
    }
}
