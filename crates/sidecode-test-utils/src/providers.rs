//! Test provider implementations.
//!
//! Provides a model that records every request and replays scripted responses.

use async_trait::async_trait;
use serde_json::Value;
use sidecode_provider::{
    ChatRequest, FinishReason, LanguageModel, ModelCost, ModelInfo, NormalizedResponse,
    ProviderError, ProviderResult, ToolCall, Usage,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A model that records all requests for later inspection.
///
/// Scripted responses are returned in order. Once the queue is empty the
/// default response is used for every further call.
///
/// # Example
///
/// ```rust,ignore
/// use sidecode_test_utils::providers::RecordingProvider;
///
/// let provider = RecordingProvider::new()
///     .with_tool_call("call_1", "list_files", json!({"path": "."}))
///     .with_response("Done.");
///
/// // Drive a turn...
///
/// assert_eq!(provider.call_count(), 2);
/// ```
#[derive(Clone)]
pub struct RecordingProvider {
    model: ModelInfo,
    calls: Arc<Mutex<Vec<ChatRequest>>>,
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    default_response: Arc<Mutex<ScriptedResponse>>,
    counter: Arc<AtomicUsize>,
}

/// A response that the provider can return.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Return a complete response as-is.
    Response(NormalizedResponse),
    /// Return a text response.
    Text(String),
    /// Return one or more tool calls.
    ToolCalls(Vec<ToolCall>),
    /// Call the named tool with fresh ids on every use.
    RepeatToolCall { name: String, input: Value },
    /// Fail with an API error carrying this message.
    Error(String),
    /// Wait before answering with the inner response.
    Delayed(Duration, Box<ScriptedResponse>),
    /// Never answer. Only cancellation ends the call.
    Hang,
}

impl Default for ScriptedResponse {
    fn default() -> Self {
        ScriptedResponse::Text("Test response".to_string())
    }
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            model: ModelInfo::new("test-model", "recording")
                .with_name("Recording Test Model")
                .with_cost(ModelCost::new(1.0, 2.0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_response: Arc::new(Mutex::new(ScriptedResponse::default())),
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a text response.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(ScriptedResponse::Text(text.into()))
    }

    /// Queue a response with a single tool call.
    pub fn with_tool_call(self, id: &str, name: &str, input: Value) -> Self {
        self.push(ScriptedResponse::ToolCalls(vec![ToolCall::new(
            id, name, input,
        )]))
    }

    /// Queue a response with several tool calls.
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(ScriptedResponse::ToolCalls(calls))
    }

    /// Queue an error.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(ScriptedResponse::Error(message.into()))
    }

    /// Queue a call that only returns when cancelled.
    pub fn with_hang(self) -> Self {
        self.push(ScriptedResponse::Hang)
    }

    /// Queue any scripted response.
    pub fn with_scripted(self, response: ScriptedResponse) -> Self {
        self.push(response)
    }

    /// Set the response used once the queue runs dry.
    pub fn with_default_response(self, response: ScriptedResponse) -> Self {
        *self.default_response.lock().unwrap() = response;
        self
    }

    /// Keep calling `name` forever.
    pub fn always_calling(self, name: &str, input: Value) -> Self {
        self.with_default_response(ScriptedResponse::RepeatToolCall {
            name: name.to_string(),
            input,
        })
    }

    /// All recorded requests.
    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<ChatRequest> {
        self.calls.lock().unwrap().last().cloned()
    }

    /// Check whether any request carried a message containing `text`.
    pub fn was_sent(&self, text: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|call| call.messages.iter().any(|m| m.text().contains(text)))
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn push(self, response: ScriptedResponse) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    fn next_response(&self) -> ScriptedResponse {
        let queued = self.responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.default_response.lock().unwrap().clone())
    }

    fn finish(&self, text: String, tool_calls: Vec<ToolCall>) -> NormalizedResponse {
        let usage = Usage::new(100, 20);
        NormalizedResponse {
            text,
            finish_reason: if tool_calls.is_empty() {
                FinishReason::EndTurn
            } else {
                FinishReason::ToolUse
            },
            tool_calls,
            cost: self.model.cost.calculate(&usage),
            usage,
            model: self.model.id.clone(),
            raw: Value::Null,
        }
    }

    async fn play(
        &self,
        response: ScriptedResponse,
        cancel: &CancellationToken,
    ) -> ProviderResult<NormalizedResponse> {
        match response {
            ScriptedResponse::Response(response) => Ok(response),
            ScriptedResponse::Text(text) => Ok(self.finish(text, Vec::new())),
            ScriptedResponse::ToolCalls(calls) => Ok(self.finish(String::new(), calls)),
            ScriptedResponse::RepeatToolCall { name, input } => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                let call = ToolCall::new(format!("call_repeat_{n}"), name, input);
                Ok(self.finish(String::new(), vec![call]))
            }
            ScriptedResponse::Error(message) => Err(ProviderError::ApiError {
                status: 500,
                message,
            }),
            ScriptedResponse::Delayed(delay, inner) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(delay) => Box::pin(self.play(*inner, cancel)).await,
                }
            }
            ScriptedResponse::Hang => {
                cancel.cancelled().await;
                Err(ProviderError::Cancelled)
            }
        }
    }
}

impl Default for RecordingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for RecordingProvider {
    async fn complete(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<NormalizedResponse> {
        self.calls.lock().unwrap().push(request);
        let response = self.next_response();
        self.play(response, &cancel).await
    }

    fn model_info(&self) -> &ModelInfo {
        &self.model
    }

    fn provider_id(&self) -> &str {
        &self.model.provider_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sidecode_provider::Message;

    fn request(text: &str) -> ChatRequest {
        ChatRequest::new(vec![Message::user(text)])
    }

    #[tokio::test]
    async fn test_scripted_order_then_default() {
        let provider = RecordingProvider::new()
            .with_tool_call("call_1", "read_file", json!({"path": "a.txt"}))
            .with_response("done");

        let first = provider
            .complete(request("one"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.tool_calls[0].name, "read_file");
        assert_eq!(first.finish_reason, FinishReason::ToolUse);

        let second = provider
            .complete(request("two"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.text, "done");

        let third = provider
            .complete(request("three"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(third.text, "Test response");

        assert_eq!(provider.call_count(), 3);
        assert!(provider.was_sent("two"));
        assert!(!provider.was_sent("four"));
    }

    #[tokio::test]
    async fn test_repeat_tool_call_ids_are_unique() {
        let provider = RecordingProvider::new().always_calling("list_files", json!({}));
        let a = provider
            .complete(request("x"), CancellationToken::new())
            .await
            .unwrap();
        let b = provider
            .complete(request("x"), CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(a.tool_calls[0].id, b.tool_calls[0].id);
    }

    #[tokio::test]
    async fn test_error_and_hang() {
        let provider = RecordingProvider::new().with_error("boom").with_hang();
        let err = provider
            .complete(request("x"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider.complete(request("x"), cancel).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }
}
