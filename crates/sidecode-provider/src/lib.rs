//! AI provider abstraction for sidecode.
//!
//! Every provider is a [`ProviderAdapter`]: a pure translation between the
//! provider-neutral [`ChatRequest`] / [`NormalizedResponse`] pair and the
//! provider's JSON wire format. Supported providers:
//! - Anthropic (Messages API)
//! - OpenAI (Chat Completions API)
//!
//! [`HttpModel`] joins an adapter with an [`HttpTransport`] into a
//! [`LanguageModel`] that the tool loop can drive.

pub mod error;
pub mod message;
pub mod model;
pub mod response;
pub mod system;
pub mod transport;
pub mod usage;

pub mod anthropic;
pub mod openai;

pub use error::{ProviderError, ProviderResult};
pub use message::{ContentPart, Message, Role, ToolCall, ToolResult};
pub use model::{ModelCost, ModelInfo};
pub use response::{NormalizedResponse, ResponseOutput};
pub use system::{SystemBlock, SystemPrompt};
pub use transport::{HttpTransport, ReqwestTransport, WireRequest, WireResponse};
pub use usage::{FinishReason, Usage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sidecode_util::TimingGuard;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A tool definition for the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool input.
    pub parameters: Value,
}

/// How the model may pick tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum ToolChoice {
    /// Model decides.
    #[default]
    Auto,
    /// Model must call some tool.
    Any,
    /// Model must not call tools.
    None,
    /// Model must call the named tool.
    Tool(String),
}

/// A provider-neutral request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub system: Option<SystemPrompt>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: 4096,
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<SystemPrompt>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Translation between the neutral request/response shapes and one
/// provider's wire format. Implementations do no I/O.
pub trait ProviderAdapter: Send + Sync {
    /// Provider ID (e.g., "anthropic", "openai").
    fn provider_id(&self) -> &str;

    fn model_info(&self) -> &ModelInfo;

    fn build_request(&self, request: &ChatRequest) -> ProviderResult<WireRequest>;

    /// Parse a wire response. Non-success statuses become errors.
    fn parse_response(&self, response: WireResponse) -> ProviderResult<NormalizedResponse>;
}

/// A model the tool loop can talk to.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one request/response round-trip.
    async fn complete(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<NormalizedResponse>;

    fn model_info(&self) -> &ModelInfo;

    fn provider_id(&self) -> &str;
}

/// A boxed language model for dynamic dispatch.
pub type BoxedLanguageModel = Arc<dyn LanguageModel>;

/// A [`LanguageModel`] made of an adapter and a transport.
pub struct HttpModel {
    adapter: Arc<dyn ProviderAdapter>,
    transport: Arc<dyn HttpTransport>,
}

impl HttpModel {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { adapter, transport }
    }
}

#[async_trait]
impl LanguageModel for HttpModel {
    async fn complete(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<NormalizedResponse> {
        let _timing = TimingGuard::provider(self.adapter.provider_id());
        let wire = self.adapter.build_request(&request)?;
        debug!(
            provider = self.adapter.provider_id(),
            model = %self.adapter.model_info().id,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Provider request"
        );
        let response = self.transport.send(wire, &cancel).await?;
        self.adapter.parse_response(response)
    }

    fn model_info(&self) -> &ModelInfo {
        self.adapter.model_info()
    }

    fn provider_id(&self) -> &str {
        self.adapter.provider_id()
    }
}

/// The supported providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    #[serde(alias = "open_ai")]
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// Environment variable conventionally holding the API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::OpenAi => "gpt-4o",
        }
    }

    /// Build the adapter for this provider.
    pub fn adapter(
        &self,
        api_key: &str,
        model: &str,
        base_url: Option<&str>,
    ) -> ProviderResult<Arc<dyn ProviderAdapter>> {
        let info = ModelInfo::lookup(self.as_str(), model);
        Ok(match self {
            ProviderKind::Anthropic => {
                let mut adapter = anthropic::AnthropicAdapter::new(api_key, info)?;
                if let Some(url) = base_url {
                    adapter = adapter.with_base_url(url)?;
                }
                Arc::new(adapter)
            }
            ProviderKind::OpenAi => {
                let mut adapter = openai::OpenAiAdapter::new(api_key, info)?;
                if let Some(url) = base_url {
                    adapter = adapter.with_base_url(url)?;
                }
                Arc::new(adapter)
            }
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" | "open_ai" => Ok(ProviderKind::OpenAi),
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockHttpTransport;
    use serde_json::json;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Anthropic".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert!(matches!(
            "gemini".parse::<ProviderKind>(),
            Err(ProviderError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_tool_choice_serde() {
        assert_eq!(serde_json::to_value(ToolChoice::Auto).unwrap(), json!({"type": "auto"}));
        assert_eq!(
            serde_json::to_value(ToolChoice::Tool("read_file".into())).unwrap(),
            json!({"type": "tool", "name": "read_file"})
        );
    }

    #[tokio::test]
    async fn test_http_model_round_trip() {
        let adapter = ProviderKind::Anthropic
            .adapter("k", "claude-sonnet-4-20250514", None)
            .unwrap();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|request, _| request.url.ends_with("/v1/messages"))
            .times(1)
            .returning(|_, _| {
                Ok(WireResponse::ok(json!({
                    "model": "claude-sonnet-4-20250514",
                    "content": [{"type": "text", "text": "hi"}],
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 10, "output_tokens": 2}
                })))
            });

        let model = HttpModel::new(adapter, Arc::new(transport));
        let response = model
            .complete(ChatRequest::new(vec![Message::user("hello")]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.text, "hi");
        assert_eq!(response.usage.input_tokens, 10);
        assert!(response.cost > 0.0);
        assert_eq!(model.provider_id(), "anthropic");
    }

    #[tokio::test]
    async fn test_http_model_propagates_transport_error() {
        let adapter = ProviderKind::OpenAi.adapter("k", "gpt-4o", None).unwrap();
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .returning(|_, _| Err(ProviderError::Cancelled));

        let model = HttpModel::new(adapter, Arc::new(transport));
        let err = model
            .complete(ChatRequest::new(vec![Message::user("x")]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }
}
