//! OpenAI Chat Completions adapter.
//!
//! Wire shape:
//! - `POST {base}/v1/chat/completions` with bearer auth.
//! - The system prompt is flattened into one leading `system` message.
//! - Assistant tool calls carry their arguments as a JSON string.
//! - Each tool result is its own `tool` role message.

use crate::{
    error::{ProviderError, ProviderResult},
    message::{value_to_text, ContentPart, Message, Role},
    model::ModelInfo,
    response::NormalizedResponse,
    transport::{WireRequest, WireResponse},
    usage::{FinishReason, Usage},
    ChatRequest, ProviderAdapter, ToolCall, ToolChoice, ToolDefinition,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

const OPENAI_API_URL: &str = "https://api.openai.com";

/// OpenAI adapter. Also works with OpenAI-compatible endpoints via
/// [`OpenAiAdapter::with_base_url`].
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    api_key: String,
    base_url: Url,
    model: ModelInfo,
}

impl OpenAiAdapter {
    pub fn new(api_key: &str, model: ModelInfo) -> ProviderResult<Self> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::missing_api_key("openai"));
        }
        if api_key.chars().any(|c| c.is_control()) {
            return Err(ProviderError::invalid_api_key("openai"));
        }
        debug!(model = %model.id, "Creating OpenAI adapter");
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: Url::parse(OPENAI_API_URL)?,
            model,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> ProviderResult<Self> {
        self.base_url = Url::parse(base_url)?;
        Ok(self)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => converted.push(json!({ "role": "user", "content": msg.text() })),
                Role::Assistant => {
                    let tool_calls: Vec<Value> = msg
                        .tool_calls()
                        .into_iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.input.to_string()
                                }
                            })
                        })
                        .collect();
                    let text = msg.text();
                    let content = if text.is_empty() {
                        Value::Null
                    } else {
                        Value::String(text)
                    };
                    let mut value = json!({ "role": "assistant", "content": content });
                    if !tool_calls.is_empty() {
                        value["tool_calls"] = Value::Array(tool_calls);
                    }
                    converted.push(value);
                }
                Role::ToolResult => {
                    for part in &msg.content {
                        if let ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } = part
                        {
                            let text = value_to_text(content);
                            let text = if *is_error { format!("Error: {text}") } else { text };
                            converted.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": text
                            }));
                        }
                    }
                }
            }
        }

        converted
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters
                    }
                })
            })
            .collect()
    }

    fn convert_tool_choice(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Any => json!("required"),
            ToolChoice::None => json!("none"),
            ToolChoice::Tool(name) => json!({ "type": "function", "function": { "name": name } }),
        }
    }

    /// Arguments arrive as a JSON string. Unparseable arguments are kept
    /// under `_raw` so schema validation rejects them later.
    fn parse_arguments(arguments: &str) -> Value {
        if arguments.trim().is_empty() {
            return json!({});
        }
        serde_json::from_str(arguments).unwrap_or_else(|e| {
            warn!(error = %e, "Tool call arguments are not valid JSON");
            json!({ "_raw": arguments })
        })
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn model_info(&self) -> &ModelInfo {
        &self.model
    }

    fn build_request(&self, request: &ChatRequest) -> ProviderResult<WireRequest> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system.as_ref().filter(|s| !s.is_empty()) {
            messages.push(json!({ "role": "system", "content": system.joined() }));
        }
        messages.extend(Self::convert_messages(&request.messages));

        let mut body = json!({
            "model": self.model.id,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(&request.tools));
            body["tool_choice"] = Self::convert_tool_choice(&request.tool_choice);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        Ok(WireRequest::new(self.endpoint(), body)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json"))
    }

    fn parse_response(&self, response: WireResponse) -> ProviderResult<NormalizedResponse> {
        if !response.is_success() {
            warn!(status = response.status, "OpenAI API error");
            return Err(ProviderError::from_status(response.status, &response.body));
        }

        let parsed: ChatCompletion = serde_json::from_value(response.body.clone())
            .map_err(|e| ProviderError::invalid_response(format!("openai: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::invalid_response("openai: response has no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                input: Self::parse_arguments(&call.function.arguments),
                name: call.function.name,
            })
            .collect();

        let usage = parsed.usage.map(Usage::from).unwrap_or_default();
        let finish_reason = choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from_openai)
            .unwrap_or_default();

        Ok(NormalizedResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            cost: self.model.cost.calculate(&usage),
            usage,
            finish_reason,
            model: parsed.model.unwrap_or_else(|| self.model.id.clone()),
            raw: response.body,
        })
    }
}

// Response types

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        let cached = usage
            .prompt_tokens_details
            .map(|d| d.cached_tokens)
            .unwrap_or(0);
        Usage {
            // Cached tokens are billed at the cache rate, not the input rate.
            input_tokens: usage.prompt_tokens.saturating_sub(cached),
            output_tokens: usage.completion_tokens,
            cache_read_tokens: cached,
            cache_write_tokens: 0,
        }
    }
}
