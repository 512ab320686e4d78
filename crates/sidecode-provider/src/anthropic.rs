//! Anthropic Messages API adapter.
//!
//! Wire shape:
//! - `POST {base}/v1/messages` with `x-api-key` and `anthropic-version`.
//! - `system` is a string, or an array of text blocks when the prompt has
//!   several parts or cache hints.
//! - Tool results travel as `tool_result` blocks inside `user` messages.
//! - Response `content[]` holds `text` and `tool_use` blocks.
//! - The first message must be `user`. A trimmed history that opens with
//!   the assistant gets a placeholder user turn.

use crate::{
    error::{ProviderError, ProviderResult},
    message::{value_to_text, ContentPart, Message, Role},
    model::ModelInfo,
    response::NormalizedResponse,
    system::SystemPrompt,
    transport::{WireRequest, WireResponse},
    usage::{FinishReason, Usage},
    ChatRequest, ProviderAdapter, ToolCall, ToolChoice, ToolDefinition,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

/// The Anthropic API base URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

/// The Anthropic API version.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Stands in for history trimmed from the front of the context.
const HISTORY_PLACEHOLDER: &str = "[earlier messages omitted]";

/// Anthropic (Claude) adapter.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    api_key: String,
    base_url: Url,
    model: ModelInfo,
}

impl AnthropicAdapter {
    pub fn new(api_key: &str, model: ModelInfo) -> ProviderResult<Self> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::missing_api_key("anthropic"));
        }
        if api_key.chars().any(|c| c.is_control()) {
            return Err(ProviderError::invalid_api_key("anthropic"));
        }
        debug!(model = %model.id, "Creating Anthropic adapter");
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: Url::parse(ANTHROPIC_API_URL)?,
            model,
        })
    }

    /// Use a custom base URL (proxies, test servers).
    pub fn with_base_url(mut self, base_url: &str) -> ProviderResult<Self> {
        self.base_url = Url::parse(base_url)?;
        Ok(self)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.as_str().trim_end_matches('/'))
    }

    /// Convert messages, merging consecutive turns that map to the same role.
    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        let mut converted: Vec<(&'static str, Vec<Value>)> = Vec::new();

        for msg in messages {
            let role = match msg.role {
                Role::Assistant => "assistant",
                Role::User | Role::ToolResult => "user",
            };
            let blocks = Self::convert_content(&msg.content);
            if blocks.is_empty() {
                continue;
            }
            match converted.last_mut() {
                Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
                _ => converted.push((role, blocks)),
            }
        }

        // The Messages API rejects a conversation that opens with the assistant
        if converted.first().is_some_and(|(role, _)| *role != "user") {
            converted.insert(
                0,
                ("user", vec![json!({ "type": "text", "text": HISTORY_PLACEHOLDER })]),
            );
        }

        converted
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect()
    }

    fn convert_content(content: &[ContentPart]) -> Vec<Value> {
        content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
                ContentPart::ToolUse { id, name, input } => Some(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input
                })),
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let mut block = json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": value_to_text(content)
                    });
                    if *is_error {
                        block["is_error"] = Value::Bool(true);
                    }
                    Some(block)
                }
            })
            .collect()
    }

    /// Plain prompts stay a string, anything richer becomes text blocks.
    fn convert_system(system: &SystemPrompt) -> Option<Value> {
        if system.is_empty() {
            return None;
        }
        if let SystemPrompt::Text(text) = system {
            return Some(Value::String(text.clone()));
        }
        let blocks = system
            .blocks()
            .into_iter()
            .map(|block| {
                let mut value = json!({ "type": "text", "text": block.text });
                if block.cache {
                    value["cache_control"] = json!({ "type": "ephemeral" });
                }
                value
            })
            .collect();
        Some(Value::Array(blocks))
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters
                })
            })
            .collect()
    }

    fn convert_tool_choice(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!({ "type": "auto" }),
            ToolChoice::Any => json!({ "type": "any" }),
            ToolChoice::None => json!({ "type": "none" }),
            ToolChoice::Tool(name) => json!({ "type": "tool", "name": name }),
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn model_info(&self) -> &ModelInfo {
        &self.model
    }

    fn build_request(&self, request: &ChatRequest) -> ProviderResult<WireRequest> {
        let mut body = json!({
            "model": self.model.id,
            "max_tokens": request.max_tokens,
            "messages": Self::convert_messages(&request.messages),
        });

        if let Some(system) = request.system.as_ref().and_then(Self::convert_system) {
            body["system"] = system;
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(&request.tools));
            body["tool_choice"] = Self::convert_tool_choice(&request.tool_choice);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        Ok(WireRequest::new(self.endpoint(), body)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json"))
    }

    fn parse_response(&self, response: WireResponse) -> ProviderResult<NormalizedResponse> {
        if !response.is_success() {
            warn!(status = response.status, "Anthropic API error");
            return Err(ProviderError::from_status(response.status, &response.body));
        }

        let parsed: AnthropicResponse = serde_json::from_value(response.body.clone())
            .map_err(|e| ProviderError::invalid_response(format!("anthropic: {e}")))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ResponseBlock::Text { text: t } => text.push_str(&t),
                ResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, input })
                }
                ResponseBlock::Other => {}
            }
        }

        let usage = parsed.usage.map(Usage::from).unwrap_or_default();
        let finish_reason = parsed
            .stop_reason
            .as_deref()
            .map(FinishReason::from_anthropic)
            .unwrap_or_default();

        Ok(NormalizedResponse {
            text,
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
struct AnthropicResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

impl From<AnthropicUsage> for Usage {
    fn from(usage: AnthropicUsage) -> Self {
        Usage {
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            cache_write_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
        }
    }
}
