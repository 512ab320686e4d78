//! Normalized provider responses.

use crate::message::{ContentPart, Message, Role, ToolCall};
use crate::usage::{FinishReason, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One provider round-trip, in provider-neutral form.
///
/// Text and tool calls may both be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Concatenated text output. May be empty.
    pub text: String,
    /// Tool calls in the order the model issued them.
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    /// Dollar cost of this response. Zero when pricing is unknown.
    pub cost: f64,
    pub finish_reason: FinishReason,
    /// Model id reported by the provider.
    pub model: String,
    /// Raw provider payload, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

/// What a caller receives once a turn is done.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutput {
    /// Plain text. Tool calls are dropped.
    Text(String),
    Structured(Box<NormalizedResponse>),
}

impl ResponseOutput {
    pub fn text(&self) -> &str {
        match self {
            ResponseOutput::Text(text) => text,
            ResponseOutput::Structured(response) => &response.text,
        }
    }
}

impl NormalizedResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.finish_reason = FinishReason::ToolUse;
        self.tool_calls.push(call);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Collapse to plain text unless the caller asked for the structured form.
    pub fn into_output(self, structured: bool) -> ResponseOutput {
        if structured {
            ResponseOutput::Structured(Box::new(self))
        } else {
            ResponseOutput::Text(self.text)
        }
    }

    /// The assistant message this response represents: text first, then
    /// tool calls.
    pub fn to_message(&self) -> Message {
        let mut content = Vec::with_capacity(self.tool_calls.len() + 1);
        if !self.text.is_empty() {
            content.push(ContentPart::text(self.text.clone()));
        }
        content.extend(self.tool_calls.iter().cloned().map(ContentPart::from));
        Message {
            role: Role::Assistant,
            content,
        }
    }
}
