//! Token accounting and finish reasons.

use serde::{Deserialize, Serialize};

/// Token usage for one response. Missing counts are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Tokens served from the provider's prompt cache.
    pub cache_read_tokens: u32,
    /// Tokens written to the provider's prompt cache.
    pub cache_write_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    /// Total tokens (input + output).
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Add all counts from another usage.
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    EndTurn,
    /// Hit a stop sequence.
    Stop,
    MaxTokens,
    /// The model wants tools to run.
    ToolUse,
    ContentFilter,
    Other,
}

impl FinishReason {
    /// Parse Anthropic's `stop_reason`.
    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "end_turn" => Self::EndTurn,
            "stop_sequence" => Self::Stop,
            "max_tokens" => Self::MaxTokens,
            "tool_use" => Self::ToolUse,
            "refusal" => Self::ContentFilter,
            _ => Self::Other,
        }
    }

    /// Parse OpenAI's `finish_reason`.
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "stop" => Self::EndTurn,
            "length" => Self::MaxTokens,
            "tool_calls" | "function_call" => Self::ToolUse,
            "content_filter" => Self::ContentFilter,
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_merge() {
        let mut usage1 = Usage::new(100, 50);
        let mut usage2 = Usage::new(200, 100);
        usage2.cache_read_tokens = 7;

        usage1.merge(&usage2);

        assert_eq!(usage1.input_tokens, 300);
        assert_eq!(usage1.output_tokens, 150);
        assert_eq!(usage1.cache_read_tokens, 7);
        assert_eq!(usage1.total(), 450);
    }

    #[test]
    fn test_usage_missing_fields_default_to_zero() {
        let usage: Usage = serde_json::from_str(r#"{"output_tokens": 3}"#).unwrap();
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 3);
        assert!(Usage::default().is_empty());
    }

    #[test]
    fn test_finish_reason_parsing() {
        assert_eq!(FinishReason::from_anthropic("end_turn"), FinishReason::EndTurn);
        assert_eq!(FinishReason::from_anthropic("tool_use"), FinishReason::ToolUse);
        assert_eq!(FinishReason::from_anthropic("pause_turn"), FinishReason::Other);

        assert_eq!(FinishReason::from_openai("stop"), FinishReason::EndTurn);
        assert_eq!(FinishReason::from_openai("tool_calls"), FinishReason::ToolUse);
        assert_eq!(FinishReason::from_openai("length"), FinishReason::MaxTokens);
    }
}
