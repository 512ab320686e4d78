//! Model information and pricing.

use crate::usage::Usage;
use serde::{Deserialize, Serialize};

/// Information about a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model ID sent on the wire (e.g., "claude-sonnet-4-20250514").
    pub id: String,
    /// Provider ID ("anthropic" or "openai").
    pub provider_id: String,
    /// Human-readable name.
    pub name: String,
    /// Pricing. All zero for unknown models.
    #[serde(default)]
    pub cost: ModelCost,
    /// Maximum output tokens the model accepts, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output: Option<u32>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider_id: provider_id.into(),
            cost: ModelCost::default(),
            max_output: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_cost(mut self, cost: ModelCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_max_output(mut self, max_output: u32) -> Self {
        self.max_output = Some(max_output);
        self
    }

    /// Look up a model in the built-in table, falling back to an unpriced
    /// entry with the given id.
    pub fn lookup(provider_id: &str, model_id: &str) -> Self {
        known_models()
            .into_iter()
            .find(|m| m.provider_id == provider_id && m.id == model_id)
            .unwrap_or_else(|| Self::new(model_id, provider_id))
    }
}

/// Model pricing in dollars per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl ModelCost {
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, read: f64, write: f64) -> Self {
        self.cache_read = read;
        self.cache_write = write;
        self
    }

    /// Dollar cost of `usage`.
    pub fn calculate(&self, usage: &Usage) -> f64 {
        let per_token = |tokens: u32, rate: f64| (tokens as f64 / 1_000_000.0) * rate;
        per_token(usage.input_tokens, self.input)
            + per_token(usage.output_tokens, self.output)
            + per_token(usage.cache_read_tokens, self.cache_read)
            + per_token(usage.cache_write_tokens, self.cache_write)
    }
}

/// Models with known pricing.
pub fn known_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo::new("claude-sonnet-4-20250514", "anthropic")
            .with_name("Claude Sonnet 4")
            .with_cost(ModelCost::new(3.0, 15.0).with_cache(0.3, 3.75))
            .with_max_output(64_000),
        ModelInfo::new("claude-opus-4-20250514", "anthropic")
            .with_name("Claude Opus 4")
            .with_cost(ModelCost::new(15.0, 75.0).with_cache(1.5, 18.75))
            .with_max_output(32_000),
        ModelInfo::new("claude-3-5-haiku-20241022", "anthropic")
            .with_name("Claude Haiku 3.5")
            .with_cost(ModelCost::new(0.8, 4.0).with_cache(0.08, 1.0))
            .with_max_output(8_192),
        ModelInfo::new("gpt-4o", "openai")
            .with_name("GPT-4o")
            .with_cost(ModelCost::new(2.5, 10.0).with_cache(1.25, 0.0))
            .with_max_output(16_384),
        ModelInfo::new("gpt-4o-mini", "openai")
            .with_name("GPT-4o mini")
            .with_cost(ModelCost::new(0.15, 0.6).with_cache(0.075, 0.0))
            .with_max_output(16_384),
        ModelInfo::new("gpt-4.1", "openai")
            .with_name("GPT-4.1")
            .with_cost(ModelCost::new(2.0, 8.0).with_cache(0.5, 0.0))
            .with_max_output(32_768),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_calculation() {
        let cost = ModelCost::new(3.0, 15.0).with_cache(0.3, 3.75);
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            cache_read_tokens: 1_000_000,
            cache_write_tokens: 0,
        };
        let total = cost.calculate(&usage);
        assert!((total - 4.8).abs() < 1e-9);
    }

    #[test]
    fn test_zero_usage_costs_nothing() {
        let cost = ModelCost::new(15.0, 75.0);
        assert_eq!(cost.calculate(&Usage::default()), 0.0);
    }

    #[test]
    fn test_lookup() {
        let known = ModelInfo::lookup("anthropic", "claude-sonnet-4-20250514");
        assert_eq!(known.name, "Claude Sonnet 4");
        assert!(known.cost.input > 0.0);

        let unknown = ModelInfo::lookup("openai", "my-finetune");
        assert_eq!(unknown.id, "my-finetune");
        assert_eq!(unknown.cost, ModelCost::default());
    }
}
