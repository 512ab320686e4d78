//! System prompt representations.
//!
//! Callers may hand over a system prompt as a plain string, an ordered list
//! of strings, or a list of content blocks carrying cache hints. Adapters
//! render whichever form their provider supports best.

use serde::{Deserialize, Serialize};

/// A system prompt block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
    /// Ask the provider to cache the prompt up to and including this block.
    #[serde(default)]
    pub cache: bool,
}

impl SystemBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: false,
        }
    }

    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: true,
        }
    }
}

/// A system prompt in one of its accepted shapes.
///
/// Deserializes from a JSON string, an array of strings, or an array of
/// `{ "text": ..., "cache": ... }` objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Parts(Vec<String>),
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// The prompt as blocks, preserving order. Empty text is dropped.
    pub fn blocks(&self) -> Vec<SystemBlock> {
        match self {
            SystemPrompt::Text(text) => vec![SystemBlock::new(text.clone())],
            SystemPrompt::Parts(parts) => parts.iter().cloned().map(SystemBlock::new).collect(),
            SystemPrompt::Blocks(blocks) => blocks.clone(),
        }
        .into_iter()
        .filter(|b| !b.text.is_empty())
        .collect()
    }

    /// The prompt flattened to one string, parts separated by a blank line.
    pub fn joined(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            _ => self
                .blocks()
                .into_iter()
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks().is_empty()
    }
}

impl From<&str> for SystemPrompt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for SystemPrompt {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<String>> for SystemPrompt {
    fn from(parts: Vec<String>) -> Self {
        Self::Parts(parts)
    }
}

impl From<Vec<SystemBlock>> for SystemPrompt {
    fn from(blocks: Vec<SystemBlock>) -> Self {
        Self::Blocks(blocks)
    }
}
