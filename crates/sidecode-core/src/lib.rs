//! Core logic for sidecode.
//!
//! This crate ties the other crates together:
//! - Configuration management (multi-source, JSONC support)
//! - The conversation store and its on-disk format
//! - The tool execution loop, including the manual approval queue

pub mod agent_loop;
pub mod config;
pub mod conversation;
pub mod error;

pub use agent_loop::{
    Approval, LoopConfig, ToolLoop, TurnOutcome, TurnStatus, DEFAULT_SYSTEM_PROMPT,
};
pub use config::Config;
pub use conversation::{
    Conversation, ConversationStats, ConversationStore, ConversationSummary, OperationStatus,
    PendingOperation, StoredMessage,
};
pub use error::{ConfigError, ConversationError, CoreError, CoreResult};
