//! Error types for the core crate.

use std::time::Duration;
use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Conversation lookup or state error.
    #[error("conversation error: {0}")]
    Conversation(#[from] ConversationError),

    /// Reading or writing a conversation file failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] sidecode_storage::StorageError),

    /// The model call failed.
    #[error("provider error: {0}")]
    Provider(#[from] sidecode_provider::ProviderError),

    /// The project root is unusable.
    #[error(transparent)]
    Sandbox(#[from] sidecode_sandbox::SandboxError),

    /// The turn was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// A provider round exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Config validation failed.
    #[error("config validation failed: {message}")]
    Validation { message: String },

    /// Environment variable not found during substitution.
    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    /// File reference not found during substitution.
    #[error("file reference not found: {path}")]
    FileRefNotFound { path: String },

    /// No API key in the config or the provider's environment variable.
    #[error("missing API key for {provider}: set {env} or provider.api_key")]
    MissingApiKey { provider: String, env: String },

    /// Encryption is on but no passphrase was supplied.
    #[error("storage.encryption is enabled but {env} is not set")]
    MissingPassphrase { env: String },

    /// Invalid path (e.g., could not determine the data directory).
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Conversation-specific errors.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Conversation not found in memory or on disk.
    #[error("conversation not found: {id}")]
    NotFound { id: String },

    /// An approval names an operation the conversation does not hold.
    #[error("pending operation not found: {id}")]
    OperationNotFound { id: String },

    /// `resolve_pending` was called with nothing awaiting approval.
    #[error("conversation {id} has no pending operations")]
    NothingPending { id: String },
}

impl ConversationError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

impl CoreError {
    /// True when the error means the conversation does not exist, as opposed
    /// to existing but being unreadable.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::Conversation(ConversationError::NotFound { .. })
        )
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct_from_corrupted() {
        let missing: CoreError = ConversationError::not_found("cnv_1").into();
        assert!(missing.is_not_found());
        assert_eq!(
            missing.to_string(),
            "conversation error: conversation not found: cnv_1"
        );

        let corrupted: CoreError =
            sidecode_storage::StorageError::corrupted("/tmp/cnv_1.json", "eof").into();
        assert!(!corrupted.is_not_found());
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::MissingApiKey {
            provider: "anthropic".into(),
            env: "ANTHROPIC_API_KEY".into(),
        };
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
        assert_eq!(
            ConfigError::validation("max_rounds must be at least 1").to_string(),
            "config validation failed: max_rounds must be at least 1"
        );
    }
}
