//! Tool error types.
//!
//! Errors never leave the registry: [`crate::ToolRegistry::invoke`] turns
//! every one of them into an error [`sidecode_provider::ToolResult`].

use sidecode_sandbox::SandboxError;
use thiserror::Error;

/// Result type for tool handlers.
pub type HandlerResult<T> = Result<T, ToolError>;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Path escaped the project root.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Command denied: {0}")]
    CommandDenied(String),

    #[error("Command requires confirmation: {0}")]
    CommandRequiresConfirmation(String),

    /// Invalid parameters.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound(path.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_sandbox_message_is_preserved() {
        let err = ToolError::from(SandboxError::violation(
            Path::new("../../etc/passwd"),
            Path::new("/home/project"),
        ));
        assert!(err.to_string().contains("sandbox"));
        assert!(err.to_string().contains("../../etc/passwd"));
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(
            ToolError::NotFound("frobnicate".into()).to_string(),
            "unknown tool: frobnicate"
        );
    }
}
