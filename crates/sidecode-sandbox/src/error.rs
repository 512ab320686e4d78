//! Error types for sandbox operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while confining paths to the project root.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Path resolves outside the project root.
    #[error("sandbox violation: '{path}' resolves outside the project root '{root}'")]
    Violation { path: PathBuf, root: PathBuf },

    /// The project root itself cannot be used.
    #[error("invalid sandbox root '{path}': {message}")]
    InvalidRoot { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn violation(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self::Violation {
            path: path.into(),
            root: root.into(),
        }
    }

    pub fn invalid_root(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidRoot {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Violation { .. })
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
