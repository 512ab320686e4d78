//! Storage error types.

use crate::crypto::CryptoError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error (permission denied, disk full, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error while writing.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// A file exists but does not hold the expected document.
    #[error("Corrupted file {}: {message}", path.display())]
    Corrupted { path: PathBuf, message: String },

    /// The file is encrypted and no passphrase was configured.
    #[error("File {} is encrypted; a passphrase is required", .0.display())]
    Encrypted(PathBuf),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Invalid key format
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    /// Create a not found error with the given key.
    pub fn not_found(key: &[&str]) -> Self {
        Self::NotFound(key.join("/"))
    }

    /// Create an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    pub fn corrupted(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Corrupted {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// True when the stored bytes exist but cannot be turned into a value.
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. } | Self::Encrypted(_) | Self::Crypto(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_not_found_formats_key() {
        let err = StorageError::not_found(&["conversation", "cnv_456"]);
        assert_eq!(err.to_string(), "Key not found: conversation/cnv_456");
    }

    #[test]
    fn storage_error_invalid_key_formats_message() {
        let err = StorageError::invalid_key("empty key component");
        assert_eq!(err.to_string(), "Invalid key: empty key component");
    }

    #[test]
    fn storage_error_corrupted_names_file() {
        let err = StorageError::corrupted("/data/conversation/cnv_1.json", "expected value");
        assert_eq!(
            err.to_string(),
            "Corrupted file /data/conversation/cnv_1.json: expected value"
        );
        assert!(err.is_unreadable());
    }

    #[test]
    fn storage_error_crypto_is_transparent() {
        let err = StorageError::from(CryptoError::Decryption);
        assert_eq!(err.to_string(), CryptoError::Decryption.to_string());
        assert!(err.is_unreadable());
        assert!(!StorageError::not_found(&["x"]).is_unreadable());
    }

    #[test]
    fn storage_error_io_wraps_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StorageError::from(io_err);
        assert!(err.to_string().contains("IO error"));
    }
}
