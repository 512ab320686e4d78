//! Storage layer for sidecode.
//!
//! A small key-value abstraction over JSON files, with optional
//! passphrase encryption of every file at rest.

pub mod crypto;
pub mod error;
pub mod json;

pub use crypto::{Cipher, CryptoError, EncryptedEnvelope};
pub use error::{StorageError, StorageResult};
pub use json::JsonStorage;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A trait for key-value storage backends.
///
/// Keys are represented as path segments, e.g., `["conversation", "cnv_123"]`.
/// Values are serialized/deserialized as JSON.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value from storage.
    ///
    /// Returns `None` if the key doesn't exist. A file that exists but
    /// cannot be decoded is an error, never `None`.
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>>;

    /// Write a value to storage atomically.
    ///
    /// Creates parent directories if necessary.
    async fn write<T: Serialize + Send + Sync>(&self, key: &[&str], value: &T)
        -> StorageResult<()>;

    /// List all keys under a prefix, sorted.
    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>>;
}
