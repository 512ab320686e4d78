//! JSON file-based storage implementation.
//!
//! Each key is stored as a separate JSON file:
//! `["conversation", "cnv_123"]` -> `conversation/cnv_123.json`.
//! With a [`Cipher`] configured, files hold an [`EncryptedEnvelope`] instead.

use crate::crypto::{Cipher, EncryptedEnvelope};
use crate::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// JSON file-based storage.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    base_path: PathBuf,
    cipher: Option<Arc<Cipher>>,
}

impl JsonStorage {
    /// Create a new JSON storage at the given base path.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cipher: None,
        }
    }

    /// Encrypt every write. Plain files written earlier stay readable.
    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = Some(Arc::new(cipher));
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Get the file path for a key.
    pub fn key_to_path(&self, key: &[&str]) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::invalid_key("Key cannot be empty"));
        }

        // No path traversal
        for component in key {
            if component.is_empty()
                || component.contains('/')
                || component.contains('\\')
                || *component == "."
                || *component == ".."
            {
                return Err(StorageError::invalid_key(format!(
                    "Invalid key component: {component}"
                )));
            }
        }

        let mut path = self.base_path.clone();
        for component in key {
            path.push(component);
        }
        path.set_extension("json");

        Ok(path)
    }

    fn prefix_to_dir(&self, prefix: &[&str]) -> PathBuf {
        let mut path = self.base_path.clone();
        for component in prefix {
            path.push(component);
        }
        path
    }

    /// Turn raw file bytes into plaintext JSON, decrypting if needed.
    async fn open(&self, path: &Path, bytes: Vec<u8>) -> StorageResult<Vec<u8>> {
        let Some(envelope) = EncryptedEnvelope::parse(&bytes) else {
            return Ok(bytes);
        };
        let Some(cipher) = self.cipher.clone() else {
            return Err(StorageError::Encrypted(path.to_path_buf()));
        };
        // Argon2 is CPU-bound
        let plaintext = tokio::task::spawn_blocking(move || cipher.decrypt(&envelope))
            .await
            .map_err(|e| StorageError::corrupted(path, e))??;
        Ok(plaintext)
    }

    async fn seal(&self, path: &Path, plaintext: Vec<u8>) -> StorageResult<Vec<u8>> {
        let Some(cipher) = self.cipher.clone() else {
            return Ok(plaintext);
        };
        let envelope = tokio::task::spawn_blocking(move || cipher.encrypt(&plaintext))
            .await
            .map_err(|e| StorageError::corrupted(path, e))??;
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        let path = self.key_to_path(key)?;
        debug!(path = %path.display(), "Reading from storage");

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let plaintext = self.open(&path, bytes).await?;
        let value = serde_json::from_slice(&plaintext)
            .map_err(|e| StorageError::corrupted(&path, e))?;
        Ok(Some(value))
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        debug!(path = %path.display(), encrypted = self.is_encrypted(), "Writing to storage");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let plaintext = serde_json::to_vec_pretty(value)?;
        let content = self.seal(&path, plaintext).await?;

        // Write to a temp file, then rename over the target
        let temp_path = path.with_extension("json.tmp");
        if let Err(e) = fs::write(&temp_path, &content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        let dir = self.prefix_to_dir(prefix);
        debug!(path = %dir.display(), "Listing storage");

        let mut results = Vec::new();

        match fs::read_dir(&dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();

                    // Only include .json files
                    if path.extension().is_some_and(|ext| ext == "json") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            let mut key: Vec<String> =
                                prefix.iter().map(|s| s.to_string()).collect();
                            key.push(stem.to_string());
                            results.push(key);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }

        results.sort();
        Ok(results)
    }
}

/// Create a storage instance at the default data directory.
pub fn default_storage() -> Option<JsonStorage> {
    sidecode_util::log::default_data_dir().map(|p| JsonStorage::new(p.join("data")))
}
