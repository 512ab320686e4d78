//! Passphrase-based encryption for persisted files.
//!
//! A 32-byte key is derived from the passphrase with Argon2id over a random
//! salt, then the payload is sealed with AES-256-GCM. The salt and nonce
//! travel alongside the ciphertext in an [`EncryptedEnvelope`].
//!
//! A [`Cipher`] derives its write key once and seals every write with it
//! under a fresh nonce. Keys for salts found on disk are kept in a small
//! bounded cache.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// Current envelope format.
pub const ENVELOPE_VERSION: u32 = 1;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
/// Read keys kept per cipher.
const MAX_CACHED_KEYS: usize = 16;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Wrong passphrase or tampered ciphertext; AES-GCM cannot tell them apart.
    #[error("Decryption failed: wrong passphrase or corrupted data")]
    Decryption,

    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

/// On-disk form of an encrypted payload. Binary fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedEnvelope {
    pub version: u32,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

impl EncryptedEnvelope {
    /// Parse `bytes` as an envelope. Returns `None` for any other JSON
    /// document, so plain files can sit next to encrypted ones.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Encrypts and decrypts with keys derived from one passphrase.
pub struct Cipher {
    passphrase: String,
    /// Salt and key used for every write, derived on first use.
    write_key: OnceCell<([u8; SALT_LEN], [u8; KEY_LEN])>,
    /// Keys for salts read from disk.
    key_cache: Mutex<HashMap<[u8; SALT_LEN], [u8; KEY_LEN]>>,
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    pub fn new(passphrase: impl Into<String>) -> CryptoResult<Self> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(CryptoError::KeyDerivation("passphrase is empty".into()));
        }
        Ok(Self {
            passphrase,
            write_key: OnceCell::new(),
            key_cache: Mutex::new(HashMap::new()),
        })
    }

    fn derive(&self, salt: &[u8; SALT_LEN]) -> CryptoResult<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    fn write_key(&self) -> CryptoResult<&([u8; SALT_LEN], [u8; KEY_LEN])> {
        self.write_key.get_or_try_init(|| {
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            Ok((salt, self.derive(&salt)?))
        })
    }

    fn read_key(&self, salt: &[u8; SALT_LEN]) -> CryptoResult<[u8; KEY_LEN]> {
        if let Some((write_salt, key)) = self.write_key.get() {
            if write_salt == salt {
                return Ok(*key);
            }
        }

        let mut cache = self
            .key_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(key) = cache.get(salt) {
            return Ok(*key);
        }
        let key = self.derive(salt)?;
        remember(&mut cache, *salt, key);
        Ok(key)
    }

    /// Seal `plaintext` with this cipher's write key and a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<EncryptedEnvelope> {
        let (salt, key) = self.write_key()?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(EncryptedEnvelope {
            version: ENVELOPE_VERSION,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> CryptoResult<Vec<u8>> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::Malformed(format!(
                "unsupported version {}",
                envelope.version
            )));
        }
        let salt: [u8; SALT_LEN] = decode_field("salt", &envelope.salt)?
            .try_into()
            .map_err(|_| CryptoError::Malformed(format!("salt must be {SALT_LEN} bytes")))?;
        let nonce = decode_field("nonce", &envelope.nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::Malformed(format!(
                "nonce must be {NONCE_LEN} bytes"
            )));
        }
        let ciphertext = decode_field("ciphertext", &envelope.ciphertext)?;

        let key = self.read_key(&salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decryption)
    }
}

fn remember(
    cache: &mut HashMap<[u8; SALT_LEN], [u8; KEY_LEN]>,
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
) {
    if cache.len() >= MAX_CACHED_KEYS {
        if let Some(evicted) = cache.keys().next().copied() {
            cache.remove(&evicted);
        }
    }
    cache.insert(salt, key);
}

fn decode_field(name: &str, value: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::Malformed(format!("{name}: {e}")))
}
