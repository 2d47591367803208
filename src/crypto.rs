//! Symmetric protection for stored Notion credentials.
//!
//! Ciphertexts are `base64(nonce || ciphertext || tag)` using AES-256-GCM with a
//! fresh 96-bit nonce per call, so encrypting the same token twice yields
//! different strings.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use std::fmt;
use thiserror::Error;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("credential key must be {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },
    #[error("invalid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("ciphertext too short")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
    #[error("decrypted credential is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CredentialCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeySize {
            expected: KEY_SIZE,
            actual: key.len(),
        })?;
        Ok(Self { cipher })
    }

    /// Build a cipher from the base64 key stored in configuration.
    pub fn from_base64(key: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD.decode(key.trim())?;
        Self::new(&bytes)
    }

    pub fn encrypt(&self, plain: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plain.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(sealed);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let raw = STANDARD.decode(encoded.trim())?;
        if raw.len() <= NONCE_SIZE {
            return Err(CryptoError::Truncated);
        }
        let (nonce_bytes, sealed) = raw.split_at(NONCE_SIZE);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(String::from_utf8(plain)?)
    }
}
