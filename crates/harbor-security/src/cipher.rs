//! Symmetric encryption for credential columns.
//!
//! Ciphertexts are stored as base64(nonce || AES-256-GCM ciphertext). The key
//! is supplied once at process start and is never logged.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::SecurityError;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").field("key", &"[REDACTED]").finish()
    }
}

impl TokenCipher {
    pub fn new(key: &[u8]) -> Result<Self, SecurityError> {
        if key.len() != KEY_SIZE {
            return Err(SecurityError::InvalidKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|err| SecurityError::InvalidKey(err.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn from_base64(encoded_key: &str) -> Result<Self, SecurityError> {
        let key = BASE64
            .decode(encoded_key.trim())
            .map_err(|err| SecurityError::InvalidKey(err.to_string()))?;
        Self::new(&key)
    }

    /// Generates a fresh random key, base64 encoded for storage.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecurityError> {
        if plaintext.is_empty() {
            return Err(SecurityError::Cipher("cannot encrypt empty plaintext".to_string()));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|err| SecurityError::Cipher(format!("encryption failed: {err}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, SecurityError> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|err| SecurityError::Cipher(format!("invalid encoding: {err}")))?;
        if combined.len() <= NONCE_SIZE {
            return Err(SecurityError::Cipher("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|err| SecurityError::Cipher(format!("decryption failed: {err}")))?;

        String::from_utf8(plaintext)
            .map_err(|err| SecurityError::Cipher(format!("plaintext is not utf-8: {err}")))
    }
}
