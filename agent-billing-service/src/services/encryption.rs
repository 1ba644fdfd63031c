//! Settings encryption at rest.
//!
//! Ciphertext is stored as `enc:v1:<key_id>:<nonce>:<ciphertext>` with both
//! binary parts URL-safe base64. Anything without the prefix is treated as a
//! legacy plaintext value and returned as is.

use crate::error::{BillingError, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use secrecy::{ExposeSecret, Secret, SecretString};
use uuid::Uuid;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const MASK: &str = "********";

/// Opaque encrypt/decrypt capability used by the settings service.
pub trait EncryptionProvider: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypts an envelope; non-envelope input passes through unchanged.
    fn decrypt(&self, stored: &str) -> Result<String>;

    /// Redacted form safe for logs and audit rows.
    fn mask(&self, value: &str) -> String {
        mask(value)
    }
}

/// Keeps at most the last four characters of long values.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return MASK.to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", MASK, tail)
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENVELOPE_PREFIX)
}

/// ChaCha20-Poly1305 provider with a single active key.
pub struct ChaChaEncryption {
    key_id: String,
    key: Secret<[u8; 32]>,
}

impl ChaChaEncryption {
    pub fn new(key_id: impl Into<String>, key: [u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            key: Secret::new(key),
        }
    }

    /// Accepts URL-safe or standard base64 encoding of exactly 32 bytes.
    pub fn from_base64(key_id: impl Into<String>, encoded: &SecretString) -> Result<Self> {
        let encoded = encoded.expose_secret().trim();
        let decoded = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .or_else(|_| STANDARD.decode(encoded.as_bytes()))
            .map_err(|_| BillingError::Encryption("encryption key is not valid base64".to_string()))?;
        if decoded.len() != 32 {
            return Err(BillingError::Encryption(format!(
                "encryption key must be 32 bytes, got {}",
                decoded.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded);
        Ok(Self::new(key_id, key))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(self.key.expose_secret())
            .map_err(|_| BillingError::Encryption("failed to initialise cipher".to_string()))
    }
}

impl EncryptionProvider for ChaChaEncryption {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        if is_encrypted(plaintext) {
            return Ok(plaintext.to_string());
        }

        let nonce_source = Uuid::new_v4().into_bytes();
        let nonce = Nonce::from_slice(&nonce_source[..12]);
        let ciphertext = self
            .cipher()?
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| BillingError::Encryption("failed to encrypt value".to_string()))?;

        Ok(format!(
            "{}{}:{}:{}",
            ENVELOPE_PREFIX,
            self.key_id,
            URL_SAFE_NO_PAD.encode(&nonce_source[..12]),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    fn decrypt(&self, stored: &str) -> Result<String> {
        let Some(envelope) = stored.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(stored.to_string());
        };

        let parts: Vec<&str> = envelope.split(':').collect();
        let [key_id, nonce_b64, ciphertext_b64] = parts.as_slice() else {
            return Err(BillingError::Encryption("invalid envelope".to_string()));
        };
        if *key_id != self.key_id {
            return Err(BillingError::Encryption(format!(
                "key id {} is not configured",
                key_id
            )));
        }

        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64.as_bytes())
            .map_err(|_| BillingError::Encryption("invalid nonce encoding".to_string()))?;
        if nonce_raw.len() != 12 {
            return Err(BillingError::Encryption("invalid nonce length".to_string()));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64.as_bytes())
            .map_err(|_| BillingError::Encryption("invalid ciphertext encoding".to_string()))?;

        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_ref())
            .map_err(|_| BillingError::Encryption("failed to decrypt value".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| BillingError::Encryption("decrypted value is not UTF-8".to_string()))
    }
}

/// Provider for deployments without a configured key. Values are stored as
/// given and only legacy plaintext can be read back.
pub struct PlaintextEncryption;

impl EncryptionProvider for PlaintextEncryption {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, stored: &str) -> Result<String> {
        if is_encrypted(stored) {
            return Err(BillingError::Encryption(
                "value is encrypted but no key is configured".to_string(),
            ));
        }
        Ok(stored.to_string())
    }
}
