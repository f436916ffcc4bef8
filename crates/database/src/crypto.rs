// Tenant database credential encryption (AES-256-GCM)

use crate::error::{Result, TenancyError};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use std::fmt;

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts the `password` column of tenant records.
///
/// Format: base64(nonce || ciphertext || tag)
/// - nonce: 12 bytes
/// - tag: 16 bytes (appended by AES-GCM)
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Build from a base64-encoded 32-byte key.
    ///
    /// Generate a key with: `openssl rand -base64 32`
    pub fn from_base64(key_b64: &str) -> Result<Self> {
        let key_bytes = STANDARD
            .decode(key_b64.trim())
            .map_err(|e| TenancyError::Configuration(format!("Invalid encryption key format: {}", e)))?;

        let key: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            TenancyError::Configuration(format!(
                "Encryption key must be 32 bytes (256 bits), got {} bytes",
                key_bytes.len()
            ))
        })?;

        Ok(Self::new(key))
    }

    /// Reads TENANT_DB_ENCRYPTION_KEY. Unset means credentials are stored in plain text.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var("TENANT_DB_ENCRYPTION_KEY") {
            Ok(key) if !key.trim().is_empty() => Self::from_base64(&key).map(Some),
            _ => Ok(None),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| TenancyError::Configuration(format!("Encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let cipher = self.cipher()?;

        let combined = STANDARD.decode(encrypted.trim()).map_err(|e| {
            TenancyError::Configuration(format!("Invalid encrypted credential format: {}", e))
        })?;

        if combined.len() < NONCE_LEN {
            return Err(TenancyError::Configuration(
                "Encrypted credential too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| TenancyError::Configuration(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext).map_err(|e| {
            TenancyError::Configuration(format!("Invalid credential encoding: {}", e))
        })
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| TenancyError::Configuration(format!("Invalid encryption key: {}", e)))
    }
}
