//! # Credential Sealing
//!
//! Records for auto-verified S3/R2 webhooks embed provider credentials.
//! At rest they are wrapped with AES-256-GCM; plaintext lives only in
//! memory for the duration of a verification call and is zeroized on
//! drop. Credentials are never logged; `Debug` output is redacted.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

/// Errors produced by credential sealing and unsealing.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("sealed blob is truncated")]
    Truncated,

    #[error("encryption failure")]
    SealFailure,

    #[error("decryption failure")]
    UnsealFailure,

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("credential encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

// ============================================================================
// Key Material
// ============================================================================

/// The process-wide key used to seal provider credentials at rest.
#[derive(Clone)]
pub struct CredentialKey(Zeroizing<[u8; KEY_LENGTH]>);

impl CredentialKey {
    /// Construct a key from a base64-encoded string (deployment config).
    pub fn from_base64(value: &str) -> Result<Self, CredentialError> {
        let decoded = BASE64_STANDARD.decode(value.trim())?;
        Self::from_bytes(&decoded)
    }

    /// Construct a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CredentialError> {
        if bytes.len() != KEY_LENGTH {
            return Err(CredentialError::InvalidKeyLength {
                expected: KEY_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut array = [0u8; KEY_LENGTH];
        array.copy_from_slice(bytes);
        Ok(Self(Zeroizing::new(array)))
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut array = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut array);
        Self(Zeroizing::new(array))
    }
}

impl std::fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Plaintext provider credentials, alive only inside a verification call.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores (R2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("access_key_id", &"[REDACTED]")
            .field("secret_access_key", &"[REDACTED]")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Drop for ProviderCredentials {
    fn drop(&mut self) {
        self.access_key_id.zeroize();
        self.secret_access_key.zeroize();
    }
}

/// Base64-encoded `nonce ‖ ciphertext` blob as stored on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedCredentials(String);

impl SealedCredentials {
    /// Wrap an already-sealed blob (as read from storage).
    pub fn from_blob(blob: String) -> Self {
        Self(blob)
    }

    /// Get the stored blob.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Seal credentials for storage.
pub fn seal(
    key: &CredentialKey,
    credentials: &ProviderCredentials,
) -> Result<SealedCredentials, CredentialError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(credentials)?);

    let cipher = Aes256Gcm::new_from_slice(key.0.as_ref()).map_err(|_| {
        CredentialError::InvalidKeyLength {
            expected: KEY_LENGTH,
            actual: key.0.len(),
        }
    })?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| CredentialError::SealFailure)?;

    let mut blob = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.append(&mut ciphertext);

    Ok(SealedCredentials(BASE64_STANDARD.encode(blob)))
}

/// Unseal credentials for immediate use.
pub fn unseal(
    key: &CredentialKey,
    sealed: &SealedCredentials,
) -> Result<ProviderCredentials, CredentialError> {
    let blob = BASE64_STANDARD.decode(&sealed.0)?;
    if blob.len() <= NONCE_LENGTH {
        return Err(CredentialError::Truncated);
    }

    let cipher = Aes256Gcm::new_from_slice(key.0.as_ref()).map_err(|_| {
        CredentialError::InvalidKeyLength {
            expected: KEY_LENGTH,
            actual: key.0.len(),
        }
    })?;

    let nonce = Nonce::from_slice(&blob[..NONCE_LENGTH]);
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(nonce, &blob[NONCE_LENGTH..])
            .map_err(|_| CredentialError::UnsealFailure)?,
    );

    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
