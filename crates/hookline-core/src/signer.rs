//! # Payload Signing
//!
//! Builds the canonical JSON payload for an outbound delivery and signs
//! it with the record's per-webhook secret.
//!
//! The payload has a declared field set in a stable order; fields without
//! a value are serialized as `null` rather than omitted so that the
//! signature input never changes shape. Receivers verify by recomputing
//! HMAC-SHA256 over the raw body and constant-time comparing against the
//! `X-Webhook-Signature` header.

use crate::record::WebhookRecord;
use crate::Timestamp;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the lowercase-hex HMAC-SHA256 of the body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Header carrying the signing time (epoch milliseconds).
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Header carrying the webhook ID; receivers deduplicate on it.
pub const WEBHOOK_ID_HEADER: &str = "X-Webhook-ID";

/// Header carrying the event name.
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// The single event the pipeline currently emits.
pub const UPLOAD_COMPLETED_EVENT: &str = "upload.completed";

// ============================================================================
// Canonical Payload
// ============================================================================

/// Caller-supplied additions to the canonical payload.
#[derive(Debug, Clone, Default)]
pub struct PayloadExtras {
    /// Public URL of the uploaded object, when one is known.
    pub public_url: Option<String>,
}

/// The declared payload shape. Field order here is the canonical wire
/// order; absent values serialize as `null`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalPayload<'a> {
    id: String,
    event: &'static str,
    provider: &'static str,
    filename: Option<&'a str>,
    content_type: Option<&'a str>,
    file_size: Option<i64>,
    etag: Option<&'a str>,
    public_url: Option<&'a str>,
    metadata: &'a serde_json::Value,
    timestamp: String,
}

/// Build the canonical JSON body for a record.
pub fn build_payload(record: &WebhookRecord, extras: &PayloadExtras) -> Vec<u8> {
    let public_url = extras
        .public_url
        .as_deref()
        .or(record.locator.public_url.as_deref());

    let payload = CanonicalPayload {
        id: record.id.to_string(),
        event: UPLOAD_COMPLETED_EVENT,
        provider: record.provider.as_str(),
        filename: record.filename.as_deref(),
        content_type: record.content_type.as_deref(),
        file_size: record.file_size,
        etag: record.etag.as_deref(),
        public_url,
        metadata: &record.metadata,
        timestamp: Timestamp::now().to_rfc3339(),
    };

    // Serialization of this shape cannot fail: every field is a string,
    // number, or already-parsed Value.
    serde_json::to_vec(&payload).unwrap_or_default()
}

// ============================================================================
// Signing
// ============================================================================

/// Compute the lowercase-hex HMAC-SHA256 of `payload` under `secret`.
///
/// # Examples
///
/// ```rust
/// use hookline_core::signer::sign;
///
/// let signature = sign(b"payload", b"secret");
/// assert_eq!(signature.len(), 64);
/// assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a lowercase-hex signature in constant time.
///
/// This is what receivers do with the `X-Webhook-Signature` header:
/// recompute the MAC over the raw body and compare.
///
/// # Examples
///
/// ```rust
/// use hookline_core::signer::{sign, verify_signature};
///
/// let signature = sign(b"payload", b"secret");
/// assert!(verify_signature(b"payload", &signature, b"secret"));
///
/// // A different secret or a tampered body fails verification.
/// assert!(!verify_signature(b"payload", &signature, b"other-secret"));
/// assert!(!verify_signature(b"tampered", &signature, b"secret"));
/// ```
pub fn verify_signature(payload: &[u8], signature_hex: &str, secret: &[u8]) -> bool {
    let expected = sign(payload, secret);
    let provided = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let expected_bytes = match hex::decode(&expected) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    expected_bytes.ct_eq(&provided).into()
}

/// Generate a fresh per-record signing secret (hex-encoded 32 bytes).
pub fn generate_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================================================
// Signed Delivery
// ============================================================================

/// A payload with its signature and the headers it is delivered under.
#[derive(Debug, Clone)]
pub struct SignedDelivery {
    pub body: Vec<u8>,
    pub signature: String,
    pub webhook_id: String,
    pub event: &'static str,
    pub signed_at_millis: i64,
}

impl SignedDelivery {
    /// Build and sign the canonical payload for a record.
    pub fn for_record(record: &WebhookRecord, extras: &PayloadExtras) -> Self {
        let body = build_payload(record, extras);
        let signature = sign(&body, record.secret.as_bytes());
        Self {
            body,
            signature,
            webhook_id: record.id.to_string(),
            event: UPLOAD_COMPLETED_EVENT,
            signed_at_millis: Timestamp::now().epoch_millis(),
        }
    }
}

#[cfg(test)]
#[path = "signer_tests.rs"]
mod tests;
