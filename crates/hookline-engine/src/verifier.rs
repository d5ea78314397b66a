//! # Object Verifier
//!
//! Confirms that an uploaded object actually exists at the backing
//! provider before an auto-triggered webhook fires.
//!
//! S3 and R2 get a real HEAD request with the record's sealed
//! credentials (R2 through its S3-compatible endpoint). The CDN-fronted
//! providers create records only after a provider-side success response,
//! so verification is skipped for them; likewise when an S3/R2 record
//! carries no credentials (the manual-trigger path where the client
//! vouches for the upload).

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use hookline_core::credentials::{self, CredentialError, CredentialKey};
use hookline_core::record::WebhookRecord;
use hookline_core::Timestamp;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Reason attached to skipped verifications of CDN providers.
pub const REASON_NO_VERIFICATION: &str = "provider_no_verification";

/// Reason attached to skipped verifications of records without
/// credentials.
pub const REASON_NO_CREDENTIALS: &str = "no_credentials_stored";

/// Polling backoff: initial delay.
const POLL_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Polling backoff: multiplier per round.
const POLL_MULTIPLIER: f64 = 1.5;

/// Polling backoff: upper bound.
const POLL_MAX_DELAY: Duration = Duration::from_secs(5);

/// Default overall polling budget; sized for cross-region replication
/// latency on large objects.
pub const DEFAULT_WAIT_FOR_OBJECT: Duration = Duration::from_secs(120);

// ============================================================================
// Types
// ============================================================================

/// Object metadata returned by a successful HEAD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub content_length: Option<i64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<Timestamp>,
    pub user_metadata: HashMap<String, String>,
}

/// Outcome of a verification call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verification {
    pub exists: bool,
    pub skipped: bool,
    pub reason: Option<String>,
    pub metadata: Option<ObjectMetadata>,
}

impl Verification {
    pub fn skipped(reason: &str) -> Self {
        Self {
            exists: true,
            skipped: true,
            reason: Some(reason.to_string()),
            metadata: None,
        }
    }

    pub fn missing() -> Self {
        Self {
            exists: false,
            skipped: false,
            reason: Some("not_found".to_string()),
            metadata: None,
        }
    }

    pub fn found(metadata: ObjectMetadata) -> Self {
        Self {
            exists: true,
            skipped: false,
            reason: None,
            metadata: Some(metadata),
        }
    }
}

/// Errors produced by verification.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("ETag mismatch: expected {expected}, provider returned {actual}")]
    EtagMismatch { expected: String, actual: String },

    #[error("provider request failed: {message}")]
    Transient { message: String },

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("record locator is missing required field '{field}'")]
    IncompleteLocator { field: &'static str },
}

impl VerifierError {
    /// ETag mismatches are retryable: the object may still be settling
    /// after cross-region replication.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EtagMismatch { .. } => true,
            Self::Transient { .. } => true,
            Self::Credential(_) => false,
            Self::IncompleteLocator { .. } => false,
        }
    }
}

/// Interface for provider existence checks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectVerifier: Send + Sync {
    async fn verify(&self, record: &WebhookRecord) -> Result<Verification, VerifierError>;
}

// ============================================================================
// S3 / R2 Implementation
// ============================================================================

/// HEAD-based verifier for S3-compatible providers.
pub struct S3ObjectVerifier {
    key: CredentialKey,
}

impl S3ObjectVerifier {
    pub fn new(key: CredentialKey) -> Self {
        Self { key }
    }

    /// ETags come back quoted from S3; records may store either form.
    fn normalize_etag(etag: &str) -> &str {
        etag.trim_matches('"')
    }
}

#[async_trait]
impl ObjectVerifier for S3ObjectVerifier {
    async fn verify(&self, record: &WebhookRecord) -> Result<Verification, VerifierError> {
        if !record.provider.supports_verification() {
            return Ok(Verification::skipped(REASON_NO_VERIFICATION));
        }

        let Some(sealed) = record.locator.credentials.as_ref() else {
            // Manual-trigger shape: the client vouched for the upload.
            return Ok(Verification::skipped(REASON_NO_CREDENTIALS));
        };

        let bucket = record
            .locator
            .bucket
            .as_deref()
            .ok_or(VerifierError::IncompleteLocator { field: "bucket" })?;
        let object_key = record
            .locator
            .key
            .as_deref()
            .ok_or(VerifierError::IncompleteLocator { field: "key" })?;

        // Plaintext credentials live only inside this frame.
        let creds = credentials::unseal(&self.key, sealed)?;

        let region = creds.region.clone().unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                None,
                None,
                "hookline-record",
            ));
        if let Some(endpoint) = creds.endpoint.as_deref() {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        let head = match client
            .head_object()
            .bucket(bucket)
            .key(object_key)
            .send()
            .await
        {
            Ok(head) => head,
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    debug!(component = "verifier", webhook_id = %record.id,
                        "object not yet present at provider");
                    return Ok(Verification::missing());
                }
                return Err(VerifierError::Transient {
                    message: err.to_string(),
                });
            }
        };

        let provider_etag = head.e_tag().map(|etag| Self::normalize_etag(etag).to_string());

        if let (Some(expected), Some(actual)) = (record.etag.as_deref(), provider_etag.as_deref())
        {
            if Self::normalize_etag(expected) != actual {
                return Err(VerifierError::EtagMismatch {
                    expected: Self::normalize_etag(expected).to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let last_modified = head.last_modified().and_then(|dt| {
            chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
                .map(Timestamp::from_datetime)
        });

        Ok(Verification::found(ObjectMetadata {
            content_length: head.content_length(),
            content_type: head.content_type().map(String::from),
            etag: provider_etag,
            last_modified,
            user_metadata: head.metadata().cloned().unwrap_or_default(),
        }))
    }
}

// ============================================================================
// Polling Helper
// ============================================================================

/// Poll [`ObjectVerifier::verify`] with exponential backoff until the
/// object exists, verification is skipped, or `max_wait` elapses.
///
/// The last observation is returned either way; callers distinguish
/// timeout by `exists == false`.
pub async fn wait_for_object(
    verifier: &dyn ObjectVerifier,
    record: &WebhookRecord,
    max_wait: Duration,
) -> Result<Verification, VerifierError> {
    let started = tokio::time::Instant::now();
    let mut delay = POLL_INITIAL_DELAY;

    loop {
        let verification = verifier.verify(record).await?;
        if verification.exists || verification.skipped {
            return Ok(verification);
        }

        if started.elapsed() + delay >= max_wait {
            return Ok(verification);
        }

        tokio::time::sleep(delay).await;
        delay = Duration::from_secs_f64((delay.as_secs_f64() * POLL_MULTIPLIER).min(POLL_MAX_DELAY.as_secs_f64()));
    }
}

#[cfg(test)]
#[path = "verifier_tests.rs"]
mod tests;
