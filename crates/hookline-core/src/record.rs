//! # Webhook Record Model
//!
//! The webhook record is the pipeline's primary entity: one row per
//! post-upload notification, created by the upstream signed-URL handlers
//! and mutated exclusively by the delivery engine and the dead-letter
//! reaper.

use crate::credentials::SealedCredentials;
use crate::{ParseError, TenantId, Timestamp, ValidationError, WebhookId};
use crate::{ApiKeyId, Uuid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Enumerations
// ============================================================================

/// Backing object-store provider for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageProvider {
    S3,
    R2,
    Supabase,
    Uploadcare,
    Vercel,
}

impl StorageProvider {
    /// Get string representation used in keys, columns, and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::R2 => "r2",
            Self::Supabase => "supabase",
            Self::Uploadcare => "uploadcare",
            Self::Vercel => "vercel",
        }
    }

    /// Whether the provider exposes a HEAD-style existence check the
    /// verifier can use. CDN-fronted providers only create records after
    /// a provider-side success, so verification is skipped for them.
    pub fn supports_verification(&self) -> bool {
        matches!(self, Self::S3 | Self::R2)
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StorageProvider {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "r2" => Ok(Self::R2),
            "supabase" => Ok(Self::Supabase),
            "uploadcare" => Ok(Self::Uploadcare),
            "vercel" => Ok(Self::Vercel),
            _ => Err(ParseError::InvalidFormat {
                expected: "s3, r2, supabase, uploadcare, or vercel".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// How delivery is triggered after upload.
///
/// `Manual` trusts the client's post-upload confirmation; `Auto` makes
/// the engine verify object existence with the provider before firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Manual,
    Auto,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

impl FromStr for TriggerMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            _ => Err(ParseError::InvalidFormat {
                expected: "manual or auto".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a webhook record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Verifying,
    Delivering,
    Completed,
    Failed,
    DeadLetter,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// Terminal states never transition away on their own. `Completed`
    /// is sticky; `DeadLetter` and `Failed` can only be reset through an
    /// explicit operator or reaper action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLetter | Self::Failed)
    }

    /// Check whether a transition is legal.
    ///
    /// The success path is monotone `pending → verifying → delivering →
    /// completed`; manual-trigger records skip `verifying`. A retry
    /// schedule moves an in-flight record back to `pending`. Any
    /// non-terminal state may dead-letter. Resets out of `DeadLetter` and
    /// `Failed` go through [`WebhookStatus::Pending`] only.
    pub fn can_transition_to(&self, next: WebhookStatus) -> bool {
        use WebhookStatus::*;
        match (self, next) {
            // No self-transitions; updates to the same state are no-ops
            // handled by the stores.
            (a, b) if *a == b => false,

            (Pending, Verifying) => true,
            (Pending, Delivering) => true,
            (Verifying, Delivering) => true,
            (Delivering, Completed) => true,

            // Retry scheduled: back onto the queue.
            (Verifying, Pending) => true,
            (Delivering, Pending) => true,

            // Expired confirmation or permanent validation failure.
            (Pending, Failed) => true,
            (Verifying, Failed) => true,
            (Delivering, Failed) => true,

            // Attempts exhausted from any non-terminal state.
            (Pending, DeadLetter) => true,
            (Verifying, DeadLetter) => true,
            (Delivering, DeadLetter) => true,

            // Operator retry / reaper resurrection.
            (DeadLetter, Pending) => true,
            (Failed, Pending) => true,

            _ => false,
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verifying" => Ok(Self::Verifying),
            "delivering" => Ok(Self::Delivering),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead_letter" => Ok(Self::DeadLetter),
            _ => Err(ParseError::InvalidFormat {
                expected: "a webhook status".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Provider Locator
// ============================================================================

/// Provider-shaped descriptor of the uploaded object, sufficient for the
/// verifier to locate it.
///
/// For S3/R2 this is `{bucket, key}` plus sealed credentials; for the
/// CDN-fronted providers it is the file key and CDN UUID. Credentials are
/// stored sealed with authenticated encryption; plaintext exists only in
/// memory for the duration of a verification call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderLocator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Sealed provider credentials, when the record carries any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SealedCredentials>,
}

impl ProviderLocator {
    /// Locator for an S3-compatible object.
    pub fn s3(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Locator for a CDN-delivered file.
    pub fn cdn(file_key: impl Into<String>, cdn_uuid: impl Into<String>) -> Self {
        Self {
            file_key: Some(file_key.into()),
            cdn_uuid: Some(cdn_uuid.into()),
            ..Self::default()
        }
    }

    /// Attach sealed credentials.
    pub fn with_credentials(mut self, credentials: SealedCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

// ============================================================================
// Webhook Record
// ============================================================================

/// Parameters for creating a webhook record.
///
/// Produced by the external signed-URL handlers; validated here.
#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub tenant_id: TenantId,
    pub api_key_id: ApiKeyId,
    pub target_url: String,
    pub trigger_mode: TriggerMode,
    pub provider: StorageProvider,
    pub locator: ProviderLocator,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub file_size: Option<i64>,
    pub metadata: serde_json::Value,
    /// How long the record stays confirmable before it expires.
    pub time_to_live: Duration,
}

/// The primary pipeline entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub id: WebhookId,
    pub tenant_id: TenantId,
    pub api_key_id: ApiKeyId,
    pub target_url: String,
    /// Per-record signing secret (opaque byte string, hex-encoded).
    pub secret: String,
    pub trigger_mode: TriggerMode,
    pub provider: StorageProvider,
    pub locator: ProviderLocator,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub file_size: Option<i64>,
    pub etag: Option<String>,
    pub status: WebhookStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<Timestamp>,
    pub next_retry_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    /// Opaque object forwarded into the delivered payload.
    pub metadata: serde_json::Value,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
}

impl WebhookRecord {
    /// Build a fresh `pending` record from creation parameters.
    ///
    /// The signing secret is generated here and returned to the caller
    /// exactly once, as part of the record.
    pub fn create(params: NewWebhook, secret: String) -> Result<Self, ValidationError> {
        let url = url::Url::parse(&params.target_url).map_err(|_| {
            ValidationError::InvalidFormat {
                field: "target_url".to_string(),
                message: "must be an absolute URL".to_string(),
            }
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ValidationError::InvalidFormat {
                field: "target_url".to_string(),
                message: "scheme must be http or https".to_string(),
            });
        }

        if url.host_str().is_none() {
            return Err(ValidationError::InvalidFormat {
                field: "target_url".to_string(),
                message: "must include a host".to_string(),
            });
        }

        if params.time_to_live.is_zero() {
            return Err(ValidationError::OutOfRange {
                field: "time_to_live".to_string(),
                message: "must be positive".to_string(),
            });
        }

        if secret.is_empty() {
            return Err(ValidationError::Required {
                field: "secret".to_string(),
            });
        }

        let now = Timestamp::now();
        Ok(Self {
            id: WebhookId::new(),
            tenant_id: params.tenant_id,
            api_key_id: params.api_key_id,
            target_url: params.target_url,
            secret,
            trigger_mode: params.trigger_mode,
            provider: params.provider,
            locator: params.locator,
            filename: params.filename,
            content_type: params.content_type,
            file_size: params.file_size,
            etag: None,
            status: WebhookStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            next_retry_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            expires_at: now.add_duration(params.time_to_live),
            completed_at: None,
            failed_at: None,
            metadata: params.metadata,
            response_status: None,
            response_body: None,
        })
    }

    /// Whether the record's confirmation window has passed.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Hostname of the delivery target, used to key the circuit breaker.
    pub fn target_host(&self) -> Option<String> {
        url::Url::parse(&self.target_url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.to_string()))
    }
}

// ============================================================================
// Dead Letter Entry
// ============================================================================

/// A webhook that exhausted its delivery attempts, parked for operator
/// attention or scheduled resurrection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub webhook_id: WebhookId,
    /// Snapshot of the record at the moment of dead-lettering.
    pub original_snapshot: serde_json::Value,
    pub failure_reason: String,
    pub attempt_count: i32,
    pub created_at: Timestamp,
    /// Earliest time the reaper may resurrect this entry.
    pub retry_after: Timestamp,
    pub resolved: bool,
    pub resolved_at: Option<Timestamp>,
    pub resolved_by: Option<String>,
}

impl DeadLetterEntry {
    /// Build an entry for a record whose attempts are exhausted.
    pub fn for_record(record: &WebhookRecord, reason: String, retry_after: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id: record.id,
            original_snapshot: serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
            failure_reason: reason,
            attempt_count: record.attempt_count,
            created_at: Timestamp::now(),
            retry_after,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        }
    }
}

// ============================================================================
// Public Status View
// ============================================================================

/// Client-facing projection of a record.
///
/// Hides the signing secret and the provider locator (which may carry
/// sealed credentials).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookStatusView {
    pub id: WebhookId,
    pub status: WebhookStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<Timestamp>,
    pub next_retry_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub webhook_url: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl From<&WebhookRecord> for WebhookStatusView {
    fn from(record: &WebhookRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            attempt_count: record.attempt_count,
            last_attempt_at: record.last_attempt_at,
            next_retry_at: record.next_retry_at,
            error_message: record.error_message.clone(),
            webhook_url: record.target_url.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
            completed_at: record.completed_at,
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
