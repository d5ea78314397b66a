//! # Hookline Core
//!
//! Core business logic for the Hookline post-upload event pipeline.
//!
//! Hookline fronts several third-party object stores for a multi-tenant
//! file-upload gateway. After an upload, the gateway records a webhook
//! that must be verified against the backing provider, signed, and
//! delivered to the customer's endpoint with retries, circuit breaking,
//! and dead-lettering. This crate holds the domain model for that
//! pipeline: the webhook record and its state machine, admission control,
//! payload signing, credential sealing, and the trait seams the
//! infrastructure crates implement.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions
//! - Infrastructure implementations (Postgres, Redis, S3) are injected
//!   at runtime
//! - Metric recording is best-effort and never blocks business operations
//!
//! ## Usage
//!
//! ```rust
//! use hookline_core::{TenantId, WebhookId};
//!
//! // Core identifier types are available across the system
//! let webhook_id = WebhookId::new();
//! let tenant = TenantId::new("tenant-1").unwrap();
//! assert_eq!(tenant.as_str(), "tenant-1");
//! ```

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for a webhook record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(Uuid);

impl WebhookId {
    /// Generate a new unique webhook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WebhookId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

/// Identifier of the tenant that owns a record.
///
/// Supplied by the upstream authentication layer; the pipeline treats it
/// as an opaque, validated string and scopes every read by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new tenant ID with validation.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "tenant_id".to_string(),
            });
        }

        if value.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "tenant_id".to_string(),
                max_length: 128,
            });
        }

        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "tenant_id".to_string(),
                invalid_chars: "non-ASCII or whitespace".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier of the gateway API key a request was made with.
///
/// Usage metrics are aggregated per API key per day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiKeyId(String);

impl ApiKeyId {
    /// Create a new API key ID with validation.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "api_key_id".to_string(),
            });
        }

        if value.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "api_key_id".to_string(),
                max_length: 128,
            });
        }

        // Key ids end up embedded in counter-store keys; the separator
        // must not occur inside them.
        if !value.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(ValidationError::InvalidCharacters {
                field: "api_key_id".to_string(),
                invalid_chars: "non-ASCII, whitespace, or ':'".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ApiKeyId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with helpers the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing chrono datetime.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse timestamp from RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Seconds since the Unix epoch.
    pub fn epoch_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Milliseconds since the Unix epoch.
    pub fn epoch_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Add a standard duration.
    pub fn add_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 + chrono_duration)
    }

    /// Subtract a standard duration.
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }

    /// Calendar date in `YYYY-MM-DD` form (UTC), the shape used in
    /// usage-metric keys.
    pub fn date_key(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }

    /// Calendar month in `YYYY-MM` form (UTC), the shape used in monthly
    /// quota rows.
    pub fn month_key(&self) -> String {
        format!("{:04}-{:02}", self.0.year(), self.0.month())
    }

    /// Get duration since another timestamp.
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },

    #[error("Field '{field}' is out of range: {message}")]
    OutOfRange { field: String, message: String },
}

/// Error type for string parsing failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Webhook record model and state machine
pub mod record;

/// Admission pipeline (memory guard, shared counter gate, quota gate)
pub mod admission;

/// Per-hostname circuit breaker for outbound deliveries
pub mod circuit_breaker;

/// Provider credential sealing (authenticated encryption at rest)
pub mod credentials;

/// Metrics collection traits
pub mod monitoring;

/// Canonical payload construction and HMAC signing
pub mod signer;

/// Durable storage traits implemented by infrastructure crates
pub mod storage;

// Re-export key types for convenience
pub use admission::{
    AdmissionConfig, AdmissionPipeline, GateDecision, GateLayer, OperationClass, QuotaSource,
    TenantQuota,
};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitDecision, HostCircuitBreaker};
pub use credentials::{CredentialError, CredentialKey, ProviderCredentials, SealedCredentials};
pub use monitoring::{NoOpPipelineMetrics, PipelineMetrics};
pub use record::{
    DeadLetterEntry, NewWebhook, ProviderLocator, StorageProvider, TriggerMode, WebhookRecord,
    WebhookStatus, WebhookStatusView,
};
pub use signer::{PayloadExtras, SignedDelivery};
pub use storage::{DailyRollup, DeadLetterStore, RollupStore, StoreError, WebhookStore};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
