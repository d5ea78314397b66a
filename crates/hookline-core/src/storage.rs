//! # Durable Storage Traits
//!
//! Trait seams over the durable store. Business logic depends on these;
//! the Postgres implementations live in `hookline-store`, together with
//! an in-memory twin for tests and local development.

use crate::record::{DeadLetterEntry, WebhookRecord, WebhookStatus};
use crate::{ApiKeyId, TenantId, Timestamp, Uuid, WebhookId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors produced by durable store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Webhook not found: {id}")]
    NotFound { id: String },

    #[error("Access denied: tenant '{tenant}' does not own webhook {id}")]
    AccessDenied { tenant: String, id: String },

    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    /// Check if the error is transient and the operation should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    pub fn backend(message: impl std::fmt::Display) -> Self {
        Self::Backend {
            message: message.to_string(),
        }
    }
}

// ============================================================================
// Webhook Store
// ============================================================================

/// CRUD and status transitions for webhook records.
///
/// Every tenant-facing read is scoped by `tenant_id`; cross-tenant access
/// yields [`StoreError::AccessDenied`]. Terminal statuses are sticky:
/// implementations must refuse transitions away from `completed`, and
/// must not complete a record whose `expires_at` has passed.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Insert a freshly created record.
    async fn insert(&self, record: &WebhookRecord) -> Result<(), StoreError>;

    /// Fetch a record by ID (pipeline-internal, unscoped).
    async fn get(&self, id: &WebhookId) -> Result<WebhookRecord, StoreError>;

    /// Fetch a record by ID on behalf of a tenant.
    async fn get_owned(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> Result<WebhookRecord, StoreError>;

    /// List a tenant's records, newest first, optionally filtered by
    /// status.
    async fn list(
        &self,
        tenant: &TenantId,
        status: Option<WebhookStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookRecord>, StoreError>;

    /// Apply a status transition, enforcing the record state machine.
    async fn transition(&self, id: &WebhookId, to: WebhookStatus) -> Result<(), StoreError>;

    /// Record object metadata learned during verification (etag, size).
    async fn update_object_metadata(
        &self,
        id: &WebhookId,
        etag: Option<&str>,
        file_size: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Commit a successful delivery: status `completed`, response status
    /// and truncated body, `completed_at`. Must be refused for expired
    /// records.
    async fn record_delivery_success(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        response_status: i32,
        response_body: &str,
        at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Commit a failed attempt with a scheduled retry: status back to
    /// `pending`, bumped attempt count, `next_retry_at`, error message.
    async fn record_retry(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        next_retry_at: Timestamp,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Commit exhaustion: status `dead_letter` with the final error.
    async fn record_dead_letter(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Mark a record permanently failed (e.g. confirm of an expired
    /// record).
    async fn mark_failed(
        &self,
        id: &WebhookId,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Reset a record for another round of deliveries: zero attempts,
    /// clear error, status `pending`. Used by operator retry and the
    /// dead-letter reaper; refused for `completed` records.
    async fn reset_for_retry(&self, id: &WebhookId) -> Result<(), StoreError>;

    /// Delete a record; refused for `completed` records.
    async fn delete(&self, id: &WebhookId) -> Result<(), StoreError>;

    /// Retention sweep: delete completed records older than the cutoff.
    /// Returns how many rows were removed.
    async fn purge_completed_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

// ============================================================================
// Dead Letter Store
// ============================================================================

/// Bookkeeping for dead-lettered webhooks.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Park an exhausted record.
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<(), StoreError>;

    /// Unresolved entries whose `retry_after` has passed, oldest first.
    async fn due(&self, now: Timestamp, limit: i64) -> Result<Vec<DeadLetterEntry>, StoreError>;

    /// Fetch an entry by ID.
    async fn get(&self, id: &Uuid) -> Result<DeadLetterEntry, StoreError>;

    /// Mark an entry resolved without re-queueing it.
    async fn resolve(&self, id: &Uuid, actor: &str, at: Timestamp) -> Result<(), StoreError>;

    /// Remove an entry (after successful resurrection).
    async fn delete(&self, id: &Uuid) -> Result<(), StoreError>;

    /// Retention sweep: delete resolved entries older than the cutoff.
    async fn purge_resolved_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

// ============================================================================
// Rollup Store
// ============================================================================

/// One durable per-day usage row, the product of a rollup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRollup {
    pub api_key_id: ApiKeyId,
    pub tenant_id: Option<TenantId>,
    /// Calendar day in `YYYY-MM-DD` form.
    pub date: String,
    pub total_requests: i64,
    pub providers: HashMap<String, i64>,
    pub file_types: HashMap<String, i64>,
    pub file_categories: HashMap<String, i64>,
    pub last_used_at: Option<Timestamp>,
}

/// Durable sink for usage aggregates.
#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Upsert the rollup row for `(api_key_id, date)`. Field maps are
    /// overwritten wholesale: the aggregate is the source of truth for
    /// that day.
    async fn upsert_daily(&self, rollup: &DailyRollup) -> Result<(), StoreError>;

    /// Fetch a rollup row, when present.
    async fn get_daily(
        &self,
        api_key: &ApiKeyId,
        date: &str,
    ) -> Result<Option<DailyRollup>, StoreError>;

    /// Add a day's request total into the tenant's monthly usage row,
    /// which backs the admission quota gate.
    async fn add_monthly_usage(
        &self,
        tenant: &TenantId,
        month: &str,
        requests: i64,
    ) -> Result<(), StoreError>;
}
