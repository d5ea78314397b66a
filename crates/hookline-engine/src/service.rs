//! # Webhook Service Facade
//!
//! The producer and consumer operations the upstream signed-URL handlers
//! and the operator surface call. HTTP routing and authentication live
//! outside the pipeline; this facade assumes a validated tenant
//! identity.

use crate::queue::{QueueError, QueueItem, WebhookQueue};
use crate::usage::{UsageEvent, UsageRecorder};
use hookline_core::record::{NewWebhook, WebhookRecord, WebhookStatus, WebhookStatusView};
use hookline_core::signer::generate_secret;
use hookline_core::{
    DeadLetterStore, StoreError, TenantId, Timestamp, Uuid, ValidationError, WebhookId,
    WebhookStore,
};
use hookline_counter::{CounterStore, CounterStoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Idempotency lock TTL for upload confirmation.
const CONFIRM_LOCK_TTL: Duration = Duration::from_secs(60);

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: i64 = 20;

/// Priority assigned to operator retries.
const RETRY_PRIORITY: u8 = 1;

/// Highest accepted priority; values above route identically.
const MAX_PRIORITY: u8 = 10;

// ============================================================================
// Error Type
// ============================================================================

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Counter store error: {0}")]
    Counter(#[from] CounterStoreError),

    /// 410-class: the confirmation window has passed.
    #[error("Webhook {id} is expired")]
    Expired { id: WebhookId },

    #[error("Webhook {id} is already completed")]
    AlreadyCompleted { id: WebhookId },
}

// ============================================================================
// Result Types
// ============================================================================

/// Outcome of `create_webhook`: the record ID and the signing secret,
/// returned to the caller exactly once.
#[derive(Debug, Clone)]
pub struct CreatedWebhook {
    pub id: WebhookId,
    pub secret: String,
}

/// Outcome of `confirm_upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmOutcome {
    /// A confirmation for this webhook is already in flight.
    pub duplicated: bool,
    pub status: WebhookStatus,
}

// ============================================================================
// Service
// ============================================================================

/// The pipeline's external interface.
pub struct WebhookService {
    webhooks: Arc<dyn WebhookStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    queue: Arc<WebhookQueue>,
    counters: Arc<dyn CounterStore>,
    usage: Arc<UsageRecorder>,
}

impl WebhookService {
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        queue: Arc<WebhookQueue>,
        counters: Arc<dyn CounterStore>,
        usage: Arc<UsageRecorder>,
    ) -> Self {
        Self {
            webhooks,
            dead_letters,
            queue,
            counters,
            usage,
        }
    }

    // ------------------------------------------------------------------
    // Producer API
    // ------------------------------------------------------------------

    /// Insert a `pending` record. Auto-trigger records are enqueued
    /// immediately; manual ones wait for `confirm_upload`.
    pub async fn create_webhook(&self, params: NewWebhook) -> Result<CreatedWebhook, ServiceError> {
        let usage_event = UsageEvent {
            api_key_id: params.api_key_id.clone(),
            tenant_id: params.tenant_id.clone(),
            provider: params.provider,
            content_type: params.content_type.clone(),
        };
        let auto = params.trigger_mode == hookline_core::record::TriggerMode::Auto;

        let secret = generate_secret();
        let record = WebhookRecord::create(params, secret.clone())?;
        self.webhooks.insert(&record).await?;

        // Metering is fire-and-forget with respect to the caller.
        self.usage.spawn_record(usage_event);

        if auto {
            self.enqueue_record(&record, 0).await?;
        }

        info!(component = "service", webhook_id = %record.id,
            tenant = %record.tenant_id, trigger = record.trigger_mode.as_str(),
            "webhook created");
        Ok(CreatedWebhook {
            id: record.id,
            secret,
        })
    }

    /// Idempotent re-enqueue of an existing record.
    pub async fn enqueue_webhook(&self, id: &WebhookId, priority: u8) -> Result<(), ServiceError> {
        let record = self.webhooks.get(id).await?;
        if record.status == WebhookStatus::Completed {
            return Err(ServiceError::AlreadyCompleted { id: *id });
        }

        // Scrub earlier entries so a double-enqueue cannot produce two
        // live queue items for one record.
        self.queue.remove(id).await?;
        self.enqueue_record(&record, priority).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consumer API
    // ------------------------------------------------------------------

    /// Client confirmation that the upload finished. Guarded by a 60 s
    /// set-if-absent lock; a second confirm inside the window returns
    /// `duplicated = true` without touching the record.
    pub async fn confirm_upload(
        &self,
        id: &WebhookId,
        etag: Option<&str>,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let lock_key = format!("confirm:{id}");
        let acquired = self
            .counters
            .set_nx_with_ttl(&lock_key, "1", CONFIRM_LOCK_TTL)
            .await?;
        if !acquired {
            let record = self.webhooks.get(id).await?;
            return Ok(ConfirmOutcome {
                duplicated: true,
                status: record.status,
            });
        }

        let record = self.webhooks.get(id).await?;
        let now = Timestamp::now();

        if record.status == WebhookStatus::Pending && record.is_expired(now) {
            self.webhooks
                .mark_failed(id, "confirmation window expired", now)
                .await?;
            return Err(ServiceError::Expired { id: *id });
        }

        if record.status != WebhookStatus::Pending {
            // Late or repeated confirm after the lock lapsed; report the
            // current state instead of re-driving the pipeline.
            return Ok(ConfirmOutcome {
                duplicated: false,
                status: record.status,
            });
        }

        if etag.is_some() {
            self.webhooks.update_object_metadata(id, etag, None).await?;
        }
        self.webhooks.transition(id, WebhookStatus::Verifying).await?;
        self.enqueue_record(&record, 0).await?;

        info!(component = "service", webhook_id = %id, "upload confirmed");
        Ok(ConfirmOutcome {
            duplicated: false,
            status: WebhookStatus::Verifying,
        })
    }

    /// Public view of a record, scoped to its owner.
    pub async fn get_status(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> Result<WebhookStatusView, ServiceError> {
        let record = self.webhooks.get_owned(tenant, id).await?;
        Ok(WebhookStatusView::from(&record))
    }

    /// Paginated listing of a tenant's records.
    pub async fn list_webhooks(
        &self,
        tenant: &TenantId,
        status: Option<WebhookStatus>,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<WebhookStatusView>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 100);
        let records = self
            .webhooks
            .list(tenant, status, limit, offset.max(0))
            .await?;
        Ok(records.iter().map(WebhookStatusView::from).collect())
    }

    /// Operator retry: refused for completed records; resets attempts
    /// and re-queues at priority 1.
    pub async fn retry_webhook(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> Result<(), ServiceError> {
        let record = self.webhooks.get_owned(tenant, id).await?;
        if record.status == WebhookStatus::Completed {
            return Err(ServiceError::AlreadyCompleted { id: *id });
        }

        self.webhooks.reset_for_retry(id).await?;
        self.queue.remove(id).await?;
        self.enqueue_record(&record, RETRY_PRIORITY).await?;
        info!(component = "service", webhook_id = %id, "operator retry queued");
        Ok(())
    }

    /// Delete a record; refused for completed records. Queue entries are
    /// scrubbed so no further attempts occur.
    pub async fn delete_webhook(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> Result<(), ServiceError> {
        self.webhooks.get_owned(tenant, id).await?;
        self.webhooks.delete(id).await?;
        self.queue.remove(id).await?;
        info!(component = "service", webhook_id = %id, "webhook deleted");
        Ok(())
    }

    /// Operator action: mark a dead-letter entry resolved without
    /// re-queueing.
    pub async fn resolve_dead_letter(
        &self,
        id: &Uuid,
        actor: &str,
    ) -> Result<(), ServiceError> {
        self.dead_letters.resolve(id, actor, Timestamp::now()).await?;
        info!(component = "service", dead_letter_id = %id, actor, "dead letter resolved");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn enqueue_record(
        &self,
        record: &WebhookRecord,
        priority: u8,
    ) -> Result<(), ServiceError> {
        let priority = priority.min(MAX_PRIORITY);
        let payload = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
        let item = QueueItem::new(record.id, payload, priority);
        if let Err(err) = self.queue.enqueue(&item).await {
            warn!(component = "service", webhook_id = %record.id, error = %err,
                "enqueue failed");
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
