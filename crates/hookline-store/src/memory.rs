//! In-memory store implementations for testing and development.
//!
//! Mirrors the Postgres implementations' semantics: tenant-scoped reads,
//! the record state machine with sticky terminals, the expiry guard on
//! completion, and wholesale rollup upserts.

use async_trait::async_trait;
use hookline_core::admission::{QuotaSource, TenantQuota};
use hookline_core::record::{DeadLetterEntry, WebhookRecord, WebhookStatus};
use hookline_core::storage::{DailyRollup, DeadLetterStore, RollupStore, WebhookStore};
use hookline_core::{ApiKeyId, StoreError, TenantId, Timestamp, Uuid, WebhookId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

#[derive(Default)]
struct Inner {
    webhooks: HashMap<WebhookId, WebhookRecord>,
    dead_letters: HashMap<Uuid, DeadLetterEntry>,
    rollups: HashMap<(String, String), DailyRollup>,
    monthly_usage: HashMap<(String, String), i64>,
    quotas: HashMap<String, i64>,
    quota_outage: bool,
}

/// One shared in-memory backing for all store traits.
///
/// Handles are cheap clones; tests typically pass the same instance as
/// `Arc<dyn WebhookStore>`, `Arc<dyn DeadLetterStore>`, and so on.
#[derive(Clone, Default)]
pub struct MemoryStores {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        f(&mut inner)
    }

    /// Configure a tenant's monthly quota limit.
    pub fn set_quota(&self, tenant: &TenantId, monthly_limit: i64) {
        self.with(|inner| {
            inner.quotas.insert(tenant.as_str().to_string(), monthly_limit);
        });
    }

    /// Simulate the durable quota source being unreachable.
    pub fn set_quota_outage(&self, outage: bool) {
        self.with(|inner| inner.quota_outage = outage);
    }

    /// Current monthly usage, for assertions.
    pub fn monthly_usage(&self, tenant: &TenantId, month: &str) -> i64 {
        self.with(|inner| {
            inner
                .monthly_usage
                .get(&(tenant.as_str().to_string(), month.to_string()))
                .copied()
                .unwrap_or(0)
        })
    }

    /// Number of stored webhooks, for assertions.
    pub fn webhook_count(&self) -> usize {
        self.with(|inner| inner.webhooks.len())
    }

    /// Number of dead-letter entries, for assertions.
    pub fn dead_letter_count(&self) -> usize {
        self.with(|inner| inner.dead_letters.len())
    }

    fn mutate_record(
        &self,
        id: &WebhookId,
        allowed_from: &[WebhookStatus],
        target: WebhookStatus,
        f: impl FnOnce(&mut WebhookRecord),
    ) -> Result<(), StoreError> {
        self.with(|inner| {
            let record = inner
                .webhooks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            if !allowed_from.contains(&record.status) {
                return Err(StoreError::InvalidTransition {
                    from: record.status.as_str().to_string(),
                    to: target.as_str().to_string(),
                });
            }
            f(record);
            record.updated_at = Timestamp::now();
            Ok(())
        })
    }
}

const IN_FLIGHT: &[WebhookStatus] = &[
    WebhookStatus::Pending,
    WebhookStatus::Verifying,
    WebhookStatus::Delivering,
];

#[async_trait]
impl WebhookStore for MemoryStores {
    async fn insert(&self, record: &WebhookRecord) -> Result<(), StoreError> {
        self.with(|inner| {
            if inner.webhooks.contains_key(&record.id) {
                return Err(StoreError::Conflict {
                    message: format!("webhook {} already exists", record.id),
                });
            }
            inner.webhooks.insert(record.id, record.clone());
            Ok(())
        })
    }

    async fn get(&self, id: &WebhookId) -> Result<WebhookRecord, StoreError> {
        self.with(|inner| {
            inner
                .webhooks
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
        })
    }

    async fn get_owned(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> Result<WebhookRecord, StoreError> {
        let record = WebhookStore::get(self, id).await?;
        if record.tenant_id != *tenant {
            return Err(StoreError::AccessDenied {
                tenant: tenant.to_string(),
                id: id.to_string(),
            });
        }
        Ok(record)
    }

    async fn list(
        &self,
        tenant: &TenantId,
        status: Option<WebhookStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookRecord>, StoreError> {
        self.with(|inner| {
            let mut records: Vec<WebhookRecord> = inner
                .webhooks
                .values()
                .filter(|record| record.tenant_id == *tenant)
                .filter(|record| status.map(|s| record.status == s).unwrap_or(true))
                .cloned()
                .collect();
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(records
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect())
        })
    }

    async fn transition(&self, id: &WebhookId, to: WebhookStatus) -> Result<(), StoreError> {
        self.with(|inner| {
            let record = inner
                .webhooks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            if !record.status.can_transition_to(to) {
                return Err(StoreError::InvalidTransition {
                    from: record.status.as_str().to_string(),
                    to: to.as_str().to_string(),
                });
            }
            record.status = to;
            record.updated_at = Timestamp::now();
            Ok(())
        })
    }

    async fn update_object_metadata(
        &self,
        id: &WebhookId,
        etag: Option<&str>,
        file_size: Option<i64>,
    ) -> Result<(), StoreError> {
        self.with(|inner| {
            let record = inner
                .webhooks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            if let Some(etag) = etag {
                record.etag = Some(etag.to_string());
            }
            if let Some(size) = file_size {
                record.file_size = Some(size);
            }
            record.updated_at = Timestamp::now();
            Ok(())
        })
    }

    async fn record_delivery_success(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        response_status: i32,
        response_body: &str,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let expired = WebhookStore::get(self, id).await.map(|r| r.is_expired(at))?;
        if expired {
            return Err(StoreError::Conflict {
                message: format!("webhook {id} is expired and cannot complete"),
            });
        }
        let body = response_body.to_string();
        self.mutate_record(id, IN_FLIGHT, WebhookStatus::Completed, |record| {
            record.status = WebhookStatus::Completed;
            record.attempt_count = attempt_count;
            record.last_attempt_at = Some(at);
            record.next_retry_at = None;
            record.error_message = None;
            record.response_status = Some(response_status);
            record.response_body = Some(body);
            record.completed_at = Some(at);
        })
    }

    async fn record_retry(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        next_retry_at: Timestamp,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let error = error.to_string();
        self.mutate_record(id, IN_FLIGHT, WebhookStatus::Pending, |record| {
            record.status = WebhookStatus::Pending;
            record.attempt_count = attempt_count;
            record.last_attempt_at = Some(at);
            record.next_retry_at = Some(next_retry_at);
            record.error_message = Some(error);
        })
    }

    async fn record_dead_letter(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let error = error.to_string();
        self.mutate_record(id, IN_FLIGHT, WebhookStatus::DeadLetter, |record| {
            record.status = WebhookStatus::DeadLetter;
            record.attempt_count = attempt_count;
            record.last_attempt_at = Some(at);
            record.next_retry_at = None;
            record.error_message = Some(error);
            record.failed_at = Some(at);
        })
    }

    async fn mark_failed(
        &self,
        id: &WebhookId,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let error = error.to_string();
        self.mutate_record(id, IN_FLIGHT, WebhookStatus::Failed, |record| {
            record.status = WebhookStatus::Failed;
            record.error_message = Some(error);
            record.failed_at = Some(at);
        })
    }

    async fn reset_for_retry(&self, id: &WebhookId) -> Result<(), StoreError> {
        self.with(|inner| {
            let record = inner
                .webhooks
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            if record.status == WebhookStatus::Completed {
                return Err(StoreError::InvalidTransition {
                    from: "completed".to_string(),
                    to: "pending".to_string(),
                });
            }
            record.status = WebhookStatus::Pending;
            record.attempt_count = 0;
            record.error_message = None;
            record.next_retry_at = None;
            record.failed_at = None;
            record.updated_at = Timestamp::now();
            Ok(())
        })
    }

    async fn delete(&self, id: &WebhookId) -> Result<(), StoreError> {
        self.with(|inner| {
            let record = inner
                .webhooks
                .get(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            if record.status == WebhookStatus::Completed {
                return Err(StoreError::Conflict {
                    message: "cannot delete webhook in status 'completed'".to_string(),
                });
            }
            inner.webhooks.remove(id);
            // Cascade, as the schema does.
            inner.dead_letters.retain(|_, entry| entry.webhook_id != *id);
            Ok(())
        })
    }

    async fn purge_completed_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        self.with(|inner| {
            let before = inner.webhooks.len();
            inner.webhooks.retain(|_, record| {
                !(record.status == WebhookStatus::Completed
                    && record.completed_at.map(|at| at < cutoff).unwrap_or(false))
            });
            Ok((before - inner.webhooks.len()) as u64)
        })
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStores {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<(), StoreError> {
        self.with(|inner| {
            inner.dead_letters.insert(entry.id, entry.clone());
            Ok(())
        })
    }

    async fn due(&self, now: Timestamp, limit: i64) -> Result<Vec<DeadLetterEntry>, StoreError> {
        self.with(|inner| {
            let mut due: Vec<DeadLetterEntry> = inner
                .dead_letters
                .values()
                .filter(|entry| !entry.resolved && entry.retry_after <= now)
                .cloned()
                .collect();
            due.sort_by(|a, b| a.retry_after.cmp(&b.retry_after));
            due.truncate(limit.max(0) as usize);
            Ok(due)
        })
    }

    async fn get(&self, id: &Uuid) -> Result<DeadLetterEntry, StoreError> {
        self.with(|inner| {
            inner
                .dead_letters
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
        })
    }

    async fn resolve(&self, id: &Uuid, actor: &str, at: Timestamp) -> Result<(), StoreError> {
        self.with(|inner| {
            let entry = inner
                .dead_letters
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            if entry.resolved {
                return Err(StoreError::Conflict {
                    message: format!("dead-letter entry {id} is already resolved"),
                });
            }
            entry.resolved = true;
            entry.resolved_at = Some(at);
            entry.resolved_by = Some(actor.to_string());
            Ok(())
        })
    }

    async fn delete(&self, id: &Uuid) -> Result<(), StoreError> {
        self.with(|inner| {
            inner.dead_letters.remove(id);
            Ok(())
        })
    }

    async fn purge_resolved_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        self.with(|inner| {
            let before = inner.dead_letters.len();
            inner.dead_letters.retain(|_, entry| {
                !(entry.resolved && entry.resolved_at.map(|at| at < cutoff).unwrap_or(false))
            });
            Ok((before - inner.dead_letters.len()) as u64)
        })
    }
}

#[async_trait]
impl RollupStore for MemoryStores {
    async fn upsert_daily(&self, rollup: &DailyRollup) -> Result<(), StoreError> {
        self.with(|inner| {
            inner.rollups.insert(
                (rollup.api_key_id.as_str().to_string(), rollup.date.clone()),
                rollup.clone(),
            );
            Ok(())
        })
    }

    async fn get_daily(
        &self,
        api_key: &ApiKeyId,
        date: &str,
    ) -> Result<Option<DailyRollup>, StoreError> {
        self.with(|inner| {
            Ok(inner
                .rollups
                .get(&(api_key.as_str().to_string(), date.to_string()))
                .cloned())
        })
    }

    async fn add_monthly_usage(
        &self,
        tenant: &TenantId,
        month: &str,
        requests: i64,
    ) -> Result<(), StoreError> {
        self.with(|inner| {
            *inner
                .monthly_usage
                .entry((tenant.as_str().to_string(), month.to_string()))
                .or_insert(0) += requests;
            Ok(())
        })
    }
}

#[async_trait]
impl QuotaSource for MemoryStores {
    async fn monthly_quota(&self, tenant: &TenantId) -> Result<TenantQuota, StoreError> {
        let month = Timestamp::now().month_key();
        self.with(|inner| {
            if inner.quota_outage {
                return Err(StoreError::Backend {
                    message: "quota source unreachable".to_string(),
                });
            }
            Ok(TenantQuota {
                tenant_id: tenant.clone(),
                monthly_limit: inner
                    .quotas
                    .get(tenant.as_str())
                    .copied()
                    .unwrap_or(100_000),
                current_usage: inner
                    .monthly_usage
                    .get(&(tenant.as_str().to_string(), month))
                    .copied()
                    .unwrap_or(0),
            })
        })
    }
}
