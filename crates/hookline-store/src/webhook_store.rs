//! Postgres-backed webhook store.
//!
//! All status mutations go through a row lock so concurrent writers see
//! a consistent state machine; reads on behalf of a tenant always carry
//! the tenant predicate.

use crate::map_sqlx;
use async_trait::async_trait;
use hookline_core::record::{ProviderLocator, StorageProvider, TriggerMode, WebhookRecord, WebhookStatus};
use hookline_core::{ApiKeyId, StoreError, TenantId, Timestamp, WebhookId, WebhookStore};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Postgres implementation of [`WebhookStore`].
#[derive(Clone)]
pub struct PgWebhookStore {
    pool: PgPool,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<WebhookRecord, StoreError> {
        let serialization = |message: String| StoreError::Serialization { message };

        let tenant_id: String = row.try_get("tenant_id").map_err(map_sqlx)?;
        let api_key_id: String = row.try_get("api_key_id").map_err(map_sqlx)?;
        let trigger_mode: String = row.try_get("trigger_mode").map_err(map_sqlx)?;
        let provider: String = row.try_get("provider").map_err(map_sqlx)?;
        let status: String = row.try_get("status").map_err(map_sqlx)?;
        let locator: serde_json::Value = row.try_get("locator").map_err(map_sqlx)?;

        let timestamp = |column: &str| -> Result<Timestamp, StoreError> {
            let dt: chrono::DateTime<chrono::Utc> = row.try_get(column).map_err(map_sqlx)?;
            Ok(Timestamp::from_datetime(dt))
        };
        let optional_timestamp = |column: &str| -> Result<Option<Timestamp>, StoreError> {
            let dt: Option<chrono::DateTime<chrono::Utc>> =
                row.try_get(column).map_err(map_sqlx)?;
            Ok(dt.map(Timestamp::from_datetime))
        };

        Ok(WebhookRecord {
            id: WebhookId::from_uuid(row.try_get("id").map_err(map_sqlx)?),
            tenant_id: TenantId::new(tenant_id).map_err(|e| serialization(e.to_string()))?,
            api_key_id: ApiKeyId::new(api_key_id).map_err(|e| serialization(e.to_string()))?,
            target_url: row.try_get("target_url").map_err(map_sqlx)?,
            secret: row.try_get("secret").map_err(map_sqlx)?,
            trigger_mode: trigger_mode
                .parse::<TriggerMode>()
                .map_err(|e| serialization(e.to_string()))?,
            provider: provider
                .parse::<StorageProvider>()
                .map_err(|e| serialization(e.to_string()))?,
            locator: serde_json::from_value::<ProviderLocator>(locator)
                .map_err(|e| serialization(e.to_string()))?,
            filename: row.try_get("filename").map_err(map_sqlx)?,
            content_type: row.try_get("content_type").map_err(map_sqlx)?,
            file_size: row.try_get("file_size").map_err(map_sqlx)?,
            etag: row.try_get("etag").map_err(map_sqlx)?,
            status: status
                .parse::<WebhookStatus>()
                .map_err(|e| serialization(e.to_string()))?,
            attempt_count: row.try_get("attempt_count").map_err(map_sqlx)?,
            last_attempt_at: optional_timestamp("last_attempt_at")?,
            next_retry_at: optional_timestamp("next_retry_at")?,
            error_message: row.try_get("error_message").map_err(map_sqlx)?,
            created_at: timestamp("created_at")?,
            updated_at: timestamp("updated_at")?,
            expires_at: timestamp("expires_at")?,
            completed_at: optional_timestamp("completed_at")?,
            failed_at: optional_timestamp("failed_at")?,
            metadata: row.try_get("metadata").map_err(map_sqlx)?,
            response_status: row.try_get("response_status").map_err(map_sqlx)?,
            response_body: row.try_get("response_body").map_err(map_sqlx)?,
        })
    }

    async fn fetch_status(&self, id: &WebhookId) -> Result<WebhookStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM webhooks WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let status: String = row.try_get("status").map_err(map_sqlx)?;
        status
            .parse::<WebhookStatus>()
            .map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })
    }

    /// Classify an update that matched no rows: missing record, illegal
    /// transition, or expiry guard.
    async fn classify_no_op(
        &self,
        id: &WebhookId,
        to: WebhookStatus,
    ) -> Result<(), StoreError> {
        let current = self.fetch_status(id).await?;
        if current.can_transition_to(to) {
            // The transition itself is legal; a guard (expiry) or a
            // concurrent writer stopped it.
            return Err(StoreError::Conflict {
                message: format!("webhook {id} cannot move to '{to}'"),
            });
        }
        Err(StoreError::InvalidTransition {
            from: current.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, tenant_id, api_key_id, target_url, secret, \
     trigger_mode, provider, locator, filename, content_type, file_size, etag, status, \
     attempt_count, last_attempt_at, next_retry_at, error_message, created_at, updated_at, \
     expires_at, completed_at, failed_at, metadata, response_status, response_body \
     FROM webhooks";

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn insert(&self, record: &WebhookRecord) -> Result<(), StoreError> {
        let locator = serde_json::to_value(&record.locator).map_err(|e| {
            StoreError::Serialization {
                message: e.to_string(),
            }
        })?;

        sqlx::query(
            "INSERT INTO webhooks (id, tenant_id, api_key_id, target_url, secret, \
             trigger_mode, provider, locator, filename, content_type, file_size, etag, \
             status, attempt_count, created_at, updated_at, expires_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(record.id.as_uuid())
        .bind(record.tenant_id.as_str())
        .bind(record.api_key_id.as_str())
        .bind(&record.target_url)
        .bind(&record.secret)
        .bind(record.trigger_mode.as_str())
        .bind(record.provider.as_str())
        .bind(locator)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(record.file_size)
        .bind(&record.etag)
        .bind(record.status.as_str())
        .bind(record.attempt_count)
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .bind(record.expires_at.as_datetime())
        .bind(&record.metadata)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: &WebhookId) -> Result<WebhookRecord, StoreError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        Self::map_row(&row)
    }

    async fn get_owned(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> Result<WebhookRecord, StoreError> {
        let record = self.get(id).await?;
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
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE tenant_id = $1 AND status = $2 \
                     ORDER BY created_at DESC LIMIT $3 OFFSET $4"
                ))
                .bind(tenant.as_str())
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE tenant_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(tenant.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx)?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn transition(&self, id: &WebhookId, to: WebhookStatus) -> Result<(), StoreError> {
        let from = self.fetch_status(id).await?;
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let result = sqlx::query(
            "UPDATE webhooks SET status = $2, updated_at = now() \
             WHERE id = $1 AND status = $3",
        )
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            // Lost a race with a concurrent writer; re-classify.
            return self.classify_no_op(id, to).await;
        }
        Ok(())
    }

    async fn update_object_metadata(
        &self,
        id: &WebhookId,
        etag: Option<&str>,
        file_size: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE webhooks SET etag = COALESCE($2, etag), \
             file_size = COALESCE($3, file_size), updated_at = now() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(etag)
        .bind(file_size)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn record_delivery_success(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        response_status: i32,
        response_body: &str,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhooks SET status = 'completed', attempt_count = $2, \
             last_attempt_at = $3, next_retry_at = NULL, error_message = NULL, \
             response_status = $4, response_body = $5, completed_at = $3, updated_at = now() \
             WHERE id = $1 AND status IN ('pending', 'verifying', 'delivering') \
             AND expires_at > $3",
        )
        .bind(id.as_uuid())
        .bind(attempt_count)
        .bind(at.as_datetime())
        .bind(response_status)
        .bind(response_body)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return self.classify_no_op(id, WebhookStatus::Completed).await;
        }
        Ok(())
    }

    async fn record_retry(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        next_retry_at: Timestamp,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhooks SET status = 'pending', attempt_count = $2, \
             last_attempt_at = $3, next_retry_at = $4, error_message = $5, updated_at = now() \
             WHERE id = $1 AND status IN ('pending', 'verifying', 'delivering')",
        )
        .bind(id.as_uuid())
        .bind(attempt_count)
        .bind(at.as_datetime())
        .bind(next_retry_at.as_datetime())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return self.classify_no_op(id, WebhookStatus::Pending).await;
        }
        Ok(())
    }

    async fn record_dead_letter(
        &self,
        id: &WebhookId,
        attempt_count: i32,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhooks SET status = 'dead_letter', attempt_count = $2, \
             last_attempt_at = $3, next_retry_at = NULL, error_message = $4, \
             failed_at = $3, updated_at = now() \
             WHERE id = $1 AND status IN ('pending', 'verifying', 'delivering')",
        )
        .bind(id.as_uuid())
        .bind(attempt_count)
        .bind(at.as_datetime())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return self.classify_no_op(id, WebhookStatus::DeadLetter).await;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &WebhookId,
        error: &str,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhooks SET status = 'failed', error_message = $2, failed_at = $3, \
             updated_at = now() \
             WHERE id = $1 AND status IN ('pending', 'verifying', 'delivering')",
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return self.classify_no_op(id, WebhookStatus::Failed).await;
        }
        Ok(())
    }

    async fn reset_for_retry(&self, id: &WebhookId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhooks SET status = 'pending', attempt_count = 0, \
             error_message = NULL, next_retry_at = NULL, failed_at = NULL, updated_at = now() \
             WHERE id = $1 AND status <> 'completed'",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return self.classify_no_op(id, WebhookStatus::Pending).await;
        }
        Ok(())
    }

    async fn delete(&self, id: &WebhookId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1 AND status <> 'completed'")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            let current = self.fetch_status(id).await?;
            return Err(StoreError::Conflict {
                message: format!("cannot delete webhook in status '{current}'"),
            });
        }
        Ok(())
    }

    async fn purge_completed_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM webhooks WHERE status = 'completed' AND completed_at < $1",
        )
        .bind(cutoff.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}
