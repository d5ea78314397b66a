//! Postgres-backed dead-letter store.

use crate::map_sqlx;
use async_trait::async_trait;
use hookline_core::record::DeadLetterEntry;
use hookline_core::{DeadLetterStore, StoreError, Timestamp, Uuid, WebhookId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Postgres implementation of [`DeadLetterStore`].
#[derive(Clone)]
pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<DeadLetterEntry, StoreError> {
        let timestamp = |column: &str| -> Result<Timestamp, StoreError> {
            let dt: chrono::DateTime<chrono::Utc> = row.try_get(column).map_err(map_sqlx)?;
            Ok(Timestamp::from_datetime(dt))
        };
        let resolved_at: Option<chrono::DateTime<chrono::Utc>> =
            row.try_get("resolved_at").map_err(map_sqlx)?;

        Ok(DeadLetterEntry {
            id: row.try_get("id").map_err(map_sqlx)?,
            webhook_id: WebhookId::from_uuid(row.try_get("webhook_id").map_err(map_sqlx)?),
            original_snapshot: row.try_get("original_snapshot").map_err(map_sqlx)?,
            failure_reason: row.try_get("failure_reason").map_err(map_sqlx)?,
            attempt_count: row.try_get("attempt_count").map_err(map_sqlx)?,
            created_at: timestamp("created_at")?,
            retry_after: timestamp("retry_after")?,
            resolved: row.try_get("resolved").map_err(map_sqlx)?,
            resolved_at: resolved_at.map(Timestamp::from_datetime),
            resolved_by: row.try_get("resolved_by").map_err(map_sqlx)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, webhook_id, original_snapshot, failure_reason, \
     attempt_count, created_at, retry_after, resolved, resolved_at, resolved_by \
     FROM webhook_dead_letter";

#[async_trait]
impl DeadLetterStore for PgDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO webhook_dead_letter (id, webhook_id, original_snapshot, \
             failure_reason, attempt_count, created_at, retry_after, resolved) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)",
        )
        .bind(entry.id)
        .bind(entry.webhook_id.as_uuid())
        .bind(&entry.original_snapshot)
        .bind(&entry.failure_reason)
        .bind(entry.attempt_count)
        .bind(entry.created_at.as_datetime())
        .bind(entry.retry_after.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn due(&self, now: Timestamp, limit: i64) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE NOT resolved AND retry_after <= $1 \
             ORDER BY retry_after ASC LIMIT $2"
        ))
        .bind(now.as_datetime())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn get(&self, id: &Uuid) -> Result<DeadLetterEntry, StoreError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        Self::map_row(&row)
    }

    async fn resolve(&self, id: &Uuid, actor: &str, at: Timestamp) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_dead_letter SET resolved = TRUE, resolved_at = $2, \
             resolved_by = $3 WHERE id = $1 AND NOT resolved",
        )
        .bind(id)
        .bind(at.as_datetime())
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            // Either absent or already resolved; distinguish for the caller.
            self.get(id).await?;
            return Err(StoreError::Conflict {
                message: format!("dead-letter entry {id} is already resolved"),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM webhook_dead_letter WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn purge_resolved_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM webhook_dead_letter WHERE resolved AND resolved_at < $1",
        )
        .bind(cutoff.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}
