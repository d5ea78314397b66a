//! Postgres-backed rollup store.

use crate::map_sqlx;
use async_trait::async_trait;
use hookline_core::storage::{DailyRollup, RollupStore};
use hookline_core::{ApiKeyId, StoreError, TenantId, Timestamp};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

/// Postgres implementation of [`RollupStore`].
#[derive(Clone)]
pub struct PgRollupStore {
    pool: PgPool,
}

impl PgRollupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn to_json(map: &HashMap<String, i64>) -> serde_json::Value {
        serde_json::to_value(map).unwrap_or_else(|_| serde_json::json!({}))
    }

    fn from_json(value: serde_json::Value) -> HashMap<String, i64> {
        serde_json::from_value(value).unwrap_or_default()
    }
}

#[async_trait]
impl RollupStore for PgRollupStore {
    async fn upsert_daily(&self, rollup: &DailyRollup) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO daily_rollup (api_key_id, date, tenant_id, total_requests, \
             providers, file_types, file_categories, last_used_at, updated_at) \
             VALUES ($1, $2::date, $3, $4, $5, $6, $7, $8, now()) \
             ON CONFLICT (api_key_id, date) DO UPDATE SET \
             tenant_id = EXCLUDED.tenant_id, \
             total_requests = EXCLUDED.total_requests, \
             providers = EXCLUDED.providers, \
             file_types = EXCLUDED.file_types, \
             file_categories = EXCLUDED.file_categories, \
             last_used_at = EXCLUDED.last_used_at, \
             updated_at = now()",
        )
        .bind(rollup.api_key_id.as_str())
        .bind(&rollup.date)
        .bind(rollup.tenant_id.as_ref().map(|t| t.as_str().to_string()))
        .bind(rollup.total_requests)
        .bind(Self::to_json(&rollup.providers))
        .bind(Self::to_json(&rollup.file_types))
        .bind(Self::to_json(&rollup.file_categories))
        .bind(rollup.last_used_at.map(|ts| *ts.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_daily(
        &self,
        api_key: &ApiKeyId,
        date: &str,
    ) -> Result<Option<DailyRollup>, StoreError> {
        let row = sqlx::query(
            "SELECT api_key_id, to_char(date, 'YYYY-MM-DD') AS date, tenant_id, \
             total_requests, providers, file_types, file_categories, last_used_at \
             FROM daily_rollup WHERE api_key_id = $1 AND date = $2::date",
        )
        .bind(api_key.as_str())
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tenant_id: Option<String> = row.try_get("tenant_id").map_err(map_sqlx)?;
        let tenant_id = tenant_id
            .map(TenantId::new)
            .transpose()
            .map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })?;
        let api_key_id: String = row.try_get("api_key_id").map_err(map_sqlx)?;
        let last_used_at: Option<chrono::DateTime<chrono::Utc>> =
            row.try_get("last_used_at").map_err(map_sqlx)?;

        Ok(Some(DailyRollup {
            api_key_id: ApiKeyId::new(api_key_id).map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })?,
            tenant_id,
            date: row.try_get("date").map_err(map_sqlx)?,
            total_requests: row.try_get("total_requests").map_err(map_sqlx)?,
            providers: Self::from_json(row.try_get("providers").map_err(map_sqlx)?),
            file_types: Self::from_json(row.try_get("file_types").map_err(map_sqlx)?),
            file_categories: Self::from_json(row.try_get("file_categories").map_err(map_sqlx)?),
            last_used_at: last_used_at.map(Timestamp::from_datetime),
        }))
    }

    async fn add_monthly_usage(
        &self,
        tenant: &TenantId,
        month: &str,
        requests: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO provider_usage (tenant_id, month, request_count, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (tenant_id, month) DO UPDATE SET \
             request_count = provider_usage.request_count + EXCLUDED.request_count, \
             updated_at = now()",
        )
        .bind(tenant.as_str())
        .bind(month)
        .bind(requests)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }
}
