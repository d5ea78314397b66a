//! Tenant quota reads for the admission pipeline.

use crate::map_sqlx;
use async_trait::async_trait;
use hookline_core::admission::{QuotaSource, TenantQuota};
use hookline_core::{StoreError, TenantId, Timestamp};
use sqlx::{PgPool, Row};

/// Postgres implementation of [`QuotaSource`].
///
/// The monthly limit is the largest quota across the tenant's API keys;
/// usage comes from the `provider_usage` row for the current month,
/// which the rollup worker maintains.
#[derive(Clone)]
pub struct PgQuotaSource {
    pool: PgPool,
}

impl PgQuotaSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaSource for PgQuotaSource {
    async fn monthly_quota(&self, tenant: &TenantId) -> Result<TenantQuota, StoreError> {
        let month = Timestamp::now().month_key();
        let row = sqlx::query(
            "SELECT COALESCE((SELECT MAX(monthly_quota) FROM api_keys WHERE tenant_id = $1), 0) \
                 AS monthly_limit, \
             COALESCE((SELECT request_count FROM provider_usage \
                 WHERE tenant_id = $1 AND month = $2), 0) AS current_usage",
        )
        .bind(tenant.as_str())
        .bind(&month)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(TenantQuota {
            tenant_id: tenant.clone(),
            monthly_limit: row.try_get("monthly_limit").map_err(map_sqlx)?,
            current_usage: row.try_get("current_usage").map_err(map_sqlx)?,
        })
    }
}
