//! # Usage Metrics Aggregator
//!
//! Per-(API key, day) request counters in the counter store.
//!
//! The write path is called from the request path and must never block
//! or fail the caller: on counter-store outage the write is dropped and
//! `metrics_dropped_total` is incremented. The read path scans `m:*`
//! keys cursor-style and parses the field prefixes (`p:`, `ft:`, `fc:`)
//! into structured aggregates for the rollup worker and dashboards.

use hookline_core::record::StorageProvider;
use hookline_core::{ApiKeyId, PipelineMetrics, TenantId, Timestamp};
use hookline_counter::{CounterStore, CounterStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Prefix of all usage-metric keys (`m:<apiKeyId>:<YYYY-MM-DD>`).
pub const METRIC_KEY_PREFIX: &str = "m:";

/// Aggregate hashes stay alive this long past their last write; long
/// enough for several missed rollup runs.
const METRIC_KEY_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// One request to meter.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub api_key_id: ApiKeyId,
    pub tenant_id: TenantId,
    pub provider: StorageProvider,
    pub content_type: Option<String>,
}

/// Coarse file category derived from a MIME type.
pub fn category_for_mime(mime: &str) -> &'static str {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("video/") {
        "video"
    } else if mime.starts_with("audio/") {
        "audio"
    } else if mime.starts_with("text/")
        || mime == "application/pdf"
        || mime.contains("document")
        || mime.contains("spreadsheet")
        || mime.contains("presentation")
        || mime == "application/msword"
    {
        "document"
    } else {
        "other"
    }
}

fn metric_key(api_key: &ApiKeyId, date: &str) -> String {
    format!("{METRIC_KEY_PREFIX}{}:{}", api_key.as_str(), date)
}

// ============================================================================
// Write Path
// ============================================================================

/// Records usage counters; fire-and-forget from the caller's view.
pub struct UsageRecorder {
    store: Arc<dyn CounterStore>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn CounterStore>, metrics: Arc<dyn PipelineMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Record one request against today's aggregate for the event's API
    /// key. Never fails: a store error drops the write and bumps the
    /// dropped-writes counter.
    pub async fn record(&self, event: &UsageEvent) {
        let now = Timestamp::now();
        let key = metric_key(&event.api_key_id, &now.date_key());

        let mut deltas: Vec<(String, i64)> = vec![
            ("req".to_string(), 1),
            (format!("p:{}", event.provider.as_str()), 1),
        ];
        if let Some(mime) = event.content_type.as_deref() {
            deltas.push((format!("ft:{mime}"), 1));
            deltas.push((format!("fc:{}", category_for_mime(mime)), 1));
        }

        let result: Result<(), CounterStoreError> = async {
            self.store.hash_incr(&key, &deltas, METRIC_KEY_TTL).await?;
            self.store
                .hash_set(&key, "ts", &now.epoch_seconds().to_string())
                .await?;
            self.store
                .hash_set_nx(&key, "uid", event.tenant_id.as_str())
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            warn!(component = "usage", api_key = %event.api_key_id, error = %err,
                "dropping usage metric write");
            self.metrics.record_metrics_dropped();
        }
    }

    /// Detach the write from the caller entirely.
    pub fn spawn_record(self: &Arc<Self>, event: UsageEvent) {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            recorder.record(&event).await;
        });
    }
}

// ============================================================================
// Read Path
// ============================================================================

/// Structured view of one `m:<apiKeyId>:<date>` aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyUsage {
    pub api_key_id: ApiKeyId,
    pub date: String,
    pub tenant_id: Option<TenantId>,
    pub total_requests: i64,
    pub providers: HashMap<String, i64>,
    pub file_types: HashMap<String, i64>,
    pub file_categories: HashMap<String, i64>,
    pub last_used_at: Option<Timestamp>,
}

/// Scans and parses usage aggregates.
pub struct UsageScanner {
    store: Arc<dyn CounterStore>,
}

impl UsageScanner {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Parse `m:<apiKeyId>:<YYYY-MM-DD>` into its parts.
    pub fn parse_key(key: &str) -> Option<(ApiKeyId, String)> {
        let rest = key.strip_prefix(METRIC_KEY_PREFIX)?;
        let (api_key, date) = rest.rsplit_once(':')?;
        if date.len() != 10 {
            return None;
        }
        let api_key = ApiKeyId::new(api_key).ok()?;
        Some((api_key, date.to_string()))
    }

    fn parse_fields(
        api_key_id: ApiKeyId,
        date: String,
        fields: HashMap<String, String>,
    ) -> DailyUsage {
        let mut usage = DailyUsage {
            api_key_id,
            date,
            tenant_id: None,
            total_requests: 0,
            providers: HashMap::new(),
            file_types: HashMap::new(),
            file_categories: HashMap::new(),
            last_used_at: None,
        };

        for (field, value) in fields {
            if field == "req" {
                usage.total_requests = value.parse().unwrap_or(0);
            } else if field == "ts" {
                usage.last_used_at = value
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                    .map(Timestamp::from_datetime);
            } else if field == "uid" {
                usage.tenant_id = TenantId::new(value).ok();
            } else if let Some(provider) = field.strip_prefix("p:") {
                usage
                    .providers
                    .insert(provider.to_string(), value.parse().unwrap_or(0));
            } else if let Some(mime) = field.strip_prefix("ft:") {
                usage
                    .file_types
                    .insert(mime.to_string(), value.parse().unwrap_or(0));
            } else if let Some(category) = field.strip_prefix("fc:") {
                usage
                    .file_categories
                    .insert(category.to_string(), value.parse().unwrap_or(0));
            }
        }

        usage
    }

    /// Read one aggregate, when present.
    pub async fn read(
        &self,
        api_key: &ApiKeyId,
        date: &str,
    ) -> Result<Option<DailyUsage>, CounterStoreError> {
        let key = metric_key(api_key, date);
        let fields = self.store.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::parse_fields(
            api_key.clone(),
            date.to_string(),
            fields,
        )))
    }

    /// Scan every aggregate currently in the store. Keys that fail to
    /// parse are skipped with a warning rather than failing the scan.
    pub async fn scan(&self, page_size: usize) -> Result<Vec<DailyUsage>, CounterStoreError> {
        let pattern = format!("{METRIC_KEY_PREFIX}*");
        let mut aggregates = Vec::new();

        for key in self.store.scan_keys(&pattern, page_size).await? {
            let Some((api_key, date)) = Self::parse_key(&key) else {
                warn!(component = "usage", key = %key, "skipping unparseable metric key");
                continue;
            };
            let fields = self.store.hash_get_all(&key).await?;
            if fields.is_empty() {
                continue;
            }
            aggregates.push(Self::parse_fields(api_key, date, fields));
        }

        Ok(aggregates)
    }

    /// Delete one aggregate key (after its rollup committed).
    pub async fn delete(&self, api_key: &ApiKeyId, date: &str) -> Result<(), CounterStoreError> {
        self.store.delete(&metric_key(api_key, date)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
