//! Tests for the in-memory store implementations.
//!
//! These pin down the semantics the Postgres implementations share:
//! tenant scoping, the state machine guards, the expiry guard on
//! completion, and retention sweeps.

use super::*;
use hookline_core::record::{NewWebhook, ProviderLocator, StorageProvider, TriggerMode};
use hookline_core::signer::generate_secret;
use std::time::Duration;

fn tenant(name: &str) -> TenantId {
    TenantId::new(name).unwrap()
}

fn record_for(tenant_name: &str) -> WebhookRecord {
    WebhookRecord::create(
        NewWebhook {
            tenant_id: tenant(tenant_name),
            api_key_id: ApiKeyId::new("key-1").unwrap(),
            target_url: "https://example.com/cb".to_string(),
            trigger_mode: TriggerMode::Manual,
            provider: StorageProvider::S3,
            locator: ProviderLocator::s3("bucket", "object"),
            filename: None,
            content_type: None,
            file_size: None,
            metadata: serde_json::json!({}),
            time_to_live: Duration::from_secs(3600),
        },
        generate_secret(),
    )
    .unwrap()
}

async fn stored(stores: &MemoryStores, tenant_name: &str) -> WebhookRecord {
    let record = record_for(tenant_name);
    WebhookStore::insert(stores, &record).await.unwrap();
    record
}

// ============================================================================
// Ownership and Listing
// ============================================================================

#[tokio::test]
async fn test_cross_tenant_read_is_denied() {
    let stores = MemoryStores::new();
    let record = stored(&stores, "tenant-a").await;

    let err = stores
        .get_owned(&tenant("tenant-b"), &record.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AccessDenied { .. }));

    assert!(stores.get_owned(&tenant("tenant-a"), &record.id).await.is_ok());
}

#[tokio::test]
async fn test_list_filters_by_status_and_paginates() {
    let stores = MemoryStores::new();
    for _ in 0..5 {
        stored(&stores, "tenant-a").await;
    }
    let other = stored(&stores, "tenant-b").await;

    let all = stores.list(&tenant("tenant-a"), None, 3, 0).await.unwrap();
    assert_eq!(all.len(), 3);

    let rest = stores.list(&tenant("tenant-a"), None, 10, 3).await.unwrap();
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|r| r.id != other.id));

    let completed = stores
        .list(&tenant("tenant-a"), Some(WebhookStatus::Completed), 10, 0)
        .await
        .unwrap();
    assert!(completed.is_empty());
}

// ============================================================================
// State Machine Guards
// ============================================================================

#[tokio::test]
async fn test_transition_rejects_illegal_moves() {
    let stores = MemoryStores::new();
    let record = stored(&stores, "tenant-a").await;

    let err = stores
        .transition(&record.id, WebhookStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    stores.transition(&record.id, WebhookStatus::Verifying).await.unwrap();
    stores.transition(&record.id, WebhookStatus::Delivering).await.unwrap();
    stores.transition(&record.id, WebhookStatus::Completed).await.unwrap();
}

#[tokio::test]
async fn test_completed_records_are_sticky() {
    let stores = MemoryStores::new();
    let record = stored(&stores, "tenant-a").await;
    stores
        .record_delivery_success(&record.id, 1, 200, "ok", Timestamp::now())
        .await
        .unwrap();

    // No further state writes land.
    assert!(stores
        .record_retry(&record.id, 2, Timestamp::now(), "err", Timestamp::now())
        .await
        .is_err());
    assert!(stores
        .record_dead_letter(&record.id, 3, "err", Timestamp::now())
        .await
        .is_err());
    assert!(stores.reset_for_retry(&record.id).await.is_err());
    assert!(WebhookStore::delete(&stores, &record.id).await.is_err());

    let current = WebhookStore::get(&stores, &record.id).await.unwrap();
    assert_eq!(current.status, WebhookStatus::Completed);
    assert_eq!(current.response_status, Some(200));
    assert_eq!(current.response_body.as_deref(), Some("ok"));
    assert!(current.completed_at.is_some());
}

#[tokio::test]
async fn test_expired_record_cannot_complete() {
    let stores = MemoryStores::new();
    let mut record = record_for("tenant-a");
    record.expires_at = record.created_at;
    WebhookStore::insert(&stores, &record).await.unwrap();

    let err = stores
        .record_delivery_success(&record.id, 1, 200, "ok", Timestamp::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[tokio::test]
async fn test_retry_bookkeeping() {
    let stores = MemoryStores::new();
    let record = stored(&stores, "tenant-a").await;
    let at = Timestamp::now();
    let next = at.add_duration(Duration::from_secs(5));

    stores
        .record_retry(&record.id, 1, next, "500 from receiver", at)
        .await
        .unwrap();

    let current = WebhookStore::get(&stores, &record.id).await.unwrap();
    assert_eq!(current.status, WebhookStatus::Pending);
    assert_eq!(current.attempt_count, 1);
    assert_eq!(current.next_retry_at, Some(next));
    assert!(current.next_retry_at.unwrap() >= current.last_attempt_at.unwrap());
    assert_eq!(current.error_message.as_deref(), Some("500 from receiver"));
}

#[tokio::test]
async fn test_reset_for_retry_zeroes_attempts() {
    let stores = MemoryStores::new();
    let record = stored(&stores, "tenant-a").await;
    stores
        .record_dead_letter(&record.id, 3, "503", Timestamp::now())
        .await
        .unwrap();

    stores.reset_for_retry(&record.id).await.unwrap();

    let current = WebhookStore::get(&stores, &record.id).await.unwrap();
    assert_eq!(current.status, WebhookStatus::Pending);
    assert_eq!(current.attempt_count, 0);
    assert!(current.error_message.is_none());
}

// ============================================================================
// Dead Letter Store
// ============================================================================

#[tokio::test]
async fn test_due_returns_only_mature_unresolved_entries() {
    let stores = MemoryStores::new();
    let now = Timestamp::now();

    let ready = stored(&stores, "tenant-a").await;
    let waiting = stored(&stores, "tenant-a").await;
    let resolved = stored(&stores, "tenant-a").await;

    let ready_entry = DeadLetterEntry::for_record(&ready, "503".to_string(), now);
    let waiting_entry = DeadLetterEntry::for_record(
        &waiting,
        "503".to_string(),
        now.add_duration(Duration::from_secs(3600)),
    );
    let resolved_entry = DeadLetterEntry::for_record(&resolved, "503".to_string(), now);

    DeadLetterStore::insert(&stores, &ready_entry).await.unwrap();
    DeadLetterStore::insert(&stores, &waiting_entry).await.unwrap();
    DeadLetterStore::insert(&stores, &resolved_entry).await.unwrap();
    stores.resolve(&resolved_entry.id, "operator", now).await.unwrap();

    let due = stores.due(now, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, ready_entry.id);
}

#[tokio::test]
async fn test_resolve_twice_is_a_conflict() {
    let stores = MemoryStores::new();
    let record = stored(&stores, "tenant-a").await;
    let entry = DeadLetterEntry::for_record(&record, "503".to_string(), Timestamp::now());
    DeadLetterStore::insert(&stores, &entry).await.unwrap();

    stores.resolve(&entry.id, "operator", Timestamp::now()).await.unwrap();
    let err = stores
        .resolve(&entry.id, "operator", Timestamp::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_purge_completed_respects_cutoff() {
    let stores = MemoryStores::new();
    let old = stored(&stores, "tenant-a").await;
    let fresh = stored(&stores, "tenant-a").await;

    let long_ago = Timestamp::now().subtract_duration(Duration::from_secs(40 * 24 * 3600));
    stores
        .record_delivery_success(&old.id, 1, 200, "ok", long_ago)
        .await
        .unwrap();
    stores
        .record_delivery_success(&fresh.id, 1, 200, "ok", Timestamp::now())
        .await
        .unwrap();

    let cutoff = Timestamp::now().subtract_duration(Duration::from_secs(30 * 24 * 3600));
    let purged = stores.purge_completed_before(cutoff).await.unwrap();
    assert_eq!(purged, 1);
    assert!(WebhookStore::get(&stores, &old.id).await.is_err());
    assert!(WebhookStore::get(&stores, &fresh.id).await.is_ok());
}

// ============================================================================
// Rollups and Quotas
// ============================================================================

#[tokio::test]
async fn test_rollup_upsert_overwrites_wholesale() {
    let stores = MemoryStores::new();
    let api_key = ApiKeyId::new("key-1").unwrap();

    let mut first = DailyRollup {
        api_key_id: api_key.clone(),
        tenant_id: Some(tenant("tenant-a")),
        date: "2025-01-01".to_string(),
        total_requests: 10,
        providers: [("s3".to_string(), 10)].into_iter().collect(),
        file_types: HashMap::new(),
        file_categories: HashMap::new(),
        last_used_at: None,
    };
    stores.upsert_daily(&first).await.unwrap();

    first.total_requests = 25;
    first.providers = [("r2".to_string(), 25)].into_iter().collect();
    stores.upsert_daily(&first).await.unwrap();

    let stored = stores.get_daily(&api_key, "2025-01-01").await.unwrap().unwrap();
    assert_eq!(stored.total_requests, 25);
    assert_eq!(stored.providers.get("r2"), Some(&25));
    assert!(stored.providers.get("s3").is_none());
}

#[tokio::test]
async fn test_monthly_usage_accumulates_into_quota() {
    let stores = MemoryStores::new();
    let tenant = tenant("tenant-a");
    stores.set_quota(&tenant, 1000);

    let month = Timestamp::now().month_key();
    stores.add_monthly_usage(&tenant, &month, 400).await.unwrap();
    stores.add_monthly_usage(&tenant, &month, 200).await.unwrap();

    let quota = stores.monthly_quota(&tenant).await.unwrap();
    assert_eq!(quota.monthly_limit, 1000);
    assert_eq!(quota.current_usage, 600);
}
