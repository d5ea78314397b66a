//! Tests for the dead-letter reaper.

use super::*;
use crate::queue::PRIORITY_THRESHOLD;
use hookline_core::record::{
    NewWebhook, ProviderLocator, StorageProvider, TriggerMode, WebhookRecord, WebhookStatus,
};
use hookline_core::signer::generate_secret;
use hookline_core::{ApiKeyId, NoOpPipelineMetrics, TenantId};
use hookline_counter::InMemoryCounterStore;
use hookline_store::MemoryStores;

struct Harness {
    stores: MemoryStores,
    queue: Arc<WebhookQueue>,
    reaper: DeadLetterReaper,
}

fn harness() -> Harness {
    let stores = MemoryStores::new();
    let queue = Arc::new(WebhookQueue::new(Arc::new(InMemoryCounterStore::new())));
    let reaper = DeadLetterReaper::new(
        ReaperConfig::default(),
        Arc::new(stores.clone()),
        Arc::new(stores.clone()),
        queue.clone(),
        Arc::new(NoOpPipelineMetrics),
    );
    Harness {
        stores,
        queue,
        reaper,
    }
}

async fn dead_lettered(stores: &MemoryStores, retry_after: Timestamp) -> DeadLetterEntry {
    let record = WebhookRecord::create(
        NewWebhook {
            tenant_id: TenantId::new("tenant-1").unwrap(),
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
    .unwrap();
    WebhookStore::insert(stores, &record).await.unwrap();
    stores
        .record_dead_letter(&record.id, 3, "503 from receiver", Timestamp::now())
        .await
        .unwrap();

    let snapshot = WebhookStore::get(stores, &record.id).await.unwrap();
    let entry = DeadLetterEntry::for_record(&snapshot, "503 from receiver".to_string(), retry_after);
    DeadLetterStore::insert(stores, &entry).await.unwrap();
    entry
}

#[tokio::test]
async fn test_due_entries_are_resurrected() {
    let h = harness();
    let entry = dead_lettered(&h.stores, Timestamp::now()).await;

    let resurrected = h.reaper.run_once().await.unwrap();
    assert_eq!(resurrected, 1);

    // The webhook is pending again with a clean slate.
    let record = WebhookStore::get(&h.stores, &entry.webhook_id).await.unwrap();
    assert_eq!(record.status, WebhookStatus::Pending);
    assert_eq!(record.attempt_count, 0);
    assert!(record.error_message.is_none());

    // The row is gone and the webhook is queued at priority 1 (normal
    // lane).
    assert_eq!(h.stores.dead_letter_count(), 0);
    let items = h.queue.dequeue_batch(10).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, entry.webhook_id);
    assert_eq!(items[0].priority, 1);
    assert!(items[0].priority <= PRIORITY_THRESHOLD);
}

#[tokio::test]
async fn test_immature_entries_wait_for_their_cooloff() {
    let h = harness();
    dead_lettered(
        &h.stores,
        Timestamp::now().add_duration(Duration::from_secs(3600)),
    )
    .await;

    let resurrected = h.reaper.run_once().await.unwrap();
    assert_eq!(resurrected, 0);
    assert_eq!(h.stores.dead_letter_count(), 1);
    assert!(h.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_resolved_entries_are_never_resurrected() {
    let h = harness();
    let entry = dead_lettered(&h.stores, Timestamp::now()).await;
    h.reaper.resolve(&entry.id, "operator@example").await.unwrap();

    let resurrected = h.reaper.run_once().await.unwrap();
    assert_eq!(resurrected, 0);
    assert!(h.queue.is_empty().await.unwrap());

    let record = WebhookStore::get(&h.stores, &entry.webhook_id).await.unwrap();
    assert_eq!(record.status, WebhookStatus::DeadLetter);
}

#[tokio::test]
async fn test_entry_for_deleted_webhook_is_discarded() {
    let h = harness();
    let entry = dead_lettered(&h.stores, Timestamp::now()).await;
    WebhookStore::delete(&h.stores, &entry.webhook_id).await.unwrap();
    // The cascade removed the row; park another orphan entry directly.
    let orphan = DeadLetterEntry {
        id: hookline_core::Uuid::new_v4(),
        webhook_id: hookline_core::WebhookId::new(),
        original_snapshot: serde_json::json!({}),
        failure_reason: "503".to_string(),
        attempt_count: 3,
        created_at: Timestamp::now(),
        retry_after: Timestamp::now(),
        resolved: false,
        resolved_at: None,
        resolved_by: None,
    };
    DeadLetterStore::insert(&h.stores, &orphan).await.unwrap();

    let resurrected = h.reaper.run_once().await.unwrap();
    assert_eq!(resurrected, 0);
    assert_eq!(h.stores.dead_letter_count(), 0);
    assert!(h.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_batch_limit_bounds_one_run() {
    let h = harness();
    for _ in 0..3 {
        dead_lettered(&h.stores, Timestamp::now()).await;
    }

    let limited = DeadLetterReaper::new(
        ReaperConfig {
            batch_limit: 2,
            ..ReaperConfig::default()
        },
        Arc::new(h.stores.clone()),
        Arc::new(h.stores.clone()),
        h.queue.clone(),
        Arc::new(NoOpPipelineMetrics),
    );

    assert_eq!(limited.run_once().await.unwrap(), 2);
    assert_eq!(h.stores.dead_letter_count(), 1);
    assert_eq!(limited.run_once().await.unwrap(), 1);
}
