//! Tests for the delivery engine.
//!
//! Receiver behavior is simulated with wiremock; durable state uses the
//! in-memory stores, and the queue runs on the in-memory counter store.

use super::*;
use crate::queue::QueueItem;
use crate::verifier::{MockObjectVerifier, ObjectMetadata, Verification, VerifierError};
use hookline_core::record::{
    NewWebhook, ProviderLocator, StorageProvider, TriggerMode, WebhookStatus,
};
use hookline_core::signer::generate_secret;
use hookline_core::{ApiKeyId, CircuitBreakerConfig, NoOpPipelineMetrics, TenantId, WebhookId};
use hookline_counter::InMemoryCounterStore;
use hookline_store::MemoryStores;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config() -> DeliveryConfig {
    DeliveryConfig {
        max_attempts: 3,
        retry_delays: vec![
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ],
        jitter_max: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        not_found_requeue_delay: Duration::from_millis(20),
        ..DeliveryConfig::default()
    }
}

struct Harness {
    stores: MemoryStores,
    queue: Arc<WebhookQueue>,
    engine: DeliveryEngine,
}

impl Harness {
    fn new(config: DeliveryConfig, verifier: Arc<dyn ObjectVerifier>) -> Self {
        Self::with_breaker(config, verifier, CircuitBreakerConfig::default())
    }

    fn with_breaker(
        config: DeliveryConfig,
        verifier: Arc<dyn ObjectVerifier>,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let stores = MemoryStores::new();
        let queue = Arc::new(WebhookQueue::new(Arc::new(InMemoryCounterStore::new())));
        let engine = DeliveryEngine::new(
            config,
            Arc::new(HostCircuitBreaker::new(breaker)),
            Arc::new(stores.clone()),
            Arc::new(stores.clone()),
            queue.clone(),
            verifier,
            Arc::new(NoOpPipelineMetrics),
        )
        .unwrap();
        Self {
            stores,
            queue,
            engine,
        }
    }

    async fn enqueue_record(&self, record: &WebhookRecord) -> QueueItem {
        WebhookStore::insert(&self.stores, record).await.unwrap();
        let item = QueueItem::new(record.id, serde_json::json!({}), 0);
        self.queue.enqueue(&item).await.unwrap();
        item
    }

    /// One worker cycle: poll due items, dequeue, process.
    async fn cycle(&self) -> BatchReport {
        self.queue.poll_due(100).await.unwrap();
        let items = self.queue.dequeue_batch(100).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(60);
        self.engine.process_batch(items, deadline).await
    }
}

fn skip_verifier() -> Arc<dyn ObjectVerifier> {
    let mut verifier = MockObjectVerifier::new();
    verifier
        .expect_verify()
        .returning(|_| Ok(Verification::skipped("provider_no_verification")));
    Arc::new(verifier)
}

fn record_to(url: &str, trigger: TriggerMode) -> WebhookRecord {
    WebhookRecord::create(
        NewWebhook {
            tenant_id: TenantId::new("tenant-1").unwrap(),
            api_key_id: ApiKeyId::new("key-1").unwrap(),
            target_url: url.to_string(),
            trigger_mode: trigger,
            provider: StorageProvider::S3,
            locator: ProviderLocator::s3("bucket", "object"),
            filename: Some("photo.jpg".to_string()),
            content_type: Some("image/jpeg".to_string()),
            file_size: Some(1024),
            metadata: serde_json::json!({}),
            time_to_live: Duration::from_secs(3600),
        },
        generate_secret(),
    )
    .unwrap()
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_happy_path_completes_in_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cb"))
        .and(header_exists("X-Webhook-Signature"))
        .and(header_exists("X-Webhook-ID"))
        .and(header_exists("X-Webhook-Event"))
        .and(header_exists("X-Timestamp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let harness = Harness::new(fast_config(), skip_verifier());
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Manual);
    harness.enqueue_record(&record).await;

    let report = harness.cycle().await;
    assert_eq!(report.completed, 1);

    let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
    assert_eq!(stored.status, WebhookStatus::Completed);
    assert_eq!(stored.attempt_count, 1);
    assert_eq!(stored.response_status, Some(200));
    assert_eq!(stored.response_body.as_deref(), Some("ok"));
    assert!(stored.completed_at.is_some());
    assert_eq!(harness.queue.stats().await.unwrap().processing, 0);
}

#[tokio::test]
async fn test_delivered_payload_is_signed_and_verifiable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = Harness::new(fast_config(), skip_verifier());
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Manual);
    harness.enqueue_record(&record).await;
    harness.cycle().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let signature = request.headers.get("X-Webhook-Signature").unwrap();
    assert!(hookline_core::signer::verify_signature(
        &request.body,
        signature.to_str().unwrap(),
        record.secret.as_bytes(),
    ));
    assert_eq!(
        request.headers.get("X-Webhook-ID").unwrap().to_str().unwrap(),
        record.id.to_string()
    );
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_transient_failures_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
        .mount(&server)
        .await;

    let harness = Harness::new(fast_config(), skip_verifier());
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Manual);
    harness.enqueue_record(&record).await;

    let mut attempts_seen = Vec::new();
    for _ in 0..3 {
        let report = harness.cycle().await;
        let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
        if let Some(at) = stored.last_attempt_at {
            attempts_seen.push(at);
        }
        if report.completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
    assert_eq!(stored.status, WebhookStatus::Completed);
    assert_eq!(stored.attempt_count, 3);
    assert_eq!(stored.response_body.as_deref(), Some("finally"));
    for pair in attempts_seen.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
}

#[tokio::test]
async fn test_retry_schedules_next_attempt_after_last() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = Harness::new(fast_config(), skip_verifier());
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Manual);
    harness.enqueue_record(&record).await;
    harness.cycle().await;

    let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
    assert_eq!(stored.status, WebhookStatus::Pending);
    assert_eq!(stored.attempt_count, 1);
    assert!(stored.next_retry_at.unwrap() >= stored.last_attempt_at.unwrap());
    assert!(stored.error_message.as_deref().unwrap().contains("HTTP 500"));
}

// ============================================================================
// Exhaustion
// ============================================================================

#[tokio::test]
async fn test_exhaustion_dead_letters_with_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let harness = Harness::new(fast_config(), skip_verifier());
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Manual);
    harness.enqueue_record(&record).await;

    for _ in 0..3 {
        harness.cycle().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
    assert_eq!(stored.status, WebhookStatus::DeadLetter);
    assert_eq!(stored.attempt_count, 3);
    assert_eq!(harness.stores.dead_letter_count(), 1);

    let entries = harness
        .stores
        .due(Timestamp::now().add_duration(Duration::from_secs(7200)), 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].failure_reason.contains("503"));
    assert_eq!(entries[0].attempt_count, 3);
    // Cool-off before the reaper may touch it.
    assert!(entries[0].retry_after > Timestamp::now());

    // Exactly three HTTP calls; a dead-lettered record gets no more.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    harness.cycle().await;
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

// ============================================================================
// Verification Interplay
// ============================================================================

#[tokio::test]
async fn test_missing_object_requeues_without_burning_an_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut verifier = MockObjectVerifier::new();
    verifier
        .expect_verify()
        .returning(|_| Ok(Verification::missing()));

    let harness = Harness::new(fast_config(), Arc::new(verifier));
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Auto);
    harness.enqueue_record(&record).await;

    let report = harness.cycle().await;
    assert_eq!(report.awaiting_object, 1);

    let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
    assert_eq!(stored.status, WebhookStatus::Pending);
    assert_eq!(stored.attempt_count, 0);
    assert!(server.received_requests().await.unwrap().is_empty());

    // The item comes back after the re-queue delay.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(harness.queue.poll_due(100).await.unwrap(), 1);
}

#[tokio::test]
async fn test_verified_metadata_lands_on_record_and_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut verifier = MockObjectVerifier::new();
    verifier.expect_verify().returning(|_| {
        Ok(Verification::found(ObjectMetadata {
            content_length: Some(4096),
            content_type: Some("image/jpeg".to_string()),
            etag: Some("abc123".to_string()),
            last_modified: None,
            user_metadata: Default::default(),
        }))
    });

    let harness = Harness::new(fast_config(), Arc::new(verifier));
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Auto);
    harness.enqueue_record(&record).await;
    harness.cycle().await;

    let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
    assert_eq!(stored.status, WebhookStatus::Completed);
    assert_eq!(stored.etag.as_deref(), Some("abc123"));
    assert_eq!(stored.file_size, Some(4096));

    let requests = server.received_requests().await.unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(payload.get("etag").and_then(|v| v.as_str()), Some("abc123"));
    assert_eq!(payload.get("fileSize").and_then(|v| v.as_i64()), Some(4096));
}

#[tokio::test]
async fn test_etag_mismatch_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut verifier = MockObjectVerifier::new();
    verifier.expect_verify().returning(|_| {
        Err(VerifierError::EtagMismatch {
            expected: "A".to_string(),
            actual: "B".to_string(),
        })
    });

    let harness = Harness::new(fast_config(), Arc::new(verifier));
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Auto);
    harness.enqueue_record(&record).await;

    let report = harness.cycle().await;
    assert_eq!(report.retried, 1);

    let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
    assert_eq!(stored.status, WebhookStatus::Pending);
    assert_eq!(stored.attempt_count, 1);
    assert!(stored.error_message.as_deref().unwrap().contains("ETag mismatch"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[tokio::test]
async fn test_sixth_dispatch_to_failing_host_is_circuit_broken() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = DeliveryConfig {
        max_attempts: 1, // every failure dead-letters; no re-queues
        ..fast_config()
    };
    let harness = Harness::with_breaker(
        config,
        skip_verifier(),
        CircuitBreakerConfig {
            failure_threshold: 5,
            break_duration: Duration::from_secs(300),
            failure_window: Duration::from_secs(60),
        },
    );

    for _ in 0..6 {
        let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Manual);
        harness.enqueue_record(&record).await;
        harness.cycle().await;
    }

    // Five connections went out; the sixth failed fast.
    assert_eq!(server.received_requests().await.unwrap().len(), 5);

    let tenant = TenantId::new("tenant-1").unwrap();
    let dead = harness
        .stores
        .list(&tenant, Some(WebhookStatus::DeadLetter), 10, 0)
        .await
        .unwrap();
    assert_eq!(dead.len(), 6);
    let circuit_broken = dead
        .iter()
        .filter(|r| r.error_message.as_deref() == Some(REASON_CIRCUIT_OPEN))
        .count();
    assert_eq!(circuit_broken, 1);
}

// ============================================================================
// Phantom Deliveries
// ============================================================================

#[tokio::test]
async fn test_deleted_record_is_never_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = Harness::new(fast_config(), skip_verifier());
    // Enqueue an item whose record does not exist (deleted after
    // enqueue).
    let item = QueueItem::new(WebhookId::new(), serde_json::json!({}), 0);
    harness.queue.enqueue(&item).await.unwrap();

    let report = harness.cycle().await;
    assert_eq!(report.skipped, 1);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_terminal_record_is_never_redelivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = Harness::new(fast_config(), skip_verifier());
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Manual);
    harness.enqueue_record(&record).await;
    harness
        .stores
        .record_delivery_success(&record.id, 1, 200, "ok", Timestamp::now())
        .await
        .unwrap();

    let report = harness.cycle().await;
    assert_eq!(report.skipped, 1);
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ============================================================================
// Response Handling
// ============================================================================

#[tokio::test]
async fn test_stored_response_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(1500)))
        .mount(&server)
        .await;

    let harness = Harness::new(fast_config(), skip_verifier());
    let record = record_to(&format!("{}/cb", server.uri()), TriggerMode::Manual);
    harness.enqueue_record(&record).await;
    harness.cycle().await;

    let stored = WebhookStore::get(&harness.stores, &record.id).await.unwrap();
    assert_eq!(stored.response_body.unwrap().len(), 1000);
}

#[test]
fn test_truncate_respects_char_boundaries() {
    let text = "héllo".repeat(300);
    let truncated = truncate_bytes(&text, 1000);
    assert!(truncated.len() <= 1000);
    assert!(text.starts_with(&truncated));
}

#[test]
fn test_retry_delay_schedule_with_jitter_bounds() {
    let config = DeliveryConfig::default();
    for (attempt, base) in [(1u32, 1u64), (2, 5), (3, 30)] {
        let delay = config.retry_delay(attempt);
        assert!(delay >= Duration::from_secs(base));
        assert!(delay <= Duration::from_secs(base) + Duration::from_millis(1000));
    }
}
