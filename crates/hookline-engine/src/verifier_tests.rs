//! Tests for object verification dispatch and polling.

use super::*;
use hookline_core::record::{
    NewWebhook, ProviderLocator, StorageProvider, TriggerMode, WebhookRecord,
};
use hookline_core::signer::generate_secret;
use hookline_core::{ApiKeyId, TenantId};
use std::sync::atomic::{AtomicU32, Ordering};

fn record_for(provider: StorageProvider, locator: ProviderLocator) -> WebhookRecord {
    WebhookRecord::create(
        NewWebhook {
            tenant_id: TenantId::new("tenant-1").unwrap(),
            api_key_id: ApiKeyId::new("key-1").unwrap(),
            target_url: "https://example.com/cb".to_string(),
            trigger_mode: TriggerMode::Auto,
            provider,
            locator,
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

// ============================================================================
// Skip Semantics
// ============================================================================

#[tokio::test]
async fn test_cdn_providers_skip_verification() {
    let verifier = S3ObjectVerifier::new(CredentialKey::generate());

    for provider in [
        StorageProvider::Supabase,
        StorageProvider::Uploadcare,
        StorageProvider::Vercel,
    ] {
        let record = record_for(provider, ProviderLocator::cdn("file-key", "uuid"));
        let verification = verifier.verify(&record).await.unwrap();
        assert!(verification.exists);
        assert!(verification.skipped);
        assert_eq!(verification.reason.as_deref(), Some(REASON_NO_VERIFICATION));
    }
}

#[tokio::test]
async fn test_s3_without_credentials_skips() {
    let verifier = S3ObjectVerifier::new(CredentialKey::generate());
    let record = record_for(StorageProvider::S3, ProviderLocator::s3("bucket", "key"));

    let verification = verifier.verify(&record).await.unwrap();
    assert!(verification.exists);
    assert!(verification.skipped);
    assert_eq!(verification.reason.as_deref(), Some(REASON_NO_CREDENTIALS));
}

#[tokio::test]
async fn test_sealed_credentials_with_missing_bucket_is_permanent() {
    let key = CredentialKey::generate();
    let sealed = hookline_core::credentials::seal(
        &key,
        &hookline_core::credentials::ProviderCredentials {
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
            region: None,
            endpoint: None,
        },
    )
    .unwrap();

    let locator = ProviderLocator {
        key: Some("object".to_string()),
        ..ProviderLocator::default()
    }
    .with_credentials(sealed);
    let record = record_for(StorageProvider::S3, locator);

    let verifier = S3ObjectVerifier::new(key);
    let err = verifier.verify(&record).await.unwrap_err();
    assert!(matches!(err, VerifierError::IncompleteLocator { field: "bucket" }));
    assert!(!err.is_transient());
}

// ============================================================================
// Error Classification
// ============================================================================

#[test]
fn test_etag_mismatch_is_transient() {
    let err = VerifierError::EtagMismatch {
        expected: "a".to_string(),
        actual: "b".to_string(),
    };
    assert!(err.is_transient());
    assert!(err.to_string().contains("ETag mismatch"));
}

#[test]
fn test_provider_request_failures_are_transient() {
    assert!(VerifierError::Transient {
        message: "timeout".to_string()
    }
    .is_transient());
}

// ============================================================================
// Polling Helper
// ============================================================================

/// Verifier stub that reports the object missing for the first
/// `misses` calls.
struct EventuallyPresent {
    misses: u32,
    calls: AtomicU32,
}

#[async_trait]
impl ObjectVerifier for EventuallyPresent {
    async fn verify(&self, _record: &WebhookRecord) -> Result<Verification, VerifierError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.misses {
            Ok(Verification::missing())
        } else {
            Ok(Verification::found(ObjectMetadata::default()))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_object_polls_until_present() {
    let verifier = EventuallyPresent {
        misses: 3,
        calls: AtomicU32::new(0),
    };
    let record = record_for(StorageProvider::S3, ProviderLocator::s3("b", "k"));

    let verification = wait_for_object(&verifier, &record, DEFAULT_WAIT_FOR_OBJECT)
        .await
        .unwrap();
    assert!(verification.exists);
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_object_gives_up_after_budget() {
    let verifier = EventuallyPresent {
        misses: u32::MAX,
        calls: AtomicU32::new(0),
    };
    let record = record_for(StorageProvider::S3, ProviderLocator::s3("b", "k"));

    let started = tokio::time::Instant::now();
    let verification = wait_for_object(&verifier, &record, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(!verification.exists);
    // Never sleeps past the budget.
    assert!(started.elapsed() <= Duration::from_secs(10));

    // Backoff grows 500ms * 1.5^n capped at 5s: within a 10s budget the
    // helper gets a bounded handful of probes, not a hot loop.
    let calls = verifier.calls.load(Ordering::SeqCst);
    assert!((4..=8).contains(&calls), "unexpected probe count {calls}");
}

#[tokio::test]
async fn test_wait_for_object_returns_skip_immediately() {
    let verifier = S3ObjectVerifier::new(CredentialKey::generate());
    let record = record_for(StorageProvider::Uploadcare, ProviderLocator::cdn("f", "u"));

    let verification = wait_for_object(&verifier, &record, DEFAULT_WAIT_FOR_OBJECT)
        .await
        .unwrap();
    assert!(verification.skipped);
}

#[tokio::test]
async fn test_wait_for_object_propagates_errors() {
    struct AlwaysFails;

    #[async_trait]
    impl ObjectVerifier for AlwaysFails {
        async fn verify(&self, _: &WebhookRecord) -> Result<Verification, VerifierError> {
            Err(VerifierError::Transient {
                message: "boom".to_string(),
            })
        }
    }

    let record = record_for(StorageProvider::S3, ProviderLocator::s3("b", "k"));
    let err = wait_for_object(&AlwaysFails, &record, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
