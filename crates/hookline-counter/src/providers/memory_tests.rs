//! Tests for the in-memory counter store provider.
//!
//! These exercise the same semantics the Redis provider relies on:
//! atomic windowed counters, set-once hash fields, NX locks, FIFO lists,
//! and score-ordered sorted sets.

use super::*;

fn store() -> InMemoryCounterStore {
    InMemoryCounterStore::new()
}

// ============================================================================
// Counter Tests
// ============================================================================

#[tokio::test]
async fn test_incr_returns_running_total() {
    let store = store();
    let ttl = Duration::from_secs(60);

    assert_eq!(store.incr_with_ttl("rl:t1:upload:100", 1, ttl).await.unwrap(), 1);
    assert_eq!(store.incr_with_ttl("rl:t1:upload:100", 1, ttl).await.unwrap(), 2);
    assert_eq!(store.incr_with_ttl("rl:t1:upload:100", 3, ttl).await.unwrap(), 5);
}

#[tokio::test]
async fn test_counter_expires_after_window() {
    let store = store();

    store
        .incr_with_ttl("rl:t1:upload:100", 1, Duration::from_millis(20))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    // Window elapsed; the next increment starts a fresh counter.
    let next = store
        .incr_with_ttl("rl:t1:upload:100", 1, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(next, 1);
}

// ============================================================================
// Hash Tests
// ============================================================================

#[tokio::test]
async fn test_hash_incr_accumulates_fields() {
    let store = store();
    let ttl = Duration::from_secs(60);

    store
        .hash_incr(
            "m:k1:2025-01-01",
            &[("req".to_string(), 1), ("p:s3".to_string(), 1)],
            ttl,
        )
        .await
        .unwrap();
    store
        .hash_incr("m:k1:2025-01-01", &[("req".to_string(), 2)], ttl)
        .await
        .unwrap();

    let fields = store.hash_get_all("m:k1:2025-01-01").await.unwrap();
    assert_eq!(fields.get("req").map(String::as_str), Some("3"));
    assert_eq!(fields.get("p:s3").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_hash_set_nx_writes_once() {
    let store = store();

    assert!(store.hash_set_nx("m:k1:2025-01-01", "uid", "t1").await.unwrap());
    assert!(!store.hash_set_nx("m:k1:2025-01-01", "uid", "t2").await.unwrap());

    let fields = store.hash_get_all("m:k1:2025-01-01").await.unwrap();
    assert_eq!(fields.get("uid").map(String::as_str), Some("t1"));
}

#[tokio::test]
async fn test_missing_hash_reads_empty() {
    let store = store();
    assert!(store.hash_get_all("m:absent").await.unwrap().is_empty());
}

// ============================================================================
// String Key Tests
// ============================================================================

#[tokio::test]
async fn test_set_nx_lock_semantics() {
    let store = store();
    let ttl = Duration::from_secs(60);

    assert!(store.set_nx_with_ttl("confirm:w1", "1", ttl).await.unwrap());
    assert!(!store.set_nx_with_ttl("confirm:w1", "1", ttl).await.unwrap());

    store.delete("confirm:w1").await.unwrap();
    assert!(store.set_nx_with_ttl("confirm:w1", "1", ttl).await.unwrap());
}

#[tokio::test]
async fn test_set_nx_lock_expires() {
    let store = store();

    assert!(store
        .set_nx_with_ttl("confirm:w1", "1", Duration::from_millis(20))
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(store
        .set_nx_with_ttl("confirm:w1", "1", Duration::from_secs(60))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_scan_keys_matches_prefix_pattern() {
    let store = store();
    let ttl = Duration::from_secs(60);

    store.set_with_ttl("m:k1:2025-01-01", "x", ttl).await.unwrap();
    store.set_with_ttl("m:k2:2025-01-01", "x", ttl).await.unwrap();
    store.set_with_ttl("quota:t1", "x", ttl).await.unwrap();

    let keys = store.scan_keys("m:*", 10).await.unwrap();
    assert_eq!(keys, vec!["m:k1:2025-01-01", "m:k2:2025-01-01"]);
}

// ============================================================================
// List Tests
// ============================================================================

#[tokio::test]
async fn test_list_is_fifo() {
    let store = store();

    store.list_push_front("webhook:queue", "a").await.unwrap();
    store.list_push_front("webhook:queue", "b").await.unwrap();
    store.list_push_front("webhook:queue", "c").await.unwrap();

    let popped = store.list_pop_back_batch("webhook:queue", 2).await.unwrap();
    assert_eq!(popped, vec!["a", "b"]);
    assert_eq!(store.list_len("webhook:queue").await.unwrap(), 1);
}

#[tokio::test]
async fn test_list_pop_preserves_payload_bytes() {
    let store = store();
    let payload = r#"{"id":"w1","payload":{"nested":[1,2,3]},"priority":0}"#;

    store.list_push_front("webhook:queue", payload).await.unwrap();
    let popped = store.list_pop_back_batch("webhook:queue", 1).await.unwrap();
    assert_eq!(popped, vec![payload]);
}

#[tokio::test]
async fn test_list_remove_drops_all_occurrences() {
    let store = store();

    store.list_push_front("webhook:queue", "a").await.unwrap();
    store.list_push_front("webhook:queue", "b").await.unwrap();
    store.list_push_front("webhook:queue", "a").await.unwrap();

    assert_eq!(store.list_remove("webhook:queue", "a").await.unwrap(), 2);
    assert_eq!(store.list_len("webhook:queue").await.unwrap(), 1);
}

// ============================================================================
// Sorted Set Tests
// ============================================================================

#[tokio::test]
async fn test_zset_pops_lowest_score_first() {
    let store = store();

    store.zset_add("webhook:priority", "late", 300.0).await.unwrap();
    store.zset_add("webhook:priority", "early", 100.0).await.unwrap();
    store.zset_add("webhook:priority", "middle", 200.0).await.unwrap();

    let popped = store.zset_pop_min_batch("webhook:priority", 2).await.unwrap();
    let members: Vec<&str> = popped.iter().map(|m| m.member.as_str()).collect();
    assert_eq!(members, vec!["early", "middle"]);
    assert_eq!(store.zset_len("webhook:priority").await.unwrap(), 1);
}

#[tokio::test]
async fn test_zset_add_updates_score() {
    let store = store();

    store.zset_add("webhook:priority", "w1", 100.0).await.unwrap();
    store.zset_add("webhook:priority", "w1", 50.0).await.unwrap();

    let popped = store.zset_pop_min_batch("webhook:priority", 1).await.unwrap();
    assert_eq!(popped[0].member, "w1");
    assert_eq!(popped[0].score, 50.0);
    assert_eq!(store.zset_len("webhook:priority").await.unwrap(), 0);
}

#[tokio::test]
async fn test_wrong_type_access_is_rejected() {
    let store = store();

    store.list_push_front("webhook:queue", "a").await.unwrap();
    let err = store.zset_len("webhook:queue").await.unwrap_err();
    assert!(matches!(err, CounterStoreError::WrongType { .. }));
}
