//! Tests for core identifier and timestamp types.

use super::*;

// ============================================================================
// Identifier Tests
// ============================================================================

#[test]
fn test_webhook_id_round_trips_through_string() {
    let id = WebhookId::new();
    let parsed: WebhookId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn test_webhook_id_rejects_garbage() {
    assert!("not-a-uuid".parse::<WebhookId>().is_err());
}

#[test]
fn test_tenant_id_validation() {
    assert!(TenantId::new("tenant-1").is_ok());
    assert!(TenantId::new("").is_err());
    assert!(TenantId::new("a".repeat(129)).is_err());
    assert!(TenantId::new("has space").is_err());
}

#[test]
fn test_api_key_id_rejects_key_separator() {
    assert!(ApiKeyId::new("key-1").is_ok());
    assert!(ApiKeyId::new("key:1").is_err());
    assert!(ApiKeyId::new("").is_err());
}

// ============================================================================
// Timestamp Tests
// ============================================================================

#[test]
fn test_timestamp_rfc3339_round_trip() {
    let ts = Timestamp::from_rfc3339("2025-01-01T12:30:00Z").unwrap();
    let back = Timestamp::from_rfc3339(&ts.to_rfc3339()).unwrap();
    assert_eq!(ts, back);
}

#[test]
fn test_timestamp_date_key_format() {
    let ts = Timestamp::from_rfc3339("2025-01-05T23:59:59Z").unwrap();
    assert_eq!(ts.date_key(), "2025-01-05");
    assert_eq!(ts.month_key(), "2025-01");
}

#[test]
fn test_timestamp_ordering_after_add() {
    let earlier = Timestamp::now();
    let later = earlier.add_duration(Duration::from_secs(30));
    assert!(later > earlier);
    assert_eq!(later.duration_since(earlier), Duration::from_secs(30));
}

#[test]
fn test_timestamp_subtract_duration() {
    let ts = Timestamp::from_rfc3339("2025-01-01T00:01:00Z").unwrap();
    let back = ts.subtract_duration(Duration::from_secs(60));
    assert_eq!(back.to_rfc3339(), "2025-01-01T00:00:00+00:00");
}
