//! Tests for counter store error classification.

use super::*;

#[test]
fn test_connection_failures_are_transient() {
    let err = CounterStoreError::ConnectionFailed {
        message: "refused".to_string(),
    };
    assert!(err.is_transient());
}

#[test]
fn test_operation_failures_are_transient() {
    let err = CounterStoreError::operation("INCR", "loading dataset");
    assert!(err.is_transient());
}

#[test]
fn test_wrong_type_is_permanent() {
    let err = CounterStoreError::WrongType {
        key: "webhook:queue".to_string(),
    };
    assert!(!err.is_transient());
}

#[test]
fn test_invalid_pattern_is_permanent() {
    let err = CounterStoreError::InvalidPattern {
        pattern: String::new(),
    };
    assert!(!err.is_transient());
}

#[test]
fn test_operation_error_message_includes_operation() {
    let err = CounterStoreError::operation("ZADD", "oops");
    assert!(err.to_string().contains("ZADD"));
    assert!(err.to_string().contains("oops"));
}
