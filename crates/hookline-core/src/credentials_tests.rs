//! Tests for credential sealing.

use super::*;

fn credentials() -> ProviderCredentials {
    ProviderCredentials {
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG".to_string(),
        region: Some("auto".to_string()),
        endpoint: Some("https://accountid.r2.cloudflarestorage.com".to_string()),
    }
}

#[test]
fn test_seal_unseal_round_trip() {
    let key = CredentialKey::generate();
    let sealed = seal(&key, &credentials()).unwrap();
    let unsealed = unseal(&key, &sealed).unwrap();

    assert_eq!(unsealed.access_key_id, "AKIDEXAMPLE");
    assert_eq!(unsealed.secret_access_key, "wJalrXUtnFEMI/K7MDENG");
    assert_eq!(unsealed.region.as_deref(), Some("auto"));
    assert_eq!(
        unsealed.endpoint.as_deref(),
        Some("https://accountid.r2.cloudflarestorage.com")
    );
}

#[test]
fn test_sealed_blob_does_not_leak_plaintext() {
    let key = CredentialKey::generate();
    let sealed = seal(&key, &credentials()).unwrap();
    assert!(!sealed.as_str().contains("AKIDEXAMPLE"));
}

#[test]
fn test_unseal_with_wrong_key_fails() {
    let sealed = seal(&CredentialKey::generate(), &credentials()).unwrap();
    let err = unseal(&CredentialKey::generate(), &sealed).unwrap_err();
    assert!(matches!(err, CredentialError::UnsealFailure));
}

#[test]
fn test_unseal_rejects_tampered_blob() {
    let key = CredentialKey::generate();
    let sealed = seal(&key, &credentials()).unwrap();

    let mut bytes = base64::engine::general_purpose::STANDARD
        .decode(sealed.as_str())
        .unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let tampered = SealedCredentials::from_blob(
        base64::engine::general_purpose::STANDARD.encode(bytes),
    );

    assert!(matches!(
        unseal(&key, &tampered).unwrap_err(),
        CredentialError::UnsealFailure
    ));
}

#[test]
fn test_unseal_rejects_truncated_blob() {
    let key = CredentialKey::generate();
    let truncated = SealedCredentials::from_blob(
        base64::engine::general_purpose::STANDARD.encode([0u8; 8]),
    );
    assert!(matches!(
        unseal(&key, &truncated).unwrap_err(),
        CredentialError::Truncated
    ));
}

#[test]
fn test_key_from_base64_enforces_length() {
    let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
    assert!(matches!(
        CredentialKey::from_base64(&short).unwrap_err(),
        CredentialError::InvalidKeyLength { expected: 32, actual: 16 }
    ));

    let exact = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
    assert!(CredentialKey::from_base64(&exact).is_ok());
}

#[test]
fn test_each_seal_uses_fresh_nonce() {
    let key = CredentialKey::generate();
    let first = seal(&key, &credentials()).unwrap();
    let second = seal(&key, &credentials()).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_debug_output_is_redacted() {
    let rendered = format!("{:?}", credentials());
    assert!(!rendered.contains("AKIDEXAMPLE"));
    assert!(!rendered.contains("wJalrXUtnFEMI"));
    assert!(rendered.contains("[REDACTED]"));

    let key_rendered = format!("{:?}", CredentialKey::generate());
    assert!(key_rendered.contains("[REDACTED]"));
}
