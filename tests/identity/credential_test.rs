//! Credential URI parsing and normalization.

use latchkey::identity::{CredentialError, IdentityCredential};

fn credential(raw: &str) -> IdentityCredential {
    match IdentityCredential::parse(raw) {
        Ok(credential) => credential,
        Err(err) => panic!("{raw} should parse: {err}"),
    }
}

#[test]
fn bare_and_prefixed_forms_are_equal() {
    let bare = credential("example.org/server");
    let prefixed = credential("spiffe://example.org/server");
    assert_eq!(bare, prefixed);
    assert_eq!(bare.to_string(), "spiffe://example.org/server");
}

#[test]
fn domain_is_lowercased_and_path_normalized() {
    let parsed = credential("SPIFFE://Example.ORG//ns/prod//web/");
    assert_eq!(parsed.trust_domain(), "example.org");
    assert_eq!(parsed.path(), "/ns/prod/web");
    assert!(!parsed.is_empty());
}

#[test]
fn rejects_missing_components() {
    assert!(matches!(
        IdentityCredential::parse("/server"),
        Err(CredentialError::MissingTrustDomain(_))
    ));
    assert!(matches!(
        IdentityCredential::parse("example.org"),
        Err(CredentialError::MissingPath(_))
    ));
    assert!(matches!(
        IdentityCredential::parse("example.org/"),
        Err(CredentialError::MissingPath(_))
    ));
}

#[test]
fn rejects_traversal_and_illegal_characters() {
    match IdentityCredential::parse("example.org/a/../b") {
        Err(CredentialError::InvalidPathSegment { segment, .. }) => assert_eq!(segment, ".."),
        other => panic!("expected invalid segment, got {other:?}"),
    }
    assert!(matches!(
        IdentityCredential::parse("example.org/a b"),
        Err(CredentialError::InvalidPathSegment { .. })
    ));
    assert!(matches!(
        IdentityCredential::parse("exa mple.org/a"),
        Err(CredentialError::InvalidTrustDomain(_))
    ));
}

#[test]
fn serde_round_trips_through_uri() {
    let original = credential("example.org/server");
    let encoded = match serde_json::to_string(&original) {
        Ok(encoded) => encoded,
        Err(err) => panic!("credential should serialize: {err}"),
    };
    assert_eq!(encoded, "\"spiffe://example.org/server\"");
    let decoded: IdentityCredential = match serde_json::from_str(&encoded) {
        Ok(decoded) => decoded,
        Err(err) => panic!("credential should deserialize: {err}"),
    };
    assert_eq!(decoded, original);
}
