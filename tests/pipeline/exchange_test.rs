//! Authenticated exchange with expiry checks on both ends.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};

use latchkey::error::ErrorKind;
use latchkey::exchange::{self, ExchangeError, Presentation, Side};
use latchkey::identity::IdentityDocument;
use latchkey::issuance::{IssuanceServer, LocalAuthority};

use super::{authority, credential, FixedClock};

fn issue(authority: &LocalAuthority, cred: &str) -> IdentityDocument {
    match authority.issue(&credential(cred)) {
        Ok(document) => document,
        Err(err) => panic!("issuance should succeed: {err}"),
    }
}

/// Authority whose clock sits two hours in the past, so one-hour documents
/// expired an hour ago.
fn backdated_authority() -> LocalAuthority {
    authority(3600).with_clock(Arc::new(FixedClock(Utc::now() - TimeDelta::hours(2))))
}

#[test]
fn valid_identity_is_accepted() {
    let authority = authority(3600);
    let document = issue(&authority, "example.org/server");
    let now = Utc::now();

    let presentation = match exchange::present(&document, now) {
        Ok(presentation) => presentation,
        Err(err) => panic!("sender should present a fresh identity: {err}"),
    };
    let peer = match exchange::accept(
        &presentation,
        &authority,
        Some(&credential("example.org/server")),
        now,
    ) {
        Ok(peer) => peer,
        Err(err) => panic!("receiver should accept: {err}"),
    };
    assert_eq!(peer.credential, credential("example.org/server"));
    assert_eq!(peer.serial, document.serial());
    assert_eq!(peer.expires_at, document.expires_at());
}

#[test]
fn expired_identity_is_not_presented() {
    let document = issue(&backdated_authority(), "example.org/server");
    assert!(!document.is_valid());

    match exchange::present(&document, Utc::now()) {
        Err(err @ ExchangeError::ExpiredIdentity { side: Side::Sender, .. }) => {
            assert_eq!(err.kind(), ErrorKind::DocumentExpired);
        }
        other => panic!("expected sender-side expiry, got {other:?}"),
    }
}

#[test]
fn receiver_rejects_expired_identity_on_its_own() {
    let authority = backdated_authority();
    let document = issue(&authority, "example.org/server");
    let expires_at = document.expires_at();
    let presentation = Presentation::from_document(document);

    match exchange::accept(&presentation, &authority, None, Utc::now()) {
        Err(ExchangeError::ExpiredIdentity {
            side: Side::Receiver,
            credential,
            expired_at,
        }) => {
            assert_eq!(credential, "spiffe://example.org/server");
            assert_eq!(expired_at, expires_at);
        }
        other => panic!("expected receiver-side expiry, got {other:?}"),
    }
}

#[test]
fn forged_identity_is_invalid() {
    let forged = issue(&authority(3600), "example.org/server");
    let verifier = authority(3600);

    match exchange::accept(
        &Presentation::from_document(forged),
        &verifier,
        None,
        Utc::now(),
    ) {
        Err(err @ ExchangeError::InvalidIdentity { side: Side::Receiver, .. }) => {
            assert_eq!(err.kind(), ErrorKind::DocumentInvalid);
        }
        other => panic!("expected invalid identity, got {other:?}"),
    }
}

#[test]
fn wrong_peer_is_rejected() {
    let authority = authority(3600);
    let document = issue(&authority, "example.org/db");

    let result = exchange::accept(
        &Presentation::from_document(document),
        &authority,
        Some(&credential("example.org/server")),
        Utc::now(),
    );
    assert!(matches!(result, Err(ExchangeError::UnexpectedPeer { .. })));
}

#[test]
fn issuance_server_verifies_its_own_documents() {
    let server = IssuanceServer::local(authority(3600));
    let document = match server.issue_identity(&credential("example.org/server")) {
        Ok(document) => document,
        Err(err) => panic!("issuance should succeed: {err}"),
    };

    let accepted = exchange::accept(
        &Presentation::from_document(document),
        &server,
        None,
        Utc::now(),
    );
    assert!(accepted.is_ok());
}
