//! Agent role: attest, match, issue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use latchkey::agent::{Agent, CallContext, FetchError};
use latchkey::attestor::{AttestError, UnixAttestor};
use latchkey::bootstrap;
use latchkey::config::WorkloadConfig;
use latchkey::error::ErrorKind;
use latchkey::issuance::{IssuanceError, IssuanceServer};
use latchkey::registry::{IdentityMapper, MapperRegistry, RegistryError};

use super::{authority, credential, selector, selectors, workload};

fn server_agent() -> Agent {
    let workloads = vec![WorkloadConfig {
        uid: 1001,
        selector: "role:server".to_owned(),
        credential: "example.org/server".to_owned(),
        selectors: Vec::new(),
    }];
    let (attestor, registry) = match bootstrap::bootstrap(&workloads) {
        Ok(pair) => pair,
        Err(err) => panic!("bootstrap should succeed: {err}"),
    };
    let issuance = Arc::new(IssuanceServer::local(authority(3600)));
    match Agent::new(Arc::new(attestor), Arc::new(registry), issuance) {
        Ok(agent) => agent,
        Err(err) => panic!("agent should build over a sealed registry: {err}"),
    }
}

#[test]
fn registered_workload_receives_valid_document() {
    let agent = server_agent();

    let document = match agent.fetch_identity_document(&CallContext::default(), &workload(1001)) {
        Ok(document) => document,
        Err(err) => panic!("fetch should succeed: {err}"),
    };
    assert_eq!(document.credential(), &credential("example.org/server"));
    assert!(document.is_valid());
}

#[test]
fn unregistered_workload_is_refused() {
    let agent = server_agent();

    match agent.fetch_identity_document(&CallContext::default(), &workload(9999)) {
        Err(err @ FetchError::Attest(AttestError::AttestationFailed { uid: 9999 })) => {
            assert_eq!(err.kind(), ErrorKind::AttestationFailed);
            assert!(!err.kind().is_retryable());
        }
        other => panic!("expected attestation failure, got {other:?}"),
    }
}

#[test]
fn attested_but_unmapped_workload_is_refused() {
    let mut attestor = UnixAttestor::new();
    if let Err(err) = attestor.register_uid(1001, selector("role:server")) {
        panic!("registration should succeed: {err}");
    }
    let registry = MapperRegistry::new();
    let mapper = IdentityMapper::new(
        credential("example.org/prod"),
        selectors(&["role:server", "env:prod"]),
    );
    if let Err(err) = registry.create_mapper(mapper) {
        panic!("mapper should be accepted: {err}");
    }
    if let Err(err) = registry.seal() {
        panic!("seal should succeed: {err}");
    }
    let issuance = Arc::new(IssuanceServer::local(authority(60)));
    let agent = match Agent::new(Arc::new(attestor), Arc::new(registry), issuance) {
        Ok(agent) => agent,
        Err(err) => panic!("agent should build: {err}"),
    };

    match agent.fetch_identity_document(&CallContext::default(), &workload(1001)) {
        Err(err @ FetchError::Match(RegistryError::NoMatchingMapper)) => {
            assert_eq!(err.kind(), ErrorKind::NoMatchingMapper);
        }
        other => panic!("expected no matching mapper, got {other:?}"),
    }
}

#[test]
fn open_registry_cannot_serve() {
    let issuance = Arc::new(IssuanceServer::local(authority(60)));
    let result = Agent::new(
        Arc::new(UnixAttestor::new()),
        Arc::new(MapperRegistry::new()),
        issuance,
    );
    match result {
        Err(err @ RegistryError::NotSealed) => {
            assert_eq!(err.kind(), ErrorKind::RegistryNotSealed);
        }
        other => panic!("expected unsealed registry error, got {other:?}"),
    }
}

#[test]
fn cancelled_request_stops_before_attestation() {
    let agent = server_agent();
    let token = CancellationToken::new();
    token.cancel();

    match agent.fetch_identity_document(&CallContext::new(token), &workload(1001)) {
        Err(err @ FetchError::Cancelled { stage: "attestation" }) => {
            assert_eq!(err.kind(), ErrorKind::Cancelled);
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
}

#[test]
fn expired_deadline_is_reported() {
    let agent = server_agent();
    let ctx = CallContext::default().with_deadline(Instant::now());

    match agent.fetch_identity_document(&ctx, &workload(1001)) {
        Err(err @ FetchError::DeadlineExceeded { .. }) => {
            assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
            assert!(err.kind().is_retryable());
        }
        other => panic!("expected deadline error, got {other:?}"),
    }
}

#[test]
fn generous_timeout_does_not_interfere() {
    let agent = server_agent();
    let ctx = CallContext::default().with_timeout(Duration::from_secs(30));
    assert!(agent.fetch_identity_document(&ctx, &workload(1001)).is_ok());
}

#[test]
fn closed_issuance_server_fails_fetch() {
    let agent = server_agent();
    assert!(agent.server().close());

    match agent.fetch_identity_document(&CallContext::default(), &workload(1001)) {
        Err(err @ FetchError::Issuance(IssuanceError::Closed)) => {
            assert_eq!(err.kind(), ErrorKind::IssuanceFailed);
        }
        other => panic!("expected closed issuance, got {other:?}"),
    }
}

#[test]
fn concurrent_fetches_get_distinct_documents() {
    let agent = Arc::new(server_agent());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let agent = Arc::clone(&agent);
            std::thread::spawn(move || {
                agent
                    .fetch_identity_document(&CallContext::default(), &workload(1001))
                    .map(|d| d.serial().to_owned())
            })
        })
        .collect();

    let mut serials = HashSet::new();
    for handle in handles {
        match handle.join() {
            Ok(Ok(serial)) => {
                serials.insert(serial);
            }
            Ok(Err(err)) => panic!("concurrent fetch failed: {err}"),
            Err(_) => panic!("fetch thread panicked"),
        }
    }
    assert_eq!(serials.len(), 8);
}
