//! Seeding the attestor and registry from configured workloads.

use latchkey::attestor::{AttestError, Attestor, UnixAttestor};
use latchkey::bootstrap::{self, BootstrapError, WorkloadEntry};
use latchkey::config::WorkloadConfig;
use latchkey::error::ErrorKind;
use latchkey::identity::Selector;
use latchkey::registry::{IdentityMapper, MapperRegistry, RegistryError, RegistryState};

use super::{selector, workload};

fn config(uid: u32, sel: &str, cred: &str) -> WorkloadConfig {
    WorkloadConfig {
        uid,
        selector: sel.to_owned(),
        credential: cred.to_owned(),
        selectors: Vec::new(),
    }
}

fn entry(uid: u32, sel: &str, cred: &str) -> WorkloadEntry {
    match WorkloadEntry::from_config(&config(uid, sel, cred)) {
        Ok(entry) => entry,
        Err(err) => panic!("entry should parse: {err}"),
    }
}

#[test]
fn bootstrap_seeds_and_seals() {
    let workloads = vec![
        config(1001, "role:server", "example.org/server"),
        config(1002, "role:db", "example.org/db"),
    ];
    let (attestor, registry) = match bootstrap::bootstrap(&workloads) {
        Ok(pair) => pair,
        Err(err) => panic!("bootstrap should succeed: {err}"),
    };

    assert_eq!(registry.state(), RegistryState::Sealed);
    assert_eq!(registry.len(), 2);
    assert_eq!(attestor.registered_count(), 2);

    let attested = match attestor.attest(&workload(1002)) {
        Ok(set) => set,
        Err(err) => panic!("attestation should succeed: {err}"),
    };
    let mapper = registry.find_matching_mapper(&attested);
    assert!(matches!(mapper, Ok(ref m) if m.credential().path() == "/db"));
}

#[test]
fn mapper_requires_selector_and_uid() {
    let seeded = entry(1001, "role:server", "example.org/server");
    let required = seeded.mapper_selectors();
    assert_eq!(required.len(), 2);
    assert!(required.contains(&selector("role:server")));
    assert!(required.contains(&Selector::unix_uid(1001)));
}

#[test]
fn extra_selectors_narrow_the_mapper() {
    let mut narrowed = config(1001, "role:server", "example.org/server");
    narrowed.selectors = vec!["unix:path:/opt/app/bin/server".to_owned()];
    let (attestor, registry) = match bootstrap::bootstrap(&[narrowed]) {
        Ok(pair) => pair,
        Err(err) => panic!("bootstrap should succeed: {err}"),
    };

    let attested = match attestor.attest(&workload(1001)) {
        Ok(set) => set,
        Err(err) => panic!("attestation should succeed: {err}"),
    };
    assert!(registry.find_matching_mapper(&attested).is_ok());

    let elsewhere = latchkey::identity::ProcessIdentity::new(
        7,
        1001,
        1001,
        std::path::PathBuf::from("/tmp/impostor"),
    );
    let attested = match attestor.attest(&elsewhere) {
        Ok(set) => set,
        Err(err) => panic!("attestation should succeed: {err}"),
    };
    assert_eq!(
        registry.find_matching_mapper(&attested),
        Err(RegistryError::NoMatchingMapper)
    );
}

#[test]
fn malformed_workloads_are_configuration_errors() {
    match WorkloadEntry::from_config(&config(1, "no-namespace", "example.org/a")) {
        Err(err @ BootstrapError::Selector { uid: 1, .. }) => {
            assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        }
        other => panic!("expected selector error, got {other:?}"),
    }
    match WorkloadEntry::from_config(&config(2, "role:a", "example.org")) {
        Err(err @ BootstrapError::Credential { uid: 2, .. }) => {
            assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        }
        other => panic!("expected credential error, got {other:?}"),
    }
}

#[test]
fn duplicate_uid_aborts_bootstrap() {
    let workloads = vec![
        config(1001, "role:server", "example.org/server"),
        config(1001, "role:other", "example.org/other"),
    ];
    match bootstrap::bootstrap(&workloads) {
        Err(err @ BootstrapError::Attestor(_)) => {
            assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        }
        other => panic!("expected duplicate uid error, got {other:?}"),
    }
}

#[test]
fn second_seed_hits_sealed_registry() {
    let entries = vec![entry(1001, "role:server", "example.org/server")];
    let mut attestor = UnixAttestor::new();
    let registry = MapperRegistry::new();

    assert!(matches!(
        bootstrap::seed(&entries, &mut attestor, &registry),
        Ok(1)
    ));

    let late = vec![entry(1002, "role:db", "example.org/db")];
    match bootstrap::seed(&late, &mut attestor, &registry) {
        Err(err @ BootstrapError::Registry(RegistryError::Sealed)) => {
            assert_eq!(err.kind(), ErrorKind::RegistrySealed);
        }
        other => panic!("expected sealed registry, got {other:?}"),
    }
    assert_eq!(registry.len(), 1);
    assert_eq!(attestor.registered_count(), 1);
}

#[test]
fn rejected_batch_leaves_nothing_behind() {
    let entries = vec![
        entry(1001, "role:server", "example.org/server"),
        entry(1002, "role:db", "example.org/db"),
        entry(1001, "role:other", "example.org/other"),
    ];
    let mut attestor = UnixAttestor::new();
    let registry = MapperRegistry::new();

    match bootstrap::seed(&entries, &mut attestor, &registry) {
        Err(BootstrapError::Attestor(AttestError::UidAlreadyRegistered { uid: 1001 })) => {}
        other => panic!("expected duplicate uid error, got {other:?}"),
    }
    assert_eq!(registry.state(), RegistryState::Open);
    assert_eq!(registry.len(), 0);
    assert_eq!(attestor.registered_count(), 0);

    // The same registry still accepts a corrected batch.
    let fixed = vec![entry(1001, "role:server", "example.org/server")];
    assert!(matches!(
        bootstrap::seed(&fixed, &mut attestor, &registry),
        Ok(1)
    ));
}

#[test]
fn selector_set_already_staged_is_rejected_before_any_write() {
    let registry = MapperRegistry::new();
    let staged = entry(1001, "role:server", "example.org/server");
    if let Err(err) = registry.create_mapper(IdentityMapper::new(
        staged.credential.clone(),
        staged.mapper_selectors(),
    )) {
        panic!("mapper should be staged: {err}");
    }

    let entries = vec![
        entry(1002, "role:db", "example.org/db"),
        entry(1001, "role:server", "example.org/again"),
    ];
    let mut attestor = UnixAttestor::new();
    match bootstrap::seed(&entries, &mut attestor, &registry) {
        Err(BootstrapError::Registry(RegistryError::DuplicateMapper { existing })) => {
            assert_eq!(existing, "spiffe://example.org/server");
        }
        other => panic!("expected duplicate mapper error, got {other:?}"),
    }
    assert_eq!(registry.len(), 1);
    assert_eq!(attestor.registered_count(), 0);
}
