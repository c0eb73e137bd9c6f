//! Bootstrap seeding: configured workloads into the attestor and registry,
//! followed by exactly one seal.
//!
//! Each workload `(uid, selector, credential)` registers `selector` for
//! `uid` with the attestor and a mapper requiring `{selector, unix:uid:<uid>}`
//! (plus any extra selectors) for `credential`.

use std::collections::BTreeSet;

use tracing::info;

use crate::attestor::{AttestError, UnixAttestor};
use crate::config::WorkloadConfig;
use crate::error::ErrorKind;
use crate::identity::{CredentialError, IdentityCredential, Selector, SelectorError, SelectorSet};
use crate::registry::{IdentityMapper, MapperRegistry, RegistryError, RegistryState};

/// Bootstrap failures.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// A workload selector did not parse.
    #[error("workload uid {uid}: {source}")]
    Selector {
        /// Workload uid.
        uid: u32,
        /// Parse failure.
        #[source]
        source: SelectorError,
    },

    /// A workload credential did not parse.
    #[error("workload uid {uid}: {source}")]
    Credential {
        /// Workload uid.
        uid: u32,
        /// Parse failure.
        #[source]
        source: CredentialError,
    },

    /// Attestor registration failed.
    #[error(transparent)]
    Attestor(#[from] AttestError),

    /// Registry write or seal failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl BootstrapError {
    /// Classification for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Selector { .. } | Self::Credential { .. } => ErrorKind::InvalidConfiguration,
            Self::Attestor(e) => e.kind(),
            Self::Registry(e) => e.kind(),
        }
    }
}

/// A parsed workload registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEntry {
    /// Workload uid.
    pub uid: u32,
    /// Selector the attestor grants to `uid`.
    pub selector: Selector,
    /// Identity issued to the workload.
    pub credential: IdentityCredential,
    /// Additional selectors the mapper requires.
    pub extra_selectors: Vec<Selector>,
}

impl WorkloadEntry {
    /// Parse a configured workload.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Selector`] or [`BootstrapError::Credential`].
    pub fn from_config(config: &WorkloadConfig) -> Result<Self, BootstrapError> {
        let uid = config.uid;
        let selector = Selector::parse(&config.selector)
            .map_err(|source| BootstrapError::Selector { uid, source })?;
        let credential = IdentityCredential::parse(&config.credential)
            .map_err(|source| BootstrapError::Credential { uid, source })?;
        let extra_selectors = config
            .selectors
            .iter()
            .map(|raw| Selector::parse(raw).map_err(|source| BootstrapError::Selector { uid, source }))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            uid,
            selector,
            credential,
            extra_selectors,
        })
    }

    /// The selector set the mapper for this entry requires.
    pub fn mapper_selectors(&self) -> SelectorSet {
        let mut selectors: SelectorSet = [self.selector.clone(), Selector::unix_uid(self.uid)]
            .into_iter()
            .collect();
        selectors.extend(self.extra_selectors.iter().cloned());
        selectors
    }
}

/// Seed `entries` and seal `registry`. Returns the sealed mapper count.
///
/// Every entry is checked before the first write, so a rejected batch
/// leaves both the attestor and the registry untouched.
///
/// # Errors
///
/// [`RegistryError::Sealed`] for a sealed registry,
/// [`AttestError::UidAlreadyRegistered`] for a uid seen twice, and
/// [`RegistryError::DuplicateMapper`] for a repeated selector set.
pub fn seed(
    entries: &[WorkloadEntry],
    attestor: &mut UnixAttestor,
    registry: &MapperRegistry,
) -> Result<usize, BootstrapError> {
    check_entries(entries, attestor, registry)?;
    for entry in entries {
        registry.create_mapper(IdentityMapper::new(
            entry.credential.clone(),
            entry.mapper_selectors(),
        ))?;
        attestor.register_uid(entry.uid, entry.selector.clone())?;
        info!(uid = entry.uid, credential = %entry.credential, "workload registered");
    }
    Ok(registry.seal()?)
}

fn check_entries(
    entries: &[WorkloadEntry],
    attestor: &UnixAttestor,
    registry: &MapperRegistry,
) -> Result<(), BootstrapError> {
    if registry.state() == RegistryState::Sealed {
        return Err(RegistryError::Sealed.into());
    }
    let mut uids = BTreeSet::new();
    let mut mappers = registry.list_mappers();
    for entry in entries {
        if attestor.is_registered(entry.uid) || !uids.insert(entry.uid) {
            return Err(AttestError::UidAlreadyRegistered { uid: entry.uid }.into());
        }
        let selectors = entry.mapper_selectors();
        if let Some(existing) = mappers.iter().find(|m| m.selectors() == &selectors) {
            return Err(RegistryError::DuplicateMapper {
                existing: existing.credential().to_string(),
            }
            .into());
        }
        mappers.push(IdentityMapper::new(entry.credential.clone(), selectors));
    }
    Ok(())
}

/// Parse configured workloads and build a sealed registry and attestor.
///
/// # Errors
///
/// Any parse, registration, or seal error.
pub fn bootstrap(
    workloads: &[WorkloadConfig],
) -> Result<(UnixAttestor, MapperRegistry), BootstrapError> {
    let entries = workloads
        .iter()
        .map(WorkloadEntry::from_config)
        .collect::<Result<Vec<_>, _>>()?;
    let mut attestor = UnixAttestor::new();
    let registry = MapperRegistry::new();
    seed(&entries, &mut attestor, &registry)?;
    Ok((attestor, registry))
}
