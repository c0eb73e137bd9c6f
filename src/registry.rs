//! Identity mapper registry with a one-way Open → Sealed lifecycle.
//!
//! While open, bootstrap seeds mappers through a mutex. [`MapperRegistry::seal`]
//! moves them into an immutable `Arc<[IdentityMapper]>` held in a `OnceLock`,
//! so every lookup after sealing is lock-free.
//!
//! Matching: a mapper qualifies when all of its selectors are present in the
//! candidate set. The qualifying mapper with the most selectors wins; ties go
//! to the one inserted first.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::info;

use crate::error::ErrorKind;
use crate::identity::{IdentityCredential, SelectorSet};

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Write or second seal after sealing.
    #[error("identity mapper registry is sealed")]
    Sealed,

    /// Mapper or candidate set without selectors.
    #[error("selector set is empty")]
    EmptySelectorSet,

    /// A mapper with the same selector set already exists.
    #[error("a mapper for the same selector set already maps to {existing}")]
    DuplicateMapper {
        /// Credential of the mapper already registered.
        existing: String,
    },

    /// No mapper's selectors are satisfied.
    #[error("no identity mapper matches the workload")]
    NoMatchingMapper,

    /// Serving was attempted before bootstrap sealed the registry.
    #[error("identity mapper registry has not been sealed")]
    NotSealed,
}

impl RegistryError {
    /// Classification for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sealed => ErrorKind::RegistrySealed,
            Self::EmptySelectorSet => ErrorKind::AttestationFailed,
            Self::DuplicateMapper { .. } => ErrorKind::InvalidConfiguration,
            Self::NoMatchingMapper => ErrorKind::NoMatchingMapper,
            Self::NotSealed => ErrorKind::RegistryNotSealed,
        }
    }
}

/// A registration entry binding a selector set to a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMapper {
    credential: IdentityCredential,
    selectors: SelectorSet,
}

impl IdentityMapper {
    /// Bind `selectors` to `credential`.
    pub fn new(credential: IdentityCredential, selectors: SelectorSet) -> Self {
        Self {
            credential,
            selectors,
        }
    }

    /// Credential issued on match.
    pub fn credential(&self) -> &IdentityCredential {
        &self.credential
    }

    /// Selectors a workload must present.
    pub fn selectors(&self) -> &SelectorSet {
        &self.selectors
    }

    /// Whether `candidates` satisfies every required selector.
    pub fn matches(&self, candidates: &SelectorSet) -> bool {
        !self.selectors.is_empty() && self.selectors.is_subset(candidates)
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// Accepting `create_mapper`.
    Open,
    /// Read-only.
    Sealed,
}

/// Owned registry, passed explicitly to bootstrap and the agent.
#[derive(Debug, Default)]
pub struct MapperRegistry {
    staging: Mutex<Vec<IdentityMapper>>,
    sealed: OnceLock<Arc<[IdentityMapper]>>,
}

impl MapperRegistry {
    /// An open, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RegistryState {
        if self.sealed.get().is_some() {
            RegistryState::Sealed
        } else {
            RegistryState::Open
        }
    }

    /// Insert a mapper while open.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Sealed`] after sealing, [`RegistryError::EmptySelectorSet`]
    /// for a mapper without selectors, [`RegistryError::DuplicateMapper`] when
    /// the exact selector set is already registered.
    pub fn create_mapper(&self, mapper: IdentityMapper) -> Result<(), RegistryError> {
        let mut staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
        if self.sealed.get().is_some() {
            return Err(RegistryError::Sealed);
        }
        if mapper.selectors.is_empty() {
            return Err(RegistryError::EmptySelectorSet);
        }
        if let Some(existing) = staging.iter().find(|m| m.selectors == mapper.selectors) {
            return Err(RegistryError::DuplicateMapper {
                existing: existing.credential.to_string(),
            });
        }
        staging.push(mapper);
        Ok(())
    }

    /// Seal the registry. Returns the number of mappers frozen.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Sealed`] if already sealed.
    pub fn seal(&self) -> Result<usize, RegistryError> {
        let mut staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
        if self.sealed.get().is_some() {
            return Err(RegistryError::Sealed);
        }
        let snapshot: Arc<[IdentityMapper]> = std::mem::take(&mut *staging).into();
        let count = snapshot.len();
        self.sealed
            .set(snapshot)
            .map_err(|_| RegistryError::Sealed)?;
        info!(mappers = count, "identity mapper registry sealed");
        Ok(count)
    }

    /// Find the mapper authorizing `candidates`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::EmptySelectorSet`] for an empty candidate set,
    /// [`RegistryError::NoMatchingMapper`] when nothing qualifies.
    pub fn find_matching_mapper(
        &self,
        candidates: &SelectorSet,
    ) -> Result<IdentityMapper, RegistryError> {
        if candidates.is_empty() {
            return Err(RegistryError::EmptySelectorSet);
        }
        let found = match self.sealed.get() {
            Some(mappers) => best_match(mappers, candidates),
            None => {
                let staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
                best_match(&staging, candidates)
            }
        };
        found.ok_or(RegistryError::NoMatchingMapper)
    }

    /// All mappers in insertion order.
    pub fn list_mappers(&self) -> Vec<IdentityMapper> {
        match self.sealed.get() {
            Some(mappers) => mappers.to_vec(),
            None => self
                .staging
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Number of mappers.
    pub fn len(&self) -> usize {
        match self.sealed.get() {
            Some(mappers) => mappers.len(),
            None => self
                .staging
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    /// Whether no mappers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn best_match(mappers: &[IdentityMapper], candidates: &SelectorSet) -> Option<IdentityMapper> {
    let mut best: Option<&IdentityMapper> = None;
    for mapper in mappers.iter().filter(|m| m.matches(candidates)) {
        // Strictly greater keeps the earlier mapper on ties.
        if best.map_or(true, |b| mapper.selectors.len() > b.selectors.len()) {
            best = Some(mapper);
        }
    }
    best.cloned()
}
