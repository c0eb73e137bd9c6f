//! Attestation: kernel-verified process identity to selector set.
//!
//! The reference [`UnixAttestor`] is single-strategy: one selector
//! registered per UID, plus selectors derived from the process itself.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::ErrorKind;
use crate::identity::{ProcessIdentity, Selector, SelectorSet};

/// Attestation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttestError {
    /// The identity failed validation before lookup.
    #[error("invalid process identity: {0}")]
    InvalidProcessIdentity(String),

    /// No selector is registered for the workload's UID.
    #[error("no attestation policy for uid {uid}")]
    AttestationFailed {
        /// Workload uid.
        uid: u32,
    },

    /// Attestation produced nothing to match on.
    #[error("attestation of uid {uid} produced an empty selector set")]
    EmptySelectorSet {
        /// Workload uid.
        uid: u32,
    },

    /// Bootstrap tried to register a second selector for a UID.
    #[error("uid {uid} already has a registered selector")]
    UidAlreadyRegistered {
        /// Conflicting uid.
        uid: u32,
    },
}

impl AttestError {
    /// Classification for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidProcessIdentity(_) => ErrorKind::InvalidProcessIdentity,
            Self::AttestationFailed { .. } | Self::EmptySelectorSet { .. } => {
                ErrorKind::AttestationFailed
            }
            Self::UidAlreadyRegistered { .. } => ErrorKind::InvalidConfiguration,
        }
    }
}

/// Derives a selector set from a process identity.
pub trait Attestor: Send + Sync {
    /// Deterministically attest `workload`.
    ///
    /// # Errors
    ///
    /// Returns an [`AttestError`]; an empty result is always an error.
    fn attest(&self, workload: &ProcessIdentity) -> Result<SelectorSet, AttestError>;
}

/// UID-table attestor.
///
/// Populated during bootstrap through `&mut self`, then shared immutably.
#[derive(Debug, Clone, Default)]
pub struct UnixAttestor {
    by_uid: BTreeMap<u32, Selector>,
}

impl UnixAttestor {
    /// An attestor with no registered UIDs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the selector granted to `uid`.
    ///
    /// # Errors
    ///
    /// Returns [`AttestError::UidAlreadyRegistered`] if `uid` is taken.
    pub fn register_uid(&mut self, uid: u32, selector: Selector) -> Result<(), AttestError> {
        if self.by_uid.contains_key(&uid) {
            return Err(AttestError::UidAlreadyRegistered { uid });
        }
        self.by_uid.insert(uid, selector);
        Ok(())
    }

    /// Whether `uid` already has a selector.
    pub fn is_registered(&self, uid: u32) -> bool {
        self.by_uid.contains_key(&uid)
    }

    /// Number of registered UIDs.
    pub fn registered_count(&self) -> usize {
        self.by_uid.len()
    }
}

impl Attestor for UnixAttestor {
    fn attest(&self, workload: &ProcessIdentity) -> Result<SelectorSet, AttestError> {
        workload
            .validate()
            .map_err(|e| AttestError::InvalidProcessIdentity(e.0))?;

        let uid = workload.uid();
        let registered = self
            .by_uid
            .get(&uid)
            .ok_or(AttestError::AttestationFailed { uid })?;

        let mut selectors = SelectorSet::new();
        selectors.insert(registered.clone());
        selectors.insert(Selector::unix_uid(uid));
        selectors.insert(Selector::unix_gid(workload.gid()));
        if !workload.executable_path().as_os_str().is_empty() {
            selectors.insert(Selector::unix_path(workload.executable_path()));
        }

        if selectors.is_empty() {
            return Err(AttestError::EmptySelectorSet { uid });
        }
        debug!(pid = workload.pid(), uid, count = selectors.len(), "workload attested");
        Ok(selectors)
    }
}
