//! Identity data model: process identities, selectors, credentials and
//! issued documents.

use std::path::{Path, PathBuf};

pub mod credential;
pub mod document;
pub mod selector;

pub use credential::{CredentialError, IdentityCredential};
pub use document::{DocumentError, IdentityDocument};
pub use selector::{Selector, SelectorError, SelectorSet};

/// A kernel-reported identity failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid process identity: {0}")]
pub struct InvalidProcessIdentity(pub String);

/// Kernel-verified attributes of a connected process.
///
/// Captured once per connection and never mutated. Only values produced by
/// [`crate::extractor::CredentialExtractor`] should be trusted for issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pid: i32,
    uid: u32,
    gid: u32,
    executable_path: PathBuf,
}

impl ProcessIdentity {
    /// Build an identity from raw attributes.
    pub fn new(pid: i32, uid: u32, gid: u32, executable_path: PathBuf) -> Self {
        Self {
            pid,
            uid,
            gid,
            executable_path,
        }
    }

    /// Process id.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Effective user id.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Effective group id.
    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Resolved executable path. Empty when not resolved.
    pub fn executable_path(&self) -> &Path {
        &self.executable_path
    }

    /// Check the invariants the kernel guarantees for a live peer.
    ///
    /// UID and GID are unsigned and need no sign check.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidProcessIdentity`] when the pid is not positive.
    pub fn validate(&self) -> Result<(), InvalidProcessIdentity> {
        if self.pid <= 0 {
            return Err(InvalidProcessIdentity(format!(
                "pid must be positive, got {}",
                self.pid
            )));
        }
        Ok(())
    }
}
