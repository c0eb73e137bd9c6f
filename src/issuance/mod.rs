//! Issuance engine, server role.
//!
//! The authority behind the server is chosen by configuration
//! ([`IssuanceMode`]) and held as the [`Authority`] enum:
//! - **Local**: an in-process [`LocalAuthority`] signs documents.
//! - **Upstream**: creation is delegated to an [`UpstreamAuthority`]; the
//!   server only validates what comes back.
//!
//! The server is shared by every connection and must be closed exactly
//! once at shutdown; only the first [`IssuanceServer::close`] reaches the
//! authority.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::ErrorKind;
use crate::identity::{DocumentError, IdentityCredential, IdentityDocument};

pub mod local;

pub use local::LocalAuthority;

/// Issuance-time failures.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// TTL is zero or overflows the expiry computation.
    #[error("invalid document ttl")]
    InvalidTtl,

    /// Claims serialization failed.
    #[error("failed to encode document claims: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The upstream authority reported a failure.
    #[error("upstream authority failed: {0}")]
    Upstream(String),

    /// Upstream issued a document for a different identity.
    #[error("upstream issued {issued} but {requested} was requested")]
    CredentialMismatch {
        /// Requested credential.
        requested: String,
        /// Credential on the returned document.
        issued: String,
    },

    /// The returned document failed validation.
    #[error("issued document rejected: {0}")]
    Rejected(#[from] DocumentError),

    /// The server has been shut down.
    #[error("issuance server is closed")]
    Closed,
}

impl IssuanceError {
    /// Classification for callers.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::IssuanceFailed
    }
}

/// Source of "now" for issuance and validation.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Verifies documents on behalf of a consumer.
pub trait DocumentVerifier: Send + Sync {
    /// Check that `document` is authentic, unexpired and names `expected`.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] describing the failure.
    fn validate_document(
        &self,
        document: &IdentityDocument,
        expected: &IdentityCredential,
    ) -> Result<(), DocumentError>;
}

impl DocumentVerifier for LocalAuthority {
    fn validate_document(
        &self,
        document: &IdentityDocument,
        expected: &IdentityCredential,
    ) -> Result<(), DocumentError> {
        self.validate(document, expected)
    }
}

/// An external identity authority session.
///
/// Shared by all concurrent callers; closed once at process shutdown.
pub trait UpstreamAuthority: Send + Sync {
    /// Create a document for `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::Upstream`] (or another variant) on failure.
    fn issue_identity(
        &self,
        credential: &IdentityCredential,
    ) -> Result<IdentityDocument, IssuanceError>;

    /// Optional authenticity check. Defaults to accepting.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] when the document is not acceptable.
    fn validate_document(
        &self,
        _document: &IdentityDocument,
        _expected: &IdentityCredential,
    ) -> Result<(), DocumentError> {
        Ok(())
    }

    /// Release the session.
    fn close(&self) {}
}

/// Configured issuance mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuanceMode {
    /// In-process signing.
    #[default]
    Local,
    /// Delegate to an external authority.
    Upstream,
}

/// The authority behind an [`IssuanceServer`].
pub enum Authority {
    /// In-process signing key.
    Local(LocalAuthority),
    /// External authority session.
    Upstream(Arc<dyn UpstreamAuthority>),
}

/// Server role: issues and validates identity documents.
pub struct IssuanceServer {
    authority: Authority,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl std::fmt::Debug for IssuanceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceServer")
            .field("mode", &self.mode())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl IssuanceServer {
    /// Server backed by a local authority.
    pub fn local(authority: LocalAuthority) -> Self {
        Self::with_authority(Authority::Local(authority))
    }

    /// Server delegating to an upstream authority.
    pub fn upstream(upstream: Arc<dyn UpstreamAuthority>) -> Self {
        Self::with_authority(Authority::Upstream(upstream))
    }

    fn with_authority(authority: Authority) -> Self {
        Self {
            authority,
            clock: Arc::new(SystemClock),
            closed: AtomicBool::new(false),
        }
    }

    /// Replace the clock used to check upstream documents.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mode of the configured authority.
    pub fn mode(&self) -> IssuanceMode {
        match self.authority {
            Authority::Local(_) => IssuanceMode::Local,
            Authority::Upstream(_) => IssuanceMode::Upstream,
        }
    }

    /// Issue a document for `credential`.
    ///
    /// Upstream documents must name the requested credential, be valid now,
    /// and pass the upstream's own validation.
    ///
    /// # Errors
    ///
    /// Any [`IssuanceError`]; [`IssuanceError::Closed`] after shutdown.
    pub fn issue_identity(
        &self,
        credential: &IdentityCredential,
    ) -> Result<IdentityDocument, IssuanceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IssuanceError::Closed);
        }
        match &self.authority {
            Authority::Local(local) => local.issue(credential),
            Authority::Upstream(upstream) => {
                let document = upstream.issue_identity(credential)?;
                if document.credential() != credential {
                    return Err(IssuanceError::CredentialMismatch {
                        requested: credential.to_string(),
                        issued: document.credential().to_string(),
                    });
                }
                document.ensure_valid_at(self.clock.now())?;
                upstream.validate_document(&document, credential)?;
                Ok(document)
            }
        }
    }

    /// Close the authority. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Authority::Upstream(upstream) = &self.authority {
            upstream.close();
        }
        info!(mode = ?self.mode(), "issuance authority closed");
        true
    }

    /// Whether [`Self::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl DocumentVerifier for IssuanceServer {
    fn validate_document(
        &self,
        document: &IdentityDocument,
        expected: &IdentityCredential,
    ) -> Result<(), DocumentError> {
        match &self.authority {
            Authority::Local(local) => local.validate(document, expected),
            Authority::Upstream(upstream) => {
                if document.credential() != expected {
                    return Err(DocumentError::Invalid(
                        "credential does not match expected identity".to_owned(),
                    ));
                }
                document.ensure_valid_at(self.clock.now())?;
                upstream.validate_document(document, expected)
            }
        }
    }
}
