//! Issuance engine, agent role: attest → match → issue.
//!
//! The pipeline runs synchronously inside one request context. Any stage
//! failing aborts the whole call with that stage's error; there are no
//! partial results. Cancellation and the request deadline are checked at
//! every stage boundary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::attestor::{AttestError, Attestor};
use crate::error::ErrorKind;
use crate::extractor::ExtractError;
use crate::identity::{IdentityDocument, ProcessIdentity};
use crate::issuance::{IssuanceError, IssuanceServer};
use crate::registry::{MapperRegistry, RegistryError, RegistryState};

/// Failure of a whole fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Kernel credential extraction failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Attestation failed.
    #[error(transparent)]
    Attest(#[from] AttestError),

    /// Matching failed.
    #[error(transparent)]
    Match(#[from] RegistryError),

    /// Issuance failed.
    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    /// The request was cancelled.
    #[error("request cancelled before {stage}")]
    Cancelled {
        /// Stage that did not start.
        stage: &'static str,
    },

    /// The request deadline passed.
    #[error("request deadline exceeded before {stage}")]
    DeadlineExceeded {
        /// Stage that did not start.
        stage: &'static str,
    },

    /// The blocking worker died.
    #[error("pipeline worker failed: {0}")]
    Worker(String),
}

impl FetchError {
    /// Classification for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Extract(e) => e.kind(),
            Self::Attest(e) => e.kind(),
            Self::Match(e) => e.kind(),
            Self::Issuance(e) => e.kind(),
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Worker(_) => ErrorKind::Internal,
        }
    }
}

/// Cancellation signal and deadline of the originating request.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl CallContext {
    /// Context bound to `cancel`, without a deadline.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// The cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail if the request is cancelled or out of time before `stage`.
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] or [`FetchError::DeadlineExceeded`].
    pub fn check(&self, stage: &'static str) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled { stage });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(FetchError::DeadlineExceeded { stage });
        }
        Ok(())
    }
}

/// Agent role. Holds the sealed registry and the shared issuance server.
pub struct Agent {
    attestor: Arc<dyn Attestor>,
    registry: Arc<MapperRegistry>,
    server: Arc<IssuanceServer>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("mappers", &self.registry.len())
            .field("server", &self.server)
            .finish()
    }
}

impl Agent {
    /// Build an agent over a sealed registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotSealed`] if bootstrap has not sealed it.
    pub fn new(
        attestor: Arc<dyn Attestor>,
        registry: Arc<MapperRegistry>,
        server: Arc<IssuanceServer>,
    ) -> Result<Self, RegistryError> {
        if registry.state() != RegistryState::Sealed {
            return Err(RegistryError::NotSealed);
        }
        Ok(Self {
            attestor,
            registry,
            server,
        })
    }

    /// The shared issuance server.
    pub fn server(&self) -> &Arc<IssuanceServer> {
        &self.server
    }

    /// Fetch an identity document for a kernel-verified workload.
    ///
    /// # Errors
    ///
    /// The first failing stage's error, or a cancellation/deadline error.
    pub fn fetch_identity_document(
        &self,
        ctx: &CallContext,
        workload: &ProcessIdentity,
    ) -> Result<IdentityDocument, FetchError> {
        ctx.check("attestation")?;
        let selectors = self.attestor.attest(workload)?;

        ctx.check("matching")?;
        let mapper = match self.registry.find_matching_mapper(&selectors) {
            Ok(mapper) => mapper,
            Err(e) => {
                debug!(pid = workload.pid(), uid = workload.uid(), selectors = %selectors, "no mapper for attested workload");
                return Err(e.into());
            }
        };

        ctx.check("issuance")?;
        let document = self.server.issue_identity(mapper.credential())?;

        info!(
            pid = workload.pid(),
            uid = workload.uid(),
            credential = %document.credential(),
            serial = %document.serial(),
            expires_at = %document.expires_at(),
            "identity document issued"
        );
        Ok(document)
    }
}
