//! Authenticated exchange between two workloads holding identity documents.
//!
//! Both ends check validity independently: the sender refuses to present an
//! expired identity of its own, and the receiver re-checks the presented
//! document and verifies it with a [`DocumentVerifier`] regardless of what
//! the sender did.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::ErrorKind;
use crate::identity::{DocumentError, IdentityCredential, IdentityDocument};
use crate::issuance::DocumentVerifier;

/// Which end of the exchange rejected the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The presenting workload, checking its own document.
    Sender,
    /// The accepting workload, checking the peer's document.
    Receiver,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => f.write_str("sender"),
            Self::Receiver => f.write_str("receiver"),
        }
    }
}

/// Exchange failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// The identity had expired.
    #[error("{side} rejected expired identity {credential} (expired at {expired_at})")]
    ExpiredIdentity {
        /// Rejecting end.
        side: Side,
        /// Identity on the document.
        credential: String,
        /// Its expiry.
        expired_at: DateTime<Utc>,
    },

    /// The identity failed verification.
    #[error("{side} rejected invalid identity: {reason}")]
    InvalidIdentity {
        /// Rejecting end.
        side: Side,
        /// Verification failure.
        reason: String,
    },

    /// Authentic, but not the peer the receiver wanted.
    #[error("expected peer {expected}, got {actual}")]
    UnexpectedPeer {
        /// Required identity.
        expected: String,
        /// Presented identity.
        actual: String,
    },
}

impl ExchangeError {
    /// Classification for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ExpiredIdentity { .. } => ErrorKind::DocumentExpired,
            Self::InvalidIdentity { .. } | Self::UnexpectedPeer { .. } => {
                ErrorKind::DocumentInvalid
            }
        }
    }

    fn from_document(side: Side, error: DocumentError) -> Self {
        match error {
            DocumentError::Expired {
                credential,
                expired_at,
            } => Self::ExpiredIdentity {
                side,
                credential,
                expired_at,
            },
            DocumentError::Invalid(reason) => Self::InvalidIdentity { side, reason },
        }
    }
}

/// What a sender transmits to its peer.
#[derive(Debug, Clone)]
pub struct Presentation {
    document: IdentityDocument,
}

impl Presentation {
    /// Wrap a document without the sender-side check, as a peer that skips
    /// it would.
    pub fn from_document(document: IdentityDocument) -> Self {
        Self { document }
    }

    /// The presented document.
    pub fn document(&self) -> &IdentityDocument {
        &self.document
    }
}

/// The authenticated peer, as accepted by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Verified identity.
    pub credential: IdentityCredential,
    /// Document serial.
    pub serial: String,
    /// Until when the peer is authenticated.
    pub expires_at: DateTime<Utc>,
}

/// Sender side: present `local` if it is valid at `now`.
///
/// # Errors
///
/// [`ExchangeError::ExpiredIdentity`] or [`ExchangeError::InvalidIdentity`]
/// with [`Side::Sender`].
pub fn present(local: &IdentityDocument, now: DateTime<Utc>) -> Result<Presentation, ExchangeError> {
    local.ensure_valid_at(now).map_err(|e| {
        warn!(credential = %local.credential(), error = %e, "refusing to present own identity");
        ExchangeError::from_document(Side::Sender, e)
    })?;
    Ok(Presentation::from_document(local.clone()))
}

/// Receiver side: validate the presented document at `now`, verify it, and
/// optionally require a specific peer identity.
///
/// # Errors
///
/// [`ExchangeError`] with [`Side::Receiver`], or
/// [`ExchangeError::UnexpectedPeer`].
pub fn accept(
    presentation: &Presentation,
    verifier: &dyn DocumentVerifier,
    expected: Option<&IdentityCredential>,
    now: DateTime<Utc>,
) -> Result<PeerIdentity, ExchangeError> {
    let document = presentation.document();
    let reject = |e: DocumentError| {
        warn!(credential = %document.credential(), error = %e, "rejecting peer identity");
        ExchangeError::from_document(Side::Receiver, e)
    };

    document.ensure_valid_at(now).map_err(reject)?;

    if let Some(expected) = expected {
        if document.credential() != expected {
            return Err(ExchangeError::UnexpectedPeer {
                expected: expected.to_string(),
                actual: document.credential().to_string(),
            });
        }
    }
    verifier
        .validate_document(document, document.credential())
        .map_err(reject)?;

    Ok(PeerIdentity {
        credential: document.credential().clone(),
        serial: document.serial().to_owned(),
        expires_at: document.expires_at(),
    })
}
