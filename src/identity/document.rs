//! Issued identity documents and their use-time validity contract.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::IdentityCredential;
use crate::error::ErrorKind;

/// Use-time document failures, distinct from issuance-time failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    /// `expires_at` is at or before the evaluation instant.
    #[error("identity document for {credential} expired at {expired_at}")]
    Expired {
        /// The credential the document was issued for.
        credential: String,
        /// When it stopped being valid.
        expired_at: DateTime<Utc>,
    },

    /// Signature, content, or credential mismatch.
    #[error("identity document is invalid: {0}")]
    Invalid(String),
}

impl DocumentError {
    /// Classification for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Expired { .. } => ErrorKind::DocumentExpired,
            Self::Invalid(_) => ErrorKind::DocumentInvalid,
        }
    }
}

/// An issued identity: credential, opaque certificate material, expiry.
///
/// Documents are never revoked or deleted; correctness relies on expiry, so
/// every consumer must call [`IdentityDocument::is_valid`] (or
/// [`IdentityDocument::ensure_valid_at`]) before trusting one.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityDocument {
    credential: IdentityCredential,
    certificate: String,
    serial: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IdentityDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityDocument")
            .field("credential", &self.credential.to_string())
            .field("certificate", &"[REDACTED]")
            .field("serial", &self.serial)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl IdentityDocument {
    /// Assemble a document. Only authorities should call this; `expires_at`
    /// must come from the authority's own clock and TTL.
    pub fn new(
        credential: IdentityCredential,
        certificate: String,
        serial: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            credential,
            certificate,
            serial,
            issued_at,
            expires_at,
        }
    }

    /// The identity this document binds.
    pub fn credential(&self) -> &IdentityCredential {
        &self.credential
    }

    /// Opaque certificate material produced by the authority.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// Authority-assigned serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Issuance instant.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Expiry instant. The document is invalid at and after this instant.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Valid right now.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Valid at `now`: strictly before expiry and with a non-empty credential.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.ensure_valid_at(now).is_ok()
    }

    /// Like [`Self::is_valid_at`] but reports why.
    ///
    /// # Errors
    ///
    /// [`DocumentError::Expired`] when `now >= expires_at`,
    /// [`DocumentError::Invalid`] when the credential is empty.
    pub fn ensure_valid_at(&self, now: DateTime<Utc>) -> Result<(), DocumentError> {
        if self.credential.is_empty() {
            return Err(DocumentError::Invalid("empty credential".to_owned()));
        }
        if now >= self.expires_at {
            return Err(DocumentError::Expired {
                credential: self.credential.to_string(),
                expired_at: self.expires_at,
            });
        }
        Ok(())
    }

    /// Hex SHA-256 of the certificate material, safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.certificate.as_bytes()))
    }
}
