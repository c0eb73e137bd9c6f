//! In-process Ed25519 signing authority.
//!
//! Certificate material is a compact token:
//! `base64url(claims json) "." base64url(ed25519 signature over the first part)`.
//! Timestamps are whole seconds so the document and its claims agree exactly.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use super::{Clock, IssuanceError, SystemClock};
use crate::identity::{DocumentError, IdentityCredential, IdentityDocument};

/// Signed claims carried in the certificate token.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Credential URI.
    sub: String,
    /// Issued-at, unix seconds.
    iat: i64,
    /// Expires-at, unix seconds.
    exp: i64,
    /// Document serial.
    jti: String,
    /// Signing key id.
    kid: String,
}

/// Local authority owning a freshly generated signing key.
pub struct LocalAuthority {
    signing_key: SigningKey,
    key_id: String,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LocalAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthority")
            .field("key_id", &self.key_id)
            .field("signing_key", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl LocalAuthority {
    /// Generate a signing key from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::InvalidTtl`] unless `ttl` is at least one
    /// second and representable.
    pub fn generate(ttl: Duration) -> Result<Self, IssuanceError> {
        Self::from_signing_key(SigningKey::generate(&mut OsRng), ttl)
    }

    /// Use an existing signing key.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::InvalidTtl`] for a sub-second or overflowing TTL.
    pub fn from_signing_key(signing_key: SigningKey, ttl: Duration) -> Result<Self, IssuanceError> {
        if ttl.as_secs() == 0 {
            return Err(IssuanceError::InvalidTtl);
        }
        let secs = i64::try_from(ttl.as_secs()).map_err(|_| IssuanceError::InvalidTtl)?;
        let ttl = TimeDelta::try_seconds(secs).ok_or(IssuanceError::InvalidTtl)?;
        let digest = Sha256::digest(signing_key.verifying_key().as_bytes());
        let key_id = hex::encode(&digest[..8]);
        Ok(Self {
            signing_key,
            key_id,
            ttl,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used for `issued_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Public half of the signing key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Short hex id of the signing key.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Document lifetime.
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Sign a new document for `credential`.
    ///
    /// # Errors
    ///
    /// [`IssuanceError::InvalidTtl`] if the expiry overflows,
    /// [`IssuanceError::Encoding`] if the claims cannot be serialized.
    pub fn issue(&self, credential: &IdentityCredential) -> Result<IdentityDocument, IssuanceError> {
        let now = self.clock.now();
        let issued_at =
            DateTime::from_timestamp(now.timestamp(), 0).ok_or(IssuanceError::InvalidTtl)?;
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or(IssuanceError::InvalidTtl)?;
        let serial = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: credential.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: serial.clone(),
            kid: self.key_id.clone(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = self.signing_key.sign(payload.as_bytes());
        let token = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()));

        debug!(credential = %credential, serial = %serial, kid = %self.key_id, "local document signed");
        Ok(IdentityDocument::new(
            credential.clone(),
            token,
            serial,
            issued_at,
            expires_at,
        ))
    }

    /// Verify a document this authority signed.
    ///
    /// Checks the signature, that the claims agree with the document, that
    /// the subject equals `expected`, then expiry against the authority clock.
    ///
    /// # Errors
    ///
    /// [`DocumentError::Invalid`] on any content or signature problem,
    /// [`DocumentError::Expired`] for an authentic but expired document.
    pub fn validate(
        &self,
        document: &IdentityDocument,
        expected: &IdentityCredential,
    ) -> Result<(), DocumentError> {
        let claims = self.verify_token(document.certificate())?;

        if claims.kid != self.key_id {
            return Err(invalid("signed by a different key"));
        }
        if claims.sub != document.credential().to_string() {
            return Err(invalid("subject does not match document credential"));
        }
        if document.credential() != expected {
            return Err(invalid("credential does not match expected identity"));
        }
        if claims.jti != document.serial()
            || claims.iat != document.issued_at().timestamp()
            || claims.exp != document.expires_at().timestamp()
        {
            return Err(invalid("claims do not match document fields"));
        }

        document.ensure_valid_at(self.clock.now())
    }

    fn verify_token(&self, token: &str) -> Result<Claims, DocumentError> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| invalid("malformed certificate token"))?;
        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| invalid(&format!("signature encoding: {e}")))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|e| invalid(&format!("signature bytes: {e}")))?;
        self.signing_key
            .verifying_key()
            .verify(payload.as_bytes(), &signature)
            .map_err(|_| invalid("signature verification failed"))?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| invalid(&format!("claims encoding: {e}")))?;
        serde_json::from_slice(&claims_bytes).map_err(|e| invalid(&format!("claims json: {e}")))
    }
}

fn invalid(reason: &str) -> DocumentError {
    DocumentError::Invalid(reason.to_owned())
}
