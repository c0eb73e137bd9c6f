//! Identity credentials: canonical `(trust domain, path)` pairs.

use std::fmt;

use serde::{Deserialize, Serialize};

const URI_SCHEME: &str = "spiffe://";

/// Errors from parsing an identity credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// No trust domain before the path.
    #[error("credential {0:?} has no trust domain")]
    MissingTrustDomain(String),

    /// Trust domain contains characters outside `[a-z0-9._-]`.
    #[error("credential {0:?} has an invalid trust domain")]
    InvalidTrustDomain(String),

    /// No path segments after the trust domain.
    #[error("credential {0:?} has no path")]
    MissingPath(String),

    /// A path segment is `.`/`..` or contains illegal characters.
    #[error("credential {raw:?} has an invalid path segment {segment:?}")]
    InvalidPathSegment {
        /// The full input.
        raw: String,
        /// The offending segment.
        segment: String,
    },
}

/// A workload identity such as `spiffe://example.org/server`.
///
/// Always canonical: the trust domain is lower-cased and the path starts
/// with `/`, has no empty, `.` or `..` segments and no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityCredential {
    trust_domain: String,
    path: String,
}

impl IdentityCredential {
    /// Parse `example.org/server` or `spiffe://example.org/server`.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] when the domain or path is malformed.
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let trimmed = raw.trim();
        let body = match trimmed.get(..URI_SCHEME.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(URI_SCHEME) => {
                &trimmed[URI_SCHEME.len()..]
            }
            _ => trimmed,
        };

        let (domain, path) = body.split_once('/').unwrap_or((body, ""));
        if domain.is_empty() {
            return Err(CredentialError::MissingTrustDomain(raw.to_owned()));
        }

        let trust_domain = domain.to_ascii_lowercase();
        let domain_ok = trust_domain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'));
        if !domain_ok {
            return Err(CredentialError::InvalidTrustDomain(raw.to_owned()));
        }

        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let legal = segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
            if segment == "." || segment == ".." || !legal {
                return Err(CredentialError::InvalidPathSegment {
                    raw: raw.to_owned(),
                    segment: segment.to_owned(),
                });
            }
            segments.push(segment);
        }
        if segments.is_empty() {
            return Err(CredentialError::MissingPath(raw.to_owned()));
        }

        Ok(Self {
            trust_domain,
            path: format!("/{}", segments.join("/")),
        })
    }

    /// Lower-cased trust domain.
    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    /// Normalized path, always beginning with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether either component is empty.
    pub fn is_empty(&self) -> bool {
        self.trust_domain.is_empty() || self.path.is_empty()
    }
}

impl fmt::Display for IdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{URI_SCHEME}{}{}", self.trust_domain, self.path)
    }
}

impl TryFrom<String> for IdentityCredential {
    type Error = CredentialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IdentityCredential> for String {
    fn from(credential: IdentityCredential) -> Self {
        credential.to_string()
    }
}
