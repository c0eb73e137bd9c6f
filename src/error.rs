//! Error classification shared by every stage of the identity pipeline.
//!
//! Each module defines its own `thiserror` enum; all of them map onto an
//! [`ErrorKind`] so callers across the IPC boundary only ever see a kind
//! code and a retry hint, never selector or registry contents.

use std::fmt;

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The platform offers no kernel peer-credential mechanism.
    PlatformUnsupported,
    /// Kernel-reported identity failed validation or could not be read.
    InvalidProcessIdentity,
    /// The peer exited while its executable path was being resolved.
    PathResolutionRace,
    /// No selector is registered for the workload.
    AttestationFailed,
    /// The workload attested but no mapper authorizes it.
    NoMatchingMapper,
    /// Document creation or upstream delegation failed.
    IssuanceFailed,
    /// A registry write was attempted after sealing.
    RegistrySealed,
    /// The registry was used for serving before it was sealed.
    RegistryNotSealed,
    /// Bootstrap input was malformed or conflicting.
    InvalidConfiguration,
    /// A document was presented after its expiry.
    DocumentExpired,
    /// A document failed signature or content validation.
    DocumentInvalid,
    /// The originating request was cancelled.
    Cancelled,
    /// The originating request ran out of time.
    DeadlineExceeded,
    /// Worker failure unrelated to the request itself.
    Internal,
}

impl ErrorKind {
    /// Stable snake_case code used on the wire and in logs.
    pub fn code(self) -> &'static str {
        match self {
            Self::PlatformUnsupported => "platform_unsupported",
            Self::InvalidProcessIdentity => "invalid_process_identity",
            Self::PathResolutionRace => "path_resolution_race",
            Self::AttestationFailed => "attestation_failed",
            Self::NoMatchingMapper => "no_matching_mapper",
            Self::IssuanceFailed => "issuance_failed",
            Self::RegistrySealed => "registry_sealed",
            Self::RegistryNotSealed => "registry_not_sealed",
            Self::InvalidConfiguration => "invalid_configuration",
            Self::DocumentExpired => "document_expired",
            Self::DocumentInvalid => "document_invalid",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Internal => "internal",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::PathResolutionRace | Self::IssuanceFailed | Self::DeadlineExceeded
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
