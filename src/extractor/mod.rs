//! Kernel credential extraction for IPC peers.
//!
//! Identity comes only from the kernel: the peer's PID/UID/GID are read from
//! the socket in one atomic call, and the executable path is resolved from
//! the OS process table. Nothing the client writes on the wire is consulted.
//!
//! Each supported OS provides a [`PeerCredentialSource`]. On anything else
//! [`platform_source`] fails with [`ExtractError::PlatformUnsupported`] at
//! construction; there is no fallback to self-reported credentials.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::UnixStream;
use tracing::debug;

use crate::error::ErrorKind;
use crate::identity::ProcessIdentity;

#[cfg(target_os = "linux")]
pub mod linux;
pub mod retry;

pub use retry::{resolve_with_retry, PathRetryPolicy};

/// Extraction failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// No kernel peer-credential mechanism on this platform.
    #[error("peer credentials are not supported on {platform}")]
    PlatformUnsupported {
        /// `std::env::consts::OS` of the running host.
        platform: &'static str,
    },

    /// The kernel call on the socket failed.
    #[error("failed to read peer credentials: {0}")]
    PeerCredentials(#[source] std::io::Error),

    /// The kernel returned values that fail validation.
    #[error("invalid process identity: {0}")]
    InvalidProcessIdentity(String),

    /// The peer disappeared before its executable could be resolved.
    #[error("process {pid} exited before its executable could be resolved ({attempts} attempts)")]
    PathResolutionRace {
        /// Peer process id.
        pid: i32,
        /// Lookups performed, including the first.
        attempts: u32,
    },

    /// Executable lookup failed for a reason other than process exit.
    #[error("failed to resolve executable of process {pid}: {source}")]
    PathResolution {
        /// Peer process id.
        pid: i32,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Classification for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PlatformUnsupported { .. } => ErrorKind::PlatformUnsupported,
            Self::PathResolutionRace { .. } => ErrorKind::PathResolutionRace,
            Self::PeerCredentials(_)
            | Self::InvalidProcessIdentity(_)
            | Self::PathResolution { .. } => ErrorKind::InvalidProcessIdentity,
        }
    }

    /// Whether the failure is transient.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Outcome of a single executable lookup.
#[derive(Debug, thiserror::Error)]
pub enum PathLookupError {
    /// The process no longer exists. Retried.
    #[error("process {pid} not found")]
    ProcessNotFound {
        /// Process id looked up.
        pid: i32,
    },

    /// Any other failure, e.g. permission denied. Not retried.
    #[error("cannot read executable of process {pid}: {source}")]
    Io {
        /// Process id looked up.
        pid: i32,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

/// Credentials as reported by the kernel, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Peer pid, when the platform reports one.
    pub pid: Option<i32>,
    /// Peer effective uid.
    pub uid: u32,
    /// Peer effective gid.
    pub gid: u32,
}

/// Validated kernel credentials with a positive pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedPeer {
    /// Peer pid.
    pub pid: i32,
    /// Peer effective uid.
    pub uid: u32,
    /// Peer effective gid.
    pub gid: u32,
}

/// Per-OS access to peer credentials and process executables.
pub trait PeerCredentialSource: Send + Sync {
    /// Name of the platform this source implements.
    fn platform(&self) -> &'static str;

    /// One atomic kernel read of the connected peer's credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::PeerCredentials`] if the kernel call fails.
    fn peer_credentials(&self, stream: &UnixStream) -> Result<PeerCredentials, ExtractError>;

    /// Absolute executable path of `pid`.
    ///
    /// # Errors
    ///
    /// [`PathLookupError::ProcessNotFound`] when the process is gone,
    /// [`PathLookupError::Io`] otherwise.
    fn executable_path(&self, pid: i32) -> Result<PathBuf, PathLookupError>;
}

/// The credential source for the running OS.
///
/// # Errors
///
/// Returns [`ExtractError::PlatformUnsupported`] on platforms without an
/// implementation.
pub fn platform_source() -> Result<Arc<dyn PeerCredentialSource>, ExtractError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(linux::ProcfsSource::new()))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(ExtractError::PlatformUnsupported {
            platform: std::env::consts::OS,
        })
    }
}

/// Turns an accepted connection into a [`ProcessIdentity`].
pub struct CredentialExtractor {
    source: Arc<dyn PeerCredentialSource>,
    retry: PathRetryPolicy,
}

impl std::fmt::Debug for CredentialExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialExtractor")
            .field("platform", &self.source.platform())
            .field("retry", &self.retry)
            .finish()
    }
}

impl CredentialExtractor {
    /// Build an extractor over an explicit source.
    pub fn new(source: Arc<dyn PeerCredentialSource>, retry: PathRetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Build an extractor for the running OS.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::PlatformUnsupported`] where no source exists.
    pub fn for_platform(retry: PathRetryPolicy) -> Result<Self, ExtractError> {
        Ok(Self::new(platform_source()?, retry))
    }

    /// The configured retry policy.
    pub fn retry_policy(&self) -> &PathRetryPolicy {
        &self.retry
    }

    /// Read and validate kernel credentials. Non-blocking.
    ///
    /// # Errors
    ///
    /// [`ExtractError::PeerCredentials`] if the kernel read fails,
    /// [`ExtractError::InvalidProcessIdentity`] for a missing or
    /// non-positive pid.
    pub fn peer_credentials(&self, stream: &UnixStream) -> Result<VerifiedPeer, ExtractError> {
        let raw = self.source.peer_credentials(stream)?;
        verify_peer(raw)
    }

    /// Resolve the executable with bounded retry.
    ///
    /// Blocks the calling thread for at most
    /// [`PathRetryPolicy::worst_case_sleep`]; call from a blocking context.
    ///
    /// # Errors
    ///
    /// [`ExtractError::PathResolutionRace`] (retryable) or
    /// [`ExtractError::PathResolution`] (fatal).
    pub fn resolve(&self, peer: VerifiedPeer) -> Result<ProcessIdentity, ExtractError> {
        let path = resolve_with_retry(
            &self.retry,
            peer.pid,
            |pid| self.source.executable_path(pid),
            std::thread::sleep,
        )?;
        debug!(pid = peer.pid, uid = peer.uid, gid = peer.gid, path = %path.display(), "peer credentials extracted");
        Ok(ProcessIdentity::new(peer.pid, peer.uid, peer.gid, path))
    }

    /// Full extraction in one blocking call.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::peer_credentials`] or [`Self::resolve`].
    pub fn extract(&self, stream: &UnixStream) -> Result<ProcessIdentity, ExtractError> {
        let peer = self.peer_credentials(stream)?;
        self.resolve(peer)
    }
}

/// Validate raw kernel credentials.
///
/// # Errors
///
/// Returns [`ExtractError::InvalidProcessIdentity`] when the pid is absent or
/// not positive.
pub fn verify_peer(raw: PeerCredentials) -> Result<VerifiedPeer, ExtractError> {
    match raw.pid {
        Some(pid) if pid > 0 => Ok(VerifiedPeer {
            pid,
            uid: raw.uid,
            gid: raw.gid,
        }),
        Some(pid) => Err(ExtractError::InvalidProcessIdentity(format!(
            "kernel reported non-positive pid {pid}"
        ))),
        None => Err(ExtractError::InvalidProcessIdentity(
            "kernel reported no pid for peer".to_owned(),
        )),
    }
}
