//! Linux peer credentials: `SO_PEERCRED` plus `/proc/<pid>/exe`.

use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;

use tokio::net::UnixStream;

use super::{ExtractError, PathLookupError, PeerCredentialSource, PeerCredentials};

/// Reads peer credentials from the socket and executables from procfs.
#[derive(Debug, Clone)]
pub struct ProcfsSource {
    proc_root: PathBuf,
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsSource {
    /// Use the host's `/proc`.
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/proc"))
    }

    /// Use an alternate procfs mount.
    pub fn with_root(proc_root: PathBuf) -> Self {
        Self { proc_root }
    }
}

impl PeerCredentialSource for ProcfsSource {
    fn platform(&self) -> &'static str {
        "linux"
    }

    fn peer_credentials(&self, stream: &UnixStream) -> Result<PeerCredentials, ExtractError> {
        let cred = stream
            .peer_cred()
            .map_err(ExtractError::PeerCredentials)?;
        Ok(PeerCredentials {
            pid: cred.pid(),
            uid: cred.uid(),
            gid: cred.gid(),
        })
    }

    fn executable_path(&self, pid: i32) -> Result<PathBuf, PathLookupError> {
        let link = self.proc_root.join(pid.to_string()).join("exe");
        // A replaced binary reads back with a " (deleted)" suffix; it is kept
        // verbatim so path selectors pinned to the old file stop matching.
        std::fs::read_link(&link).map_err(|source| match source.kind() {
            IoErrorKind::NotFound => PathLookupError::ProcessNotFound { pid },
            _ => PathLookupError::Io { pid, source },
        })
    }
}
