//! Unix-socket transport for identity fetches.
//!
//! The client sends nothing. Identity comes from the kernel credentials
//! attached to the connection; the server answers with one JSON line and
//! closes. Denials carry only an error code and a retry hint.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, CallContext, FetchError};
use crate::error::ErrorKind;
use crate::extractor::CredentialExtractor;
use crate::identity::IdentityDocument;

/// Default cap on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Pause after a failed `accept`, so fd exhaustion cannot spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// One-line response written to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResponse {
    /// A document was issued.
    Issued {
        /// Credential URI.
        spiffe_id: String,
        /// Document serial.
        serial: String,
        /// Expiry instant.
        expires_at: DateTime<Utc>,
        /// Opaque certificate material.
        certificate: String,
    },
    /// The request was refused.
    Denied {
        /// [`ErrorKind::code`] of the failure.
        error: String,
        /// Whether retrying may succeed.
        retryable: bool,
    },
}

impl FetchResponse {
    /// Success response for `document`.
    pub fn issued(document: &IdentityDocument) -> Self {
        Self::Issued {
            spiffe_id: document.credential().to_string(),
            serial: document.serial().to_owned(),
            expires_at: document.expires_at(),
            certificate: document.certificate().to_owned(),
        }
    }

    /// Denial carrying only the classification.
    pub fn denied(kind: ErrorKind) -> Self {
        Self::Denied {
            error: kind.code().to_owned(),
            retryable: kind.is_retryable(),
        }
    }
}

/// Accept loop over a bound Unix socket.
pub struct IdentityServer {
    listener: UnixListener,
    path: PathBuf,
    extractor: Arc<CredentialExtractor>,
    agent: Arc<Agent>,
    request_timeout: Duration,
    max_connections: usize,
    connections: Arc<Semaphore>,
}

impl std::fmt::Debug for IdentityServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityServer")
            .field("path", &self.path)
            .field("request_timeout", &self.request_timeout)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl IdentityServer {
    /// Bind `path`, replacing a stale socket file.
    ///
    /// The socket is world-connectable: authorization happens by
    /// attestation, not by file mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, bind, or permission change fails.
    pub fn bind(
        path: &Path,
        extractor: Arc<CredentialExtractor>,
        agent: Arc<Agent>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", path.display()))
            }
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind {}", path.display()))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;

        info!(path = %path.display(), "identity socket bound");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            extractor,
            agent,
            request_timeout,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connections: Arc::new(Semaphore::new(DEFAULT_MAX_CONNECTIONS)),
        })
    }

    /// Limit how many connections are served at once. Further clients wait
    /// in the listen backlog. Values below one are raised to one.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        let max = max.max(1);
        self.max_connections = max;
        self.connections = Arc::new(Semaphore::new(max));
        self
    }

    /// Socket path.
    pub fn local_path(&self) -> &Path {
        &self.path
    }

    /// Serve until `shutdown` fires, then wait up to `drain_timeout` for
    /// in-flight requests and remove the socket file.
    ///
    /// Shutdown only stops accepting. Requests already running keep their
    /// own cancellation and finish normally unless the drain times out.
    ///
    /// # Errors
    ///
    /// Returns an error only if the socket file cannot be removed.
    pub async fn run(self, shutdown: CancellationToken, drain_timeout: Duration) -> anyhow::Result<()> {
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                permit = Arc::clone(&self.connections).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(error = %e, "connection limiter closed");
                        break;
                    }
                },
                () = shutdown.cancelled() => break,
            };

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let extractor = Arc::clone(&self.extractor);
                        let agent = Arc::clone(&self.agent);
                        let timeout = self.request_timeout;
                        tasks.spawn(async move {
                            let _permit = permit;
                            let ctx = CallContext::default().with_timeout(timeout);
                            handle_connection(stream, extractor, agent, ctx, timeout).await;
                        });
                    }
                    Err(e) => {
                        drop(permit);
                        warn!(error = %e, backoff = ?ACCEPT_BACKOFF, "accept failed");
                        tokio::select! {
                            () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                            () = shutdown.cancelled() => break,
                        }
                    }
                },
                () = shutdown.cancelled() => break,
            }
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "connection task failed");
                }
            }
        }
        info!("shutdown requested, no longer accepting connections");

        let pending = tasks.len();
        if pending > 0 {
            info!(pending, timeout_secs = drain_timeout.as_secs(), "waiting for in-flight requests");
            let drained = tokio::time::timeout(drain_timeout, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(remaining = tasks.len(), "shutdown timeout exceeded, abandoning requests");
                tasks.abort_all();
            }
        }

        std::fs::remove_file(&self.path)
            .or_else(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Ok(()),
                _ => Err(e),
            })
            .with_context(|| format!("failed to remove {}", self.path.display()))?;
        info!("identity server stopped");
        Ok(())
    }
}

/// Run the pipeline for one connection and write the response line.
pub async fn handle_connection(
    mut stream: UnixStream,
    extractor: Arc<CredentialExtractor>,
    agent: Arc<Agent>,
    ctx: CallContext,
    timeout: Duration,
) {
    let response = match serve_request(&stream, extractor, agent, ctx, timeout).await {
        Ok(document) => FetchResponse::issued(&document),
        Err(e) => {
            let kind = e.kind();
            warn!(kind = %kind, error = %e, "identity request denied");
            FetchResponse::denied(kind)
        }
    };

    let mut line = match serde_json::to_vec(&response) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to encode response");
            return;
        }
    };
    line.push(b'\n');
    if let Err(e) = stream.write_all(&line).await {
        debug!(error = %e, "peer went away before response");
        return;
    }
    let _ = stream.shutdown().await;
}

async fn serve_request(
    stream: &UnixStream,
    extractor: Arc<CredentialExtractor>,
    agent: Arc<Agent>,
    ctx: CallContext,
    timeout: Duration,
) -> Result<IdentityDocument, FetchError> {
    // The single kernel read happens on the accepted socket itself.
    let peer = extractor.peer_credentials(stream)?;

    let cancel = ctx.token().clone();
    let worker = tokio::task::spawn_blocking(move || {
        let workload = extractor.resolve(peer)?;
        agent.fetch_identity_document(&ctx, &workload)
    });

    tokio::select! {
        joined = tokio::time::timeout(timeout, worker) => match joined {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(FetchError::Worker(join.to_string())),
            Err(_) => {
                cancel.cancel();
                Err(FetchError::DeadlineExceeded { stage: "response" })
            }
        },
        () = peer_hung_up(stream) => {
            // Stops the worker at its next stage boundary.
            cancel.cancel();
            Err(FetchError::Cancelled { stage: "response" })
        }
    }
}

/// Resolves once the client closes its end. Stray bytes are discarded.
async fn peer_hung_up(stream: &UnixStream) {
    let mut buf = [0u8; 64];
    loop {
        if stream.readable().await.is_err() {
            return;
        }
        match stream.try_read(&mut buf) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => return,
        }
    }
}
