//! Client side of the identity socket.

use std::path::Path;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;

use crate::server::FetchResponse;

/// Connect to the agent at `socket_path` and read its single response line.
///
/// # Errors
///
/// Returns an error if the connection fails, the agent closes without a
/// response, or the line is not a valid [`FetchResponse`].
pub async fn fetch(socket_path: &Path) -> anyhow::Result<FetchResponse> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("failed to connect to {}", socket_path.display()))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .context("failed to read agent response")?;
    if read == 0 {
        anyhow::bail!("agent closed the connection without a response");
    }

    serde_json::from_str(line.trim_end()).context("failed to decode agent response")
}
