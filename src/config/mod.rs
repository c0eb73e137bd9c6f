//! Configuration loading and validation.
//!
//! Loads `./latchkey.toml` (or `$LATCHKEY_CONFIG_PATH`). Every section has
//! defaults, so a missing or partial file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::extractor::PathRetryPolicy;
use crate::issuance::IssuanceMode;

/// Upper bound on any configured backoff step.
const MAX_BACKOFF_CAP_MS: u64 = 10;

/// Upper bound on the total time path resolution may spend sleeping.
const MAX_WORST_CASE_SLEEP: Duration = Duration::from_millis(10);

/// Upper bound on configured path-resolution retries.
const MAX_RETRIES_CAP: u32 = 8;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LatchkeyConfig {
    /// Socket, logging and request settings.
    pub agent: AgentConfig,
    /// Document issuance.
    pub issuance: IssuanceConfig,
    /// Peer credential extraction.
    pub extraction: ExtractionConfig,
    /// Bootstrap registrations.
    pub workloads: Vec<WorkloadConfig>,
}

impl LatchkeyConfig {
    /// Load with precedence env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit path (no env overrides). A missing file yields
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("LATCHKEY_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("latchkey.toml"))
    }

    /// Apply environment overrides. Takes a resolver so tests never touch
    /// the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("LATCHKEY_SOCKET_PATH") {
            self.agent.socket_path = PathBuf::from(v);
        }
        if let Some(v) = env("LATCHKEY_LOG_LEVEL") {
            self.agent.log_level = v;
        }
        if let Some(v) = env("LATCHKEY_LOGS_DIR") {
            self.agent.logs_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("LATCHKEY_TTL_SECS") {
            match v.parse() {
                Ok(n) => self.issuance.ttl_secs = n,
                Err(_) => tracing::warn!(
                    var = "LATCHKEY_TTL_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("LATCHKEY_REQUEST_TIMEOUT_MS") {
            match v.parse() {
                Ok(n) => self.agent.request_timeout_ms = n,
                Err(_) => tracing::warn!(
                    var = "LATCHKEY_REQUEST_TIMEOUT_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or unknown enum values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: LatchkeyConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Check numeric bounds. Workload entries are checked by bootstrap.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first out-of-range setting.
    pub fn validate(&self) -> Result<()> {
        if self.issuance.ttl_secs == 0 {
            anyhow::bail!("issuance.ttl_secs must be positive");
        }
        if self.agent.request_timeout_ms == 0 {
            anyhow::bail!("agent.request_timeout_ms must be positive");
        }
        if self.agent.max_connections == 0 {
            anyhow::bail!("agent.max_connections must be positive");
        }
        let ex = &self.extraction;
        if ex.max_retries > MAX_RETRIES_CAP {
            anyhow::bail!("extraction.max_retries must be at most {MAX_RETRIES_CAP}");
        }
        if ex.initial_backoff_ms == 0 || ex.initial_backoff_ms > ex.max_backoff_ms {
            anyhow::bail!("extraction.initial_backoff_ms must be in 1..=max_backoff_ms");
        }
        if ex.max_backoff_ms > MAX_BACKOFF_CAP_MS {
            anyhow::bail!("extraction.max_backoff_ms must be at most {MAX_BACKOFF_CAP_MS}");
        }
        let worst = ex.retry_policy().worst_case_sleep();
        if worst > MAX_WORST_CASE_SLEEP {
            anyhow::bail!(
                "extraction retries may sleep {worst:?} in total, at most {MAX_WORST_CASE_SLEEP:?} allowed"
            );
        }
        Ok(())
    }

    /// Logs directory: configured, or `~/.latchkey/logs`.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the home directory
    /// cannot be determined.
    pub fn logs_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.agent.logs_dir {
            return Ok(dir.clone());
        }
        let home = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.home_dir().join(".latchkey").join("logs"))
    }
}

// ── Agent config ────────────────────────────────────────────────

/// Socket, logging and request settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Unix socket the agent listens on.
    pub socket_path: PathBuf,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rotated JSON logs.
    pub logs_dir: Option<PathBuf>,
    /// Per-request deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Time allowed for in-flight requests at shutdown.
    pub shutdown_timeout_secs: u64,
    /// Connections served concurrently. Further clients wait in the backlog.
    pub max_connections: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/latchkey/agent.sock"),
            log_level: "info".to_string(),
            logs_dir: None,
            request_timeout_ms: 2_000,
            shutdown_timeout_secs: 10,
            max_connections: crate::server::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl AgentConfig {
    /// Request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Shutdown drain window.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

// ── Issuance config ─────────────────────────────────────────────

/// Document issuance settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IssuanceConfig {
    /// Which authority issues documents.
    pub mode: IssuanceMode,
    /// Document lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            mode: IssuanceMode::Local,
            ttl_secs: 3_600,
        }
    }
}

impl IssuanceConfig {
    /// Document lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// ── Extraction config ───────────────────────────────────────────

/// Executable-path retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Retries after the first lookup.
    pub max_retries: u32,
    /// First backoff step in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
        }
    }
}

impl ExtractionConfig {
    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> PathRetryPolicy {
        PathRetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

// ── Workloads ───────────────────────────────────────────────────

/// One bootstrap registration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkloadConfig {
    /// Workload uid.
    pub uid: u32,
    /// Selector granted to `uid`, e.g. `role:server`.
    pub selector: String,
    /// Identity issued, e.g. `example.org/server`.
    pub credential: String,
    /// Extra selectors the mapper requires, e.g. `unix:path:/usr/bin/server`.
    #[serde(default)]
    pub selectors: Vec<String>,
}
