//! Latchkey CLI entry point.
//!
//! Provides `serve`, `fetch`, and `check` subcommands for running the agent,
//! requesting an identity for the calling process, or validating config.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use latchkey::agent::Agent;
use latchkey::bootstrap;
use latchkey::client;
use latchkey::config::LatchkeyConfig;
use latchkey::extractor::CredentialExtractor;
use latchkey::issuance::{IssuanceMode, IssuanceServer, LocalAuthority};
use latchkey::logging;
use latchkey::server::{FetchResponse, IdentityServer};

/// Latchkey: node-local workload identity agent.
#[derive(Parser)]
#[command(name = "latchkey", version, about)]
struct Cli {
    /// Config file (defaults to `$LATCHKEY_CONFIG_PATH` or `./latchkey.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the agent on its Unix socket.
    Serve,
    /// Ask a running agent for this process's identity.
    Fetch {
        /// Socket path (defaults to the configured one).
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Validate configuration and bootstrap the registry in memory.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => handle_serve(config).await,
        Command::Fetch { socket } => handle_fetch(config, socket).await,
        Command::Check => handle_check(&config),
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<LatchkeyConfig> {
    let mut config = match path {
        Some(p) => LatchkeyConfig::load_from(p)?,
        None => LatchkeyConfig::load()?,
    };
    if path.is_some() {
        config.apply_overrides(|key| std::env::var(key).ok());
    }
    Ok(config)
}

/// Run the agent until Ctrl-C.
async fn handle_serve(config: LatchkeyConfig) -> anyhow::Result<()> {
    config.validate()?;
    let logs_dir = config.logs_dir()?;
    let _logging_guard = logging::init_production(&logs_dir, &config.agent.log_level)?;

    // Fails loudly on platforms without kernel peer credentials.
    let extractor = CredentialExtractor::for_platform(config.extraction.retry_policy())
        .context("cannot serve without kernel peer credentials")?;

    let (attestor, registry) =
        bootstrap::bootstrap(&config.workloads).context("bootstrap failed")?;

    let issuance = match config.issuance.mode {
        IssuanceMode::Local => {
            let authority = LocalAuthority::generate(config.issuance.ttl())?;
            info!(key_id = %authority.key_id(), ttl_secs = config.issuance.ttl_secs, "local authority ready");
            Arc::new(IssuanceServer::local(authority))
        }
        IssuanceMode::Upstream => {
            anyhow::bail!("upstream issuance requires a host-provided authority; use the library API")
        }
    };

    let agent = Agent::new(
        Arc::new(attestor),
        Arc::new(registry),
        Arc::clone(&issuance),
    )?;

    let server = IdentityServer::bind(
        &config.agent.socket_path,
        Arc::new(extractor),
        Arc::new(agent),
        config.agent.request_timeout(),
    )?
    .with_max_connections(config.agent.max_connections);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
        }
        signal.cancel();
    });

    info!(version = env!("CARGO_PKG_VERSION"), "latchkey ready");
    let result = server
        .run(shutdown, config.agent.shutdown_timeout())
        .await;

    issuance.close();
    info!("latchkey shut down");
    result
}

/// Fetch an identity for this process and print the response.
async fn handle_fetch(config: LatchkeyConfig, socket: Option<PathBuf>) -> anyhow::Result<()> {
    logging::init_cli(&config.agent.log_level);
    let socket = socket.unwrap_or(config.agent.socket_path);

    let response = client::fetch(&socket).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    match response {
        FetchResponse::Issued { .. } => Ok(()),
        FetchResponse::Denied { error, retryable } => {
            anyhow::bail!("identity denied: {error} (retryable: {retryable})")
        }
    }
}

/// Validate config and run bootstrap without binding anything.
fn handle_check(config: &LatchkeyConfig) -> anyhow::Result<()> {
    logging::init_cli(&config.agent.log_level);
    config.validate()?;

    let (attestor, registry) =
        bootstrap::bootstrap(&config.workloads).context("bootstrap failed")?;

    println!(
        "config ok: {} workload uid(s), {} mapper(s), socket {}",
        attestor.registered_count(),
        registry.len(),
        config.agent.socket_path.display()
    );
    for mapper in registry.list_mappers() {
        println!("  {} <- {}", mapper.credential(), mapper.selectors());
    }
    Ok(())
}
