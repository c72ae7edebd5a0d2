#![forbid(unsafe_code)]

//! `agent-harness` — session harness daemon.
//!
//! Bootstraps configuration, connects the state database, reconciles
//! sessions left behind by a prior crash, and serves the control IPC
//! surface until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_harness::config::GlobalConfig;
use agent_harness::container::docker::DockerRuntime;
use agent_harness::ipc::server::spawn_ipc_server;
use agent_harness::orchestrator::manager::SessionManager;
use agent_harness::orchestrator::HarnessState;
use agent_harness::persistence::db;
use agent_harness::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-harness", about = "Container-isolated agent session harness", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the harness root directory from the config file.
    #[arg(long)]
    root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-harness daemon bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load(&args.config)?;
    if let Some(root) = args.root {
        config.harness_root = root;
    }
    let config = Arc::new(config);
    info!(root = %config.harness_root.display(), "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("state database connected");

    // ── Build shared state and manager ──────────────────
    let ct = CancellationToken::new();
    let runtime = Arc::new(DockerRuntime::new(config.container.clone()));
    let state = HarnessState::new(Arc::clone(&config), db, runtime, ct.clone());
    let manager = SessionManager::new(state);

    // ── Reconcile sessions from a prior crash ───────────
    if let Err(err) = manager.recover().await {
        warn!(%err, "crash recovery pass failed");
    }

    // ── Serve the control IPC surface ───────────────────
    let ipc_handle = spawn_ipc_server(manager, ct.clone())?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::Config(format!("signal handler failed: {err}")))?;
    info!("interrupt received; shutting down");
    ct.cancel();
    let _ = ipc_handle.await;

    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    let init_result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    init_result.map_err(|err| AppError::Config(format!("tracing init failed: {err}")))
}
