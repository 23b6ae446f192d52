#![forbid(unsafe_code)]

//! `app-lock`: application lock policy server binary.
//!
//! Bootstraps configuration and caller credentials, opens the policy
//! database, restores every protected package as locked, and serves the
//! IPC socket until ctrl-c or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use app_lock::config::GlobalConfig;
use app_lock::engine;
use app_lock::ipc::server::{spawn_ipc_server, IpcState};
use app_lock::persistence::db;
use app_lock::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "app-lock", about = "Application lock policy server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured database path.
    #[arg(long)]
    db: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("app-lock server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(db_path) = args.db {
        config.db_path = db_path;
    }
    config.load_credentials().await?;
    info!(callers = config.callers.len(), "configuration loaded");

    // ── Open the policy database ────────────────────────
    let database = Arc::new(db::connect(&config.db_path).await?);
    info!(db_path = %config.db_path.display(), "database ready");

    // ── Assemble the engine and restore lock state ──────
    let (service, surface) = engine::build_broadcast(&config, Arc::clone(&database))?;
    let restored = service.restore().await?;
    info!(restored, "lock state restored");

    // ── Serve IPC ───────────────────────────────────────
    let ct = CancellationToken::new();
    let state = Arc::new(IpcState {
        config: Arc::new(config),
        service: Arc::new(service),
        surface,
    });
    let ipc_handle = spawn_ipc_server(state, ct.clone())?;

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = ipc_handle.await {
        error!(%err, "ipc server task failed");
    }
    database.close().await;
    info!("app-lock server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
