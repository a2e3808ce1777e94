#![forbid(unsafe_code)]

//! `scan-agent`: remote scan execution agent binary.
//!
//! Bootstraps configuration, resolves the agent identity, logs platform
//! details, and serves the scan RPCs over mutual TLS until a shutdown signal
//! arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use scan_agent::config::GlobalConfig;
use scan_agent::identity::AgentIdentity;
use scan_agent::{platform, server};
use scan_agent::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "scan-agent", about = "Remote scan execution agent", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the directory the engine runs in.
    #[arg(long)]
    work_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!(version = env!("CARGO_PKG_VERSION"), "scan-agent bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };

    if let Some(dir) = args.work_dir {
        config.work_dir = dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid work dir override: {err}")))?;
    }
    config.apply_env_overrides()?;

    tokio::fs::create_dir_all(config.jobs_root())
        .await
        .map_err(|err| AppError::Config(format!("cannot create jobs directory: {err}")))?;

    let config = Arc::new(config);
    info!(
        work_dir = %config.work_dir.display(),
        jobs_root = %config.jobs_root().display(),
        "configuration loaded"
    );

    // ── Identity and platform telemetry ─────────────────
    let identity = AgentIdentity::resolve()?;
    platform::log_platform_details(&identity, &config.work_dir);

    // ── Serve ───────────────────────────────────────────
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server_config = Arc::clone(&config);
    let mut server_handle =
        tokio::spawn(async move { server::serve(server_config, identity, server_ct).await });

    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
        }
        result = &mut server_handle => {
            return match result {
                Ok(served) => served,
                Err(err) => Err(AppError::Transport(format!("server task failed: {err}"))),
            };
        }
    }

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "server stopped with an error"),
        Err(err) => error!(%err, "server task failed"),
    }
    info!("scan-agent shut down");

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
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

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
