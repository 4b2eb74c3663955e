#![forbid(unsafe_code)]

//! `clawless` — agent bridge binary.
//!
//! Boots configuration, validates the chosen agent, starts the platform
//! adapter, scheduler, and callback HTTP server, then runs until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use clawless::agent::{AgentKind, AgentProfile, ProfileOptions};
use clawless::config::{PlatformKind, Settings};
use clawless::orchestrator::Orchestrator;
use clawless::platform::slack::SlackAdapter;
use clawless::platform::telegram::TelegramAdapter;
use clawless::platform::ChatAdapter;
use clawless::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "clawless", about = "Agent bridge between chat and a local ACP coding agent", version, long_about = None)]
struct Cli {
    /// Which CLI agent to drive.
    #[arg(value_enum)]
    agent: AgentKind,

    /// Path to a JSON configuration file.
    ///
    /// Absent fields fall back to built-in defaults; environment variables
    /// override both.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the callback HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the agent's working directory.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("clawless bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        settings.http_port = port;
    }
    if let Some(workspace) = args.workspace {
        let canonical = workspace
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        settings.workspace_dir = canonical;
    }
    let settings = Arc::new(settings);
    info!("configuration loaded");

    // ── Build the agent profile ─────────────────────────
    let profile = AgentProfile::for_kind(
        args.agent,
        ProfileOptions {
            include_directories: settings.include_directories.clone(),
            approval_mode: settings.approval_mode.clone(),
            model: settings.agent_model.clone(),
            mcp_servers: settings.mcp_servers.clone(),
            kill_grace: Some(Duration::from_millis(settings.kill_grace_ms)),
        },
    );

    // ── Build the platform adapter ──────────────────────
    let adapter: Arc<dyn ChatAdapter> = match settings.platform {
        PlatformKind::Telegram => Arc::new(TelegramAdapter::new(&settings.telegram_bot_token)),
        PlatformKind::Slack => Arc::new(SlackAdapter::new(
            &settings.slack_bot_token,
            &settings.slack_app_token,
        )?),
    };

    // ── Wire and start ──────────────────────────────────
    let orchestrator = Orchestrator::build(Arc::clone(&settings), profile, adapter)?;
    orchestrator.start().await?;
    info!("bridge ready");

    // ── Wait for the first shutdown signal ──────────────
    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");

    // A second signal force-exits.
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    let grace = Duration::from_millis(settings.kill_grace_ms.saturating_add(5_000));
    if tokio::time::timeout(grace, orchestrator.shutdown())
        .await
        .is_err()
    {
        error!(grace_ms = grace.as_millis(), "graceful shutdown timed out — exiting");
    }

    info!("clawless shut down");
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
