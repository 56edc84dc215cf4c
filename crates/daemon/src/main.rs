//! LaunchGate Daemon
//!
//! Runs scheduled reality checks: one timer per running schedule, rebuilt
//! from the schedule state file on start and whenever the file changes.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod error;
mod invoker;
mod scheduler;
mod watcher;

use config::DaemonConfig;
use invoker::ProcessInvoker;
use scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "launchgated")]
#[command(about = "LaunchGate daemon - scheduled reality runs")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LAUNCHGATE_DAEMON_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Schedule state file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Command invoked for each run
    #[arg(long)]
    entrypoint: Option<String>,

    /// Do not watch the state file for changes
    #[arg(long)]
    no_watch: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }

    info!("LaunchGate daemon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli
        .config
        .unwrap_or_else(|| launchgate_common::default_store_path().join("daemon.toml"));
    let mut config = DaemonConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(state_file) = cli.state_file {
        config.state_file = state_file;
    }
    if let Some(entrypoint) = cli.entrypoint {
        config.entrypoint = entrypoint;
    }
    if cli.no_watch {
        config.watch = false;
    }

    if cli.init_config {
        config.save(&config_path)?;
        info!("Wrote {}", config_path.display());
        return Ok(());
    }

    tokio::fs::create_dir_all(&config.store_path).await?;

    let scheduler = Scheduler::new(config.clone(), Arc::new(ProcessInvoker));
    scheduler
        .reconcile()
        .await
        .with_context(|| format!("failed to load schedules from {}", config.state_file.display()))?;

    // The watcher lives as long as this binding
    let _watcher = if config.watch {
        let (watcher, changes) = watcher::watch_state_file(&config.state_file)?;
        tokio::spawn(watcher::reconcile_on_change(scheduler.clone(), changes));
        Some(watcher)
    } else {
        None
    };

    info!("Daemon started, schedules in {}", config.state_file.display());

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    scheduler.shutdown();
    info!("Daemon shutdown complete");
    Ok(())
}
