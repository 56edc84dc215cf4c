//! LaunchGate CLI - Main Entry Point
//!
//! Runs reality checks against a site and manages baselines, patterns, and
//! the schedules the daemon executes. The process exit code is the verdict
//! (0 READY, 1 FRICTION, 2 DO_NOT_LAUNCH) or 3 on any system error.

use clap::{Parser, Subcommand, ValueEnum};
use launchgate_common::EXIT_SYSTEM_ERROR;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod output;

use commands::{baseline, patterns, run, schedule, Context};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// LaunchGate - should this site launch?
#[derive(Parser)]
#[command(name = "launchgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Store directory for snapshots, baselines, and artifacts
    #[arg(long, env = "LAUNCHGATE_STORE", global = true)]
    store: Option<PathBuf>,

    /// Engine configuration file
    #[arg(short, long, env = "LAUNCHGATE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run attempts against a site and decide whether it can launch
    Run(run::RunArgs),

    /// Manage the per-site baseline
    #[command(subcommand)]
    Baseline(baseline::BaselineCommands),

    /// Show recurring issues across recent runs
    Patterns(patterns::PatternsArgs),

    /// Manage scheduled runs
    #[command(subcommand)]
    Schedule(schedule::ScheduleCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }

    let ctx = Context::new(cli.store, cli.config, cli.format);
    let result = match cli.command {
        Commands::Run(args) => run::execute(args, &ctx).await,
        Commands::Baseline(cmd) => baseline::execute(cmd, &ctx).await,
        Commands::Patterns(args) => patterns::execute(args, &ctx).await,
        Commands::Schedule(cmd) => schedule::execute(cmd, &ctx).await,
        Commands::Version => {
            println!("launchgate {}", launchgate_common::VERSION);
            Ok(0)
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            EXIT_SYSTEM_ERROR
        }
    };
    std::process::exit(code);
}
