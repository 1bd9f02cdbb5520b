//! foldsweep CLI: run k-fold cross-validation sweeps against an experiment tracker.

mod commands;
mod report;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Run k-fold cross-validation sweeps grouped under one tracking record
#[derive(Parser, Debug)]
#[command(name = "foldsweep", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run one cross-validation sweep
    Run(RunArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Extra configuration file; repeat to layer several, later files win
    #[arg(short, long = "config", value_name = "FILE")]
    config: Vec<PathBuf>,

    /// Number of folds
    #[arg(short = 'k', long)]
    num_folds: Option<usize>,

    /// Mean of the simulated fold score
    #[arg(long, allow_negative_numbers = true)]
    mu: Option<f64>,

    /// Standard deviation of the simulated fold score
    #[arg(long)]
    sigma: Option<f64>,

    /// Seed for the simulated fold score
    #[arg(long)]
    seed: Option<u64>,

    /// Tracking project
    #[arg(long)]
    project: Option<String>,

    /// Tracking entity (user or team)
    #[arg(long)]
    entity: Option<String>,

    /// Record into an in-process tracker instead of the configured service
    #[arg(long)]
    offline: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default workspace configuration file
    Init,
    /// Show resolved configuration
    Show,
}

fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(log_filter(cli.verbose, cli.quiet)));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "foldsweep", "foldsweep")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "foldsweep.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
