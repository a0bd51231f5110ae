use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod audit;
mod cli;
mod config;
mod history;
mod logging;
mod media;
mod security;
mod utils;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: cli::Command,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config_path = config::resolve_config_path(args.config.as_deref());

    // Logging settings are read before the subscriber exists; problems with the
    // file are reported once logging is up.
    let logging_config = config::Config::from_file(&config_path)
        .map(|config| config.logging)
        .unwrap_or_default();
    let _guard = logging::init_logging(&logging_config)?;

    debug!("Using config file: {}", config_path.display());
    let config = config::ConfigManager::load(config_path);
    let history = history::DownloadHistory::load(history::default_history_path());

    cli::run(args.command, config, history).await
}
