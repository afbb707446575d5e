//! Runtime Inspector CLI
//!
//! Launches a program under a debug adapter, waits for it to pause and
//! prints a normalized, bounded view of its variables.

use std::path::PathBuf;

use clap::Parser;
use inspector::common::{config::Config, logging, paths};
use inspector::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "inspector", about = "Runtime variable inspector for DAP sessions")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to a file (default location when given without a path)
    #[arg(long, global = true, num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let log_file = match cli.log_file {
        Some(Some(path)) => Some(path),
        Some(None) => paths::default_log_file(),
        None => config.logging.file.clone(),
    };
    let _guard = match log_file {
        Some(path) => logging::init_with_file(&path),
        None => {
            logging::init_cli();
            None
        }
    };

    if let Err(e) = cli::dispatch(cli.command, &config).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
