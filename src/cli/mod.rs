pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to this file in addition to stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring the dispatcher dashboard
    Run {
        /// Seconds between checks
        #[arg(short, long)]
        interval: Option<u64>,

        /// Run the browser headless
        #[arg(long)]
        headless: bool,

        /// WebDriver endpoint to connect to
        #[arg(long)]
        webdriver_url: Option<String>,
    },

    /// Show the effective configuration
    Config,
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            interval,
            headless,
            webdriver_url,
        } => {
            info!("Starting dispatcher dashboard monitoring");
            commands::run(interval, headless, webdriver_url).await
        }
        Commands::Config => commands::show_config().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }
}
