use anyhow::Result;
use tracing::{error, info};

mod browser;
mod cli;
mod monitor;
mod storage;
mod telegram;
mod utils;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::parse_args();

    // Initialize logging, falling back to the per-user data dir log file
    let log_file = args
        .log_file
        .clone()
        .or_else(|| Some(utils::default_log_file()));
    utils::init_logging(args.verbose, log_file)?;

    info!("Starting Dispatch Monitor v{}", env!("CARGO_PKG_VERSION"));

    // Process commands
    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            Err(e)
        }
    }
}
