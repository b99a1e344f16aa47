//! Data Manager CLI
//!
//! Provides commands for:
//! - `backfill`: fetch a historical range into the store
//! - `live`: stream closed candles into the store
//! - `validate`: integrity report with scriptable exit codes
//! - `compact`: merge small archive files
//! - `init-db`, `coverage`: database housekeeping

use anyhow::Result;
use clap::Parser;
use tracing::error;

use data_manager::cli::Cli;
use data_manager::config::Settings;
use trading_common::logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_logging(LogConfig::from_env()).map_err(|e| anyhow::anyhow!(e))?;

    let cli = Cli::parse();
    let failure_code = cli.failure_code();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "failed to load settings");
            std::process::exit(failure_code);
        }
    };

    match cli.run(&settings).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("command failed: {:#}", e);
            std::process::exit(failure_code);
        }
    }
}
