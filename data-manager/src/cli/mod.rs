//! Command-line interface
//!
//! One subcommand per pipeline. `Settings` are loaded once in `main` and
//! handed to every command.

pub mod backfill;
pub mod compact;
pub mod coverage;
pub mod init_db;
pub mod live;
pub mod validate;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Settings;
use crate::storage::TimeSeriesStore;
use crate::validation::EXIT_FAILED;

/// Data Manager CLI
#[derive(Parser)]
#[command(name = "data-manager")]
#[command(about = "Crypto OHLCV ingestion, storage and archive maintenance")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backfill historical candles for one series
    Backfill(backfill::BackfillArgs),
    /// Stream closed candles from Binance into the store
    Live(live::LiveArgs),
    /// Check every stored series. Exits 0 when clean, 1 on issues, 2 on failure
    Validate(validate::ValidateArgs),
    /// Merge small parquet files in the archive
    Compact(compact::CompactArgs),
    /// Create the database schema
    InitDb,
    /// Print the stored date range per series
    Coverage,
}

impl Cli {
    /// Run the selected command. Returns the process exit code.
    pub async fn run(self, settings: &Settings) -> Result<i32> {
        match self.command {
            Commands::Backfill(args) => backfill::execute(args, settings).await,
            Commands::Live(args) => live::execute(args, settings).await,
            Commands::Validate(args) => Ok(validate::execute(args, settings).await),
            Commands::Compact(args) => compact::execute(args, settings),
            Commands::InitDb => init_db::execute(settings).await,
            Commands::Coverage => coverage::execute(settings).await,
        }
    }

    /// Exit code used when the command cannot start or fails outright
    pub fn failure_code(&self) -> i32 {
        match self.command {
            Commands::Validate(_) => EXIT_FAILED,
            _ => 1,
        }
    }
}

/// Open the configured store and make sure the schema exists
pub(crate) async fn open_store(settings: &Settings) -> Result<Arc<TimeSeriesStore>> {
    let path = &settings.storage.database_path;
    let store = TimeSeriesStore::open(&settings.storage)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    store.init_schema().await?;
    Ok(Arc::new(store))
}

/// Broadcast sender that fires once on Ctrl-C
pub(crate) fn shutdown_on_ctrl_c() -> broadcast::Sender<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("received shutdown signal");
        let _ = signal_tx.send(());
    });
    shutdown_tx
}
