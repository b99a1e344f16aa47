//! # Data Manager
//!
//! Crypto OHLCV ingestion and storage.
//!
//! ## Features
//!
//! - **Exchange connectors**: Binance and Coinbase REST adapters behind one
//!   [`provider::ExchangeConnector`] trait
//! - **Range fetching**: paginated historical fetches with retry and per-page
//!   failure isolation
//! - **Live streaming**: Binance WebSocket client with reconnect and
//!   resubscription, buffered into the store
//! - **Storage**: SQLite time-series store with transactional upserts, gap and
//!   integrity checks, and a monthly-partitioned parquet archive
//! - **Recovery**: per-series checkpoints for resumable backfills and a
//!   dead-letter directory for rows that cannot be stored
//!
//! ## Architecture
//!
//! Connector or stream client → [`trading_common::data::CandleBatch`] →
//! validation → [`storage::TimeSeriesStore`] → optional
//! [`archive::ColumnarArchive`] mirror. Failures route to a checkpoint (retry
//! point) or the dead-letter store (terminal).

pub mod archive;
pub mod backfill;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod live;
pub mod provider;
pub mod storage;
pub mod stream;
pub mod validation;

// Re-export commonly used types
pub use archive::ColumnarArchive;
pub use backfill::{BackfillPipeline, BackfillReport, BackfillRequest};
pub use checkpoint::{CheckpointStore, DeadLetterStore};
pub use config::{LiveConfig, Settings};
pub use error::{PipelineError, PipelineResult};
pub use fetcher::{RangeFetcher, RangeRequest};
pub use live::LivePipeline;
pub use provider::{create_connector, Exchange, ExchangeConnector, ProviderError, ProviderResult};
pub use storage::{InsertMode, TimeSeriesStore};
pub use stream::{StreamClient, StreamEvent};
pub use validation::ValidationPipeline;
