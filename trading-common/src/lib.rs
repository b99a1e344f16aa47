// trading-common: candle model, validation, retry and logging primitives
// shared by the data-manager ingestion pipeline

pub mod data;
pub mod error;
pub mod logging;
pub mod retry;
