//! Time-series store for canonical candles
//!
//! SQLite through `sqlx`: transactional insert-with-dedup, range queries,
//! coverage, gap detection and integrity validation.

mod schema;
mod store;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use trading_common::data::{CandleViolation, SeriesKey};
use trading_common::error::{ErrorCategory, ErrorClassification};

pub use schema::OBJECTS as SCHEMA_OBJECTS;
pub use store::TimeSeriesStore;

/// Store errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row in the batch broke an OHLC invariant; nothing was written
    #[error("Invalid candle at index {index} ({timestamp}): {violation}")]
    InvalidCandle {
        index: usize,
        timestamp: DateTime<Utc>,
        violation: CandleViolation,
    },

    /// A stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorClassification for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Database(sqlx::Error::PoolTimedOut) => ErrorCategory::ResourceExhausted,
            StoreError::Database(sqlx::Error::Configuration(_)) => ErrorCategory::Configuration,
            StoreError::Database(_) => ErrorCategory::Transient,
            StoreError::InvalidCandle { .. } => ErrorCategory::Permanent,
            StoreError::Corrupt(_) => ErrorCategory::Internal,
            StoreError::Io(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            StoreError::Database(_) => Some(Duration::from_millis(500)),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Collision policy for `insert`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertMode {
    /// Last write wins
    #[default]
    Replace,
    /// First write wins; colliding rows are skipped
    Ignore,
}

/// One row of the coverage report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRow {
    pub series: SeriesKey,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    pub total_candles: u64,
    pub days_covered: i64,
}

/// Per-series bookkeeping kept in step with every insert
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMetadata {
    pub series: SeriesKey,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    pub total_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Result of `validate_integrity`. Issues are data, not errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegritySummary {
    pub series: SeriesKey,
    pub total_records: u64,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub invalid_ohlc_count: u64,
    pub duplicate_count: u64,
    pub gap_count: u64,
    pub missing_candles: i64,
    pub validated_at: DateTime<Utc>,
}

impl IntegritySummary {
    pub fn has_issues(&self) -> bool {
        self.invalid_ohlc_count > 0 || self.duplicate_count > 0 || self.gap_count > 0
    }
}
