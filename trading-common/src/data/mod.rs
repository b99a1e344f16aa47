//! Canonical market data model
//!
//! Candles, timeframes, immutable batches, OHLC validation and gap detection
//! shared by every ingestion path.

pub mod batch;
pub mod gap_detection;
pub mod types;
pub mod validator;

pub use batch::{CandleBatch, RejectedCandle};
pub use gap_detection::{detect_gaps, Gap, GapDetector, DEFAULT_GAP_TOLERANCE};
pub use types::{
    millis_to_utc, symbol_slug, BookLevel, Candle, CandleKey, DataError, DataResult, OrderBook,
    SeriesKey, Ticker, Timeframe,
};
pub use validator::{validate_candle, CandleViolation};
