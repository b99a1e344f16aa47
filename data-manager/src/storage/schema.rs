//! SQLite schema for the time-series store
//!
//! Prices and volumes are stored as canonical decimal text so no precision
//! is lost; timestamps are epoch milliseconds.

pub(crate) const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ohlcv (
        exchange TEXT NOT NULL,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        open TEXT NOT NULL,
        high TEXT NOT NULL,
        low TEXT NOT NULL,
        close TEXT NOT NULL,
        volume TEXT NOT NULL,
        quote_volume TEXT,
        trades_count INTEGER,
        taker_buy_volume TEXT,
        taker_buy_quote_volume TEXT,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (exchange, symbol, timeframe, timestamp)
    ) WITHOUT ROWID
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ohlcv_symbol_time ON ohlcv (symbol, timeframe, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_ohlcv_exchange_symbol ON ohlcv (exchange, symbol)",
    r#"
    CREATE TABLE IF NOT EXISTS ohlcv_metadata (
        exchange TEXT NOT NULL,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        first_timestamp INTEGER NOT NULL,
        last_timestamp INTEGER NOT NULL,
        total_count INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (exchange, symbol, timeframe)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS data_quality_metadata (
        exchange TEXT NOT NULL,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        first_timestamp INTEGER,
        last_timestamp INTEGER,
        total_records INTEGER NOT NULL,
        gaps_detected INTEGER NOT NULL,
        duplicates_detected INTEGER NOT NULL,
        anomalies_detected INTEGER NOT NULL,
        last_validation INTEGER NOT NULL,
        PRIMARY KEY (exchange, symbol, timeframe)
    )
    "#,
    r#"
    CREATE VIEW IF NOT EXISTS latest_candles AS
    SELECT o.*
    FROM ohlcv o
    JOIN (
        SELECT exchange, symbol, timeframe, MAX(timestamp) AS latest
        FROM ohlcv
        GROUP BY exchange, symbol, timeframe
    ) m
      ON o.exchange = m.exchange
     AND o.symbol = m.symbol
     AND o.timeframe = m.timeframe
     AND o.timestamp = m.latest
    "#,
];

/// Tables and views created by `init_schema`
pub const OBJECTS: &[&str] = &[
    "ohlcv",
    "ohlcv_metadata",
    "data_quality_metadata",
    "latest_candles",
];
