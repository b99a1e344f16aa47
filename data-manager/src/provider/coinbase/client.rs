//! Coinbase Exchange REST connector

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use trading_common::data::{CandleBatch, OrderBook, Ticker, Timeframe};

use super::types::{parse_book_levels, CandleRow, Product, ProductBook, ProductTicker};
use crate::config::HttpSettings;
use crate::provider::http::RestClient;
use crate::provider::symbol::Pair;
use crate::provider::{ExchangeConnector, ProviderError, ProviderResult};

/// Granularities the candles endpoint accepts
const TIMEFRAMES: [Timeframe; 6] = [
    Timeframe::OneMinute,
    Timeframe::FiveMinutes,
    Timeframe::FifteenMinutes,
    Timeframe::OneHour,
    Timeframe::SixHours,
    Timeframe::OneDay,
];

pub struct CoinbaseConnector {
    rest: RestClient,
    settings: HttpSettings,
}

impl CoinbaseConnector {
    pub fn new(settings: HttpSettings) -> ProviderResult<Self> {
        Ok(Self {
            rest: RestClient::new(&settings)?,
            settings,
        })
    }
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ExchangeConnector for CoinbaseConnector {
    fn exchange_id(&self) -> &str {
        "coinbase"
    }

    fn max_page_size(&self) -> usize {
        self.settings.max_page_size
    }

    fn page_delay(&self) -> Duration {
        self.settings.page_delay()
    }

    fn get_timeframes(&self) -> Vec<Timeframe> {
        TIMEFRAMES.to_vec()
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> ProviderResult<CandleBatch> {
        self.ensure_timeframe(timeframe)?;
        let pair = Pair::parse(symbol)?;
        let limit = self.clamp_limit(limit);

        let mut params = vec![("granularity", timeframe.as_secs().to_string())];
        if let Some(since) = since {
            // Both bounds are inclusive, so `limit` buckets span limit - 1 widths
            let span = chrono::Duration::seconds(timeframe.as_secs() * (limit as i64 - 1));
            params.push(("start", iso(since)));
            params.push(("end", iso(since + span)));
        }

        let path = format!("/products/{}/candles", pair.coinbase());
        let rows: Vec<CandleRow> = self.rest.get_json(&path, &params).await?;
        if rows.is_empty() {
            warn!(symbol = %pair.canonical(), timeframe = %timeframe, ?since, "no candles returned");
        }

        let canonical = pair.canonical();
        let mut candles = rows
            .into_iter()
            .map(|row| row.into_candle(&canonical, timeframe))
            .collect::<ProviderResult<Vec<_>>>()?;
        // Newest first on the wire
        candles.sort_by_key(|c| c.timestamp);
        if let Some(since) = since {
            candles.retain(|c| c.timestamp >= since);
        }
        candles.truncate(limit);

        debug!(symbol = %canonical, timeframe = %timeframe, count = candles.len(), "fetched candles");
        Ok(CandleBatch::new(candles))
    }

    async fn fetch_ticker(&self, symbol: &str) -> ProviderResult<Ticker> {
        let pair = Pair::parse(symbol)?;
        let path = format!("/products/{}/ticker", pair.coinbase());
        let raw: ProductTicker = self.rest.get_json(&path, &[]).await?;
        raw.into_ticker(&pair.canonical())
    }

    async fn fetch_order_book(&self, symbol: &str, limit: usize) -> ProviderResult<OrderBook> {
        if limit == 0 {
            return Err(ProviderError::InvalidArgument(
                "order book limit must be positive".to_string(),
            ));
        }
        let pair = Pair::parse(symbol)?;
        let path = format!("/products/{}/book", pair.coinbase());
        let book: ProductBook = self
            .rest
            .get_json(&path, &[("level", "2".to_string())])
            .await?;

        let mut bids = parse_book_levels(&book.bids)?;
        let mut asks = parse_book_levels(&book.asks)?;
        bids.truncate(limit);
        asks.truncate(limit);

        Ok(OrderBook {
            exchange: "coinbase".to_string(),
            symbol: pair.canonical(),
            bids,
            asks,
            timestamp: Utc::now(),
        })
    }

    async fn get_symbols(&self) -> ProviderResult<Vec<String>> {
        let products: Vec<Product> = self.rest.get_json("/products", &[]).await?;
        let mut symbols: Vec<String> = products
            .iter()
            .filter(|p| p.is_online())
            .map(|p| Pair::from_parts(&p.base_currency, &p.quote_currency).canonical())
            .collect();
        symbols.sort();
        debug!(count = symbols.len(), "loaded coinbase products");
        Ok(symbols)
    }

    async fn validate_symbol(&self, symbol: &str) -> ProviderResult<bool> {
        match Pair::parse(symbol) {
            Ok(pair) => Ok(self.get_symbols().await?.contains(&pair.canonical())),
            Err(_) => Ok(false),
        }
    }
}
