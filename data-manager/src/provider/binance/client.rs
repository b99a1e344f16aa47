//! Binance spot REST connector

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use trading_common::data::{CandleBatch, OrderBook, Ticker, Timeframe};

use super::types::{parse_levels, DepthSnapshot, ExchangeInfo, KlineRow, Ticker24h};
use crate::config::HttpSettings;
use crate::provider::http::RestClient;
use crate::provider::symbol::Pair;
use crate::provider::{ExchangeConnector, ProviderResult};

/// Binance serves at most 5000 depth levels
const MAX_DEPTH: usize = 5000;

pub struct BinanceConnector {
    rest: RestClient,
    settings: HttpSettings,
    symbols: RwLock<Option<Arc<Vec<String>>>>,
}

impl BinanceConnector {
    pub fn new(settings: HttpSettings) -> ProviderResult<Self> {
        Ok(Self {
            rest: RestClient::new(&settings)?,
            settings,
            symbols: RwLock::new(None),
        })
    }

    async fn load_symbols(&self) -> ProviderResult<Arc<Vec<String>>> {
        if let Some(cached) = self.symbols.read().clone() {
            return Ok(cached);
        }

        let info: ExchangeInfo = self.rest.get_json("/api/v3/exchangeInfo", &[]).await?;
        let mut symbols: Vec<String> = info
            .symbols
            .iter()
            .filter(|s| s.is_trading())
            .map(|s| Pair::from_parts(&s.base_asset, &s.quote_asset).canonical())
            .collect();
        symbols.sort();
        debug!(count = symbols.len(), "loaded binance symbols");

        let symbols = Arc::new(symbols);
        *self.symbols.write() = Some(symbols.clone());
        Ok(symbols)
    }
}

#[async_trait]
impl ExchangeConnector for BinanceConnector {
    fn exchange_id(&self) -> &str {
        "binance"
    }

    fn max_page_size(&self) -> usize {
        self.settings.max_page_size
    }

    fn page_delay(&self) -> Duration {
        self.settings.page_delay()
    }

    fn get_timeframes(&self) -> Vec<Timeframe> {
        Timeframe::ALL.to_vec()
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

        let mut params = vec![
            ("symbol", pair.binance()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            params.push(("startTime", since.timestamp_millis().to_string()));
        }

        let rows: Vec<KlineRow> = self.rest.get_json("/api/v3/klines", &params).await?;
        if rows.is_empty() {
            warn!(symbol = %pair.canonical(), timeframe = %timeframe, ?since, "no klines returned");
        }

        let canonical = pair.canonical();
        let candles = rows
            .into_iter()
            .map(|row| row.into_candle(&canonical, timeframe))
            .collect::<ProviderResult<Vec<_>>>()?;

        debug!(symbol = %canonical, timeframe = %timeframe, count = candles.len(), "fetched klines");
        Ok(CandleBatch::new(candles))
    }

    async fn fetch_ticker(&self, symbol: &str) -> ProviderResult<Ticker> {
        let pair = Pair::parse(symbol)?;
        let raw: Ticker24h = self
            .rest
            .get_json("/api/v3/ticker/24hr", &[("symbol", pair.binance())])
            .await?;
        raw.into_ticker(&pair.canonical())
    }

    async fn fetch_order_book(&self, symbol: &str, limit: usize) -> ProviderResult<OrderBook> {
        let pair = Pair::parse(symbol)?;
        let depth: DepthSnapshot = self
            .rest
            .get_json(
                "/api/v3/depth",
                &[
                    ("symbol", pair.binance()),
                    ("limit", limit.clamp(1, MAX_DEPTH).to_string()),
                ],
            )
            .await?;

        Ok(OrderBook {
            exchange: "binance".to_string(),
            symbol: pair.canonical(),
            bids: parse_levels(&depth.bids)?,
            asks: parse_levels(&depth.asks)?,
            timestamp: Utc::now(),
        })
    }

    async fn get_symbols(&self) -> ProviderResult<Vec<String>> {
        Ok(self.load_symbols().await?.as_ref().clone())
    }

    async fn validate_symbol(&self, symbol: &str) -> ProviderResult<bool> {
        let canonical = match Pair::parse(symbol) {
            Ok(pair) => pair.canonical(),
            Err(_) => return Ok(false),
        };
        Ok(self.load_symbols().await?.binary_search(&canonical).is_ok())
    }
}
