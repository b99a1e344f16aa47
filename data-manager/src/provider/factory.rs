//! Connector construction from settings

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use trading_common::error::ConfigurationError;

use super::binance::BinanceConnector;
use super::coinbase::CoinbaseConnector;
use super::{ExchangeConnector, ProviderResult};
use crate::config::{HttpSettings, Settings};

/// Exchanges with a REST connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Coinbase,
}

impl Exchange {
    pub const ALL: [Exchange; 2] = [Exchange::Binance, Exchange::Coinbase];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Coinbase => "coinbase",
        }
    }

    pub fn http_settings(&self, settings: &Settings) -> HttpSettings {
        match self {
            Exchange::Binance => HttpSettings::from(&settings.binance),
            Exchange::Coinbase => HttpSettings::from(&settings.coinbase),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "coinbase" => Ok(Exchange::Coinbase),
            other => Err(ConfigurationError::invalid_value(
                "exchange",
                format!("unknown exchange '{}' (expected binance or coinbase)", other),
            )),
        }
    }
}

/// Build the connector for `exchange` from the loaded settings.
pub fn create_connector(
    exchange: Exchange,
    settings: &Settings,
) -> ProviderResult<Arc<dyn ExchangeConnector>> {
    let http = exchange.http_settings(settings);
    Ok(match exchange {
        Exchange::Binance => Arc::new(BinanceConnector::new(http)?),
        Exchange::Coinbase => Arc::new(CoinbaseConnector::new(http)?),
    })
}
