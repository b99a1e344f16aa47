//! Exchange connectors
//!
//! One `ExchangeConnector` implementation per exchange, a shared REST layer
//! and a scripted stub for tests and offline runs.

pub mod binance;
pub mod coinbase;
mod factory;
pub mod http;
pub mod mock;
pub mod symbol;
mod traits;

use std::str::FromStr;

use rust_decimal::Decimal;

pub use factory::{create_connector, Exchange};
pub use symbol::Pair;
pub use traits::*;

/// Parse a decimal string field from an exchange payload.
pub(crate) fn decimal(field: &str, raw: &str) -> ProviderResult<Decimal> {
    Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .map_err(|e| ProviderError::Parse(format!("field '{}' = '{}': {}", field, raw, e)))
}

/// Parse a JSON number or numeric string into a decimal without going
/// through `f64`.
pub(crate) fn decimal_value(field: &str, value: &serde_json::Value) -> ProviderResult<Decimal> {
    match value {
        serde_json::Value::Number(n) => decimal(field, &n.to_string()),
        serde_json::Value::String(s) => decimal(field, s),
        other => Err(ProviderError::Parse(format!(
            "field '{}' is not numeric: {}",
            field, other
        ))),
    }
}
