//! OHLCV invariant checks
//!
//! A candle is accepted only when `high >= max(open, close, low)`,
//! `low <= min(open, close, high)` and `volume >= 0`. Optional volume
//! fields must also be non-negative when present.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use super::types::Candle;

/// The first invariant a candle breaks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CandleViolation {
    HighBelowLow { high: Decimal, low: Decimal },
    HighBelowOpen { high: Decimal, open: Decimal },
    HighBelowClose { high: Decimal, close: Decimal },
    LowAboveOpen { low: Decimal, open: Decimal },
    LowAboveClose { low: Decimal, close: Decimal },
    NegativeVolume { volume: Decimal },
    NegativeOptionalVolume { field: &'static str, value: Decimal },
}

impl fmt::Display for CandleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandleViolation::HighBelowLow { high, low } => {
                write!(f, "high {} is below low {}", high, low)
            }
            CandleViolation::HighBelowOpen { high, open } => {
                write!(f, "high {} is below open {}", high, open)
            }
            CandleViolation::HighBelowClose { high, close } => {
                write!(f, "high {} is below close {}", high, close)
            }
            CandleViolation::LowAboveOpen { low, open } => {
                write!(f, "low {} is above open {}", low, open)
            }
            CandleViolation::LowAboveClose { low, close } => {
                write!(f, "low {} is above close {}", low, close)
            }
            CandleViolation::NegativeVolume { volume } => {
                write!(f, "volume {} is negative", volume)
            }
            CandleViolation::NegativeOptionalVolume { field, value } => {
                write!(f, "{} {} is negative", field, value)
            }
        }
    }
}

impl std::error::Error for CandleViolation {}

/// Check a candle against the OHLC invariants.
pub fn validate_candle(candle: &Candle) -> Result<(), CandleViolation> {
    let Candle {
        open,
        high,
        low,
        close,
        volume,
        ..
    } = *candle;

    if high < low {
        return Err(CandleViolation::HighBelowLow { high, low });
    }
    if high < open {
        return Err(CandleViolation::HighBelowOpen { high, open });
    }
    if high < close {
        return Err(CandleViolation::HighBelowClose { high, close });
    }
    if low > open {
        return Err(CandleViolation::LowAboveOpen { low, open });
    }
    if low > close {
        return Err(CandleViolation::LowAboveClose { low, close });
    }
    if volume < Decimal::ZERO {
        return Err(CandleViolation::NegativeVolume { volume });
    }

    let optional = [
        ("quote_volume", candle.quote_volume),
        ("taker_buy_volume", candle.taker_buy_volume),
        ("taker_buy_quote_volume", candle.taker_buy_quote_volume),
    ];
    for (field, value) in optional {
        if let Some(value) = value {
            if value < Decimal::ZERO {
                return Err(CandleViolation::NegativeOptionalVolume { field, value });
            }
        }
    }

    Ok(())
}

impl Candle {
    pub fn validate(&self) -> Result<(), CandleViolation> {
        validate_candle(self)
    }

    pub fn is_valid(&self) -> bool {
        validate_candle(self).is_ok()
    }
}
