//! Immutable candle batches
//!
//! Every transformation returns a new batch; nothing mutates a batch that
//! another task may be holding.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use super::types::{Candle, CandleKey};
use super::validator::CandleViolation;

/// A candle that failed validation, with the reason
#[derive(Debug, Clone, Serialize)]
pub struct RejectedCandle {
    pub candle: Candle,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandleBatch {
    candles: Arc<[Candle]>,
}

impl CandleBatch {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles: candles.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.to_vec()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.iter().map(|c| c.timestamp).min()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.iter().map(|c| c.timestamp).max()
    }

    /// Collapse rows sharing a key, keeping the first occurrence. Order of survivors is preserved.
    pub fn dedup_keep_first(&self) -> Self {
        let mut seen = HashSet::with_capacity(self.len());
        let kept = self
            .candles
            .iter()
            .filter(|c| seen.insert(c.key()))
            .cloned()
            .collect();
        Self::new(kept)
    }

    /// Collapse rows sharing a key, keeping the last occurrence at the position of the first.
    pub fn dedup_keep_last(&self) -> Self {
        let mut slots: HashMap<CandleKey, usize> = HashMap::with_capacity(self.len());
        let mut kept: Vec<Candle> = Vec::with_capacity(self.len());
        for candle in self.candles.iter() {
            match slots.get(&candle.key()) {
                Some(&idx) => kept[idx] = candle.clone(),
                None => {
                    slots.insert(candle.key(), kept.len());
                    kept.push(candle.clone());
                }
            }
        }
        Self::new(kept)
    }

    /// Ascending by timestamp; stable, so equal timestamps keep their relative order.
    pub fn sorted(&self) -> Self {
        let mut candles = self.to_vec();
        candles.sort_by_key(|c| c.timestamp);
        Self::new(candles)
    }

    /// Split into a batch of valid candles and the rejected rows.
    pub fn partition_valid(&self) -> (Self, Vec<RejectedCandle>) {
        let mut valid = Vec::with_capacity(self.len());
        let mut rejected = Vec::new();
        for candle in self.candles.iter() {
            match candle.validate() {
                Ok(()) => valid.push(candle.clone()),
                Err(violation) => rejected.push(RejectedCandle {
                    candle: candle.clone(),
                    reason: violation.to_string(),
                }),
            }
        }
        (Self::new(valid), rejected)
    }

    /// First violation in the batch, if any.
    pub fn first_violation(&self) -> Option<(usize, CandleViolation)> {
        self.candles
            .iter()
            .enumerate()
            .find_map(|(idx, c)| c.validate().err().map(|v| (idx, v)))
    }

    /// Group by calendar month of the candle timestamp, months ascending.
    pub fn split_by_month(&self) -> Vec<(i32, u32, CandleBatch)> {
        let mut groups: BTreeMap<(i32, u32), Vec<Candle>> = BTreeMap::new();
        for candle in self.candles.iter() {
            let ts = candle.timestamp;
            groups
                .entry((ts.year(), ts.month()))
                .or_default()
                .push(candle.clone());
        }
        groups
            .into_iter()
            .map(|((year, month), candles)| (year, month, CandleBatch::new(candles)))
            .collect()
    }

    /// Concatenate two batches into a new one.
    pub fn concat(&self, other: &CandleBatch) -> Self {
        let mut candles = Vec::with_capacity(self.len() + other.len());
        candles.extend_from_slice(&self.candles);
        candles.extend_from_slice(&other.candles);
        Self::new(candles)
    }
}

impl Default for CandleBatch {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<Candle>> for CandleBatch {
    fn from(candles: Vec<Candle>) -> Self {
        Self::new(candles)
    }
}

impl FromIterator<Candle> for CandleBatch {
    fn from_iter<I: IntoIterator<Item = Candle>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CandleBatch {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::Timeframe;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle_at(minutes: i64, close: Decimal) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 1, 31, 23, 58, 0).unwrap();
        Candle::new(
            "binance",
            "ETH/USDT",
            Timeframe::OneMinute,
            base + Duration::minutes(minutes),
            dec!(100),
            dec!(120),
            dec!(90),
            close,
            dec!(3),
        )
    }

    #[test]
    fn test_dedup_keep_first_and_last() {
        let batch = CandleBatch::new(vec![
            candle_at(0, dec!(101)),
            candle_at(1, dec!(102)),
            candle_at(0, dec!(103)),
        ]);

        let first = batch.dedup_keep_first();
        assert_eq!(first.len(), 2);
        assert_eq!(first.as_slice()[0].close, dec!(101));

        let last = batch.dedup_keep_last();
        assert_eq!(last.len(), 2);
        assert_eq!(last.as_slice()[0].close, dec!(103));
        assert_eq!(last.as_slice()[1].close, dec!(102));

        // source batch untouched
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_sorted() {
        let batch = CandleBatch::new(vec![
            candle_at(3, dec!(101)),
            candle_at(1, dec!(101)),
            candle_at(2, dec!(101)),
        ]);
        let ts: Vec<_> = batch.sorted().iter().map(|c| c.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_partition_valid() {
        let mut bad = candle_at(2, dec!(101));
        bad.high = dec!(50);
        let batch = CandleBatch::new(vec![candle_at(0, dec!(101)), bad, candle_at(1, dec!(99))]);

        let (valid, rejected) = batch.partition_valid();
        assert_eq!(valid.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].reason.contains("high"));
        assert_eq!(batch.first_violation().map(|(idx, _)| idx), Some(1));
    }

    #[test]
    fn test_split_by_month() {
        // 23:58, 23:59 on Jan 31 and 00:00, 00:01 on Feb 1
        let batch: CandleBatch = (0..4).map(|m| candle_at(m, dec!(100))).collect();
        let groups = batch.split_by_month();
        assert_eq!(groups.len(), 2);
        assert_eq!((groups[0].0, groups[0].1, groups[0].2.len()), (2024, 1, 2));
        assert_eq!((groups[1].0, groups[1].1, groups[1].2.len()), (2024, 2, 2));
    }
}
