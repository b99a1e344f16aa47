use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use trading_common::data::{Candle, CandleBatch};

/// A drained slice of the live buffer. `seq` identifies it across retries.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub seq: u64,
    pub candles: CandleBatch,
}

/// Candles received from the stream and not yet flushed.
///
/// Appends come from stream handlers, drains from the flush task. Both take
/// the same lock, so a drain never sees a half-appended state and an append
/// never lands in a batch that was already taken.
#[derive(Debug)]
pub struct LiveBuffer {
    candles: Mutex<Vec<Candle>>,
    max_size: usize,
    next_seq: AtomicU64,
    full: Notify,
}

impl LiveBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            candles: Mutex::new(Vec::with_capacity(max_size)),
            max_size: max_size.max(1),
            next_seq: AtomicU64::new(1),
            full: Notify::new(),
        }
    }

    /// Append one candle. Wakes the flush task once the size threshold is hit.
    pub fn push(&self, candle: Candle) -> bool {
        let len = {
            let mut candles = self.candles.lock();
            candles.push(candle);
            candles.len()
        };
        let full = len >= self.max_size;
        if full {
            self.full.notify_one();
        }
        full
    }

    pub fn len(&self) -> usize {
        self.candles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Take everything buffered so far as one batch.
    pub fn drain(&self) -> Option<PendingBatch> {
        let taken = std::mem::take(&mut *self.candles.lock());
        if taken.is_empty() {
            return None;
        }
        Some(PendingBatch {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            candles: CandleBatch::new(taken),
        })
    }

    /// Resolves after a `push` crossed the size threshold.
    pub async fn filled(&self) {
        self.full.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use trading_common::data::Timeframe;

    fn candle(minute: u32) -> Candle {
        Candle::new(
            "binance",
            "BTC/USDT",
            Timeframe::OneMinute,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            dec!(100),
            dec!(101),
            dec!(99),
            dec!(100.5),
            dec!(2),
        )
    }

    #[test]
    fn test_drain_assigns_increasing_sequence() {
        let buffer = LiveBuffer::new(10);
        assert!(buffer.drain().is_none());

        buffer.push(candle(0));
        buffer.push(candle(1));
        let first = buffer.drain().unwrap();
        assert_eq!(first.candles.len(), 2);
        assert!(buffer.is_empty());

        buffer.push(candle(2));
        let second = buffer.drain().unwrap();
        assert!(second.seq > first.seq);
        assert_eq!(second.candles.len(), 1);
    }

    #[test]
    fn test_push_reports_threshold() {
        let buffer = LiveBuffer::new(2);
        assert!(!buffer.push(candle(0)));
        assert!(buffer.push(candle(1)));
        assert!(buffer.push(candle(2)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_never_lost() {
        let buffer = Arc::new(LiveBuffer::new(1_000_000));
        let mut writers = Vec::new();
        for w in 0..4u32 {
            let buffer = buffer.clone();
            writers.push(std::thread::spawn(move || {
                for i in 0..500u32 {
                    buffer.push(candle((w * 500 + i) % 60));
                }
            }));
        }

        let mut drained = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            if let Some(batch) = buffer.drain() {
                drained += batch.candles.len();
            }
            tokio::task::yield_now().await;
        }
        for w in writers {
            w.join().unwrap();
        }
        if let Some(batch) = buffer.drain() {
            drained += batch.candles.len();
        }
        assert_eq!(drained, 2000);
    }

    #[tokio::test]
    async fn test_filled_wakes_after_threshold() {
        let buffer = Arc::new(LiveBuffer::new(2));
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.filled().await })
        };
        buffer.push(candle(0));
        buffer.push(candle(1));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
