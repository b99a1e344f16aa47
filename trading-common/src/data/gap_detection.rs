//! Candle gap detection
//!
//! A gap is reported between two consecutive candles whose distance exceeds
//! the tolerance factor times the nominal interval (1.5x by default, which
//! absorbs small exchange-side jitter without flagging every boundary).

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::types::Timeframe;

/// Default tolerance: a delta above 1.5 intervals is a gap
pub const DEFAULT_GAP_TOLERANCE: f64 = 1.5;

/// Missing stretch between two present candles
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    /// Timestamp of the last candle before the gap
    pub start: DateTime<Utc>,
    /// Timestamp of the first candle after the gap
    pub end: DateTime<Utc>,
    /// Number of candles absent between `start` and `end`
    pub missing_candles: i64,
}

impl Gap {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Gap detector for one timeframe
#[derive(Debug, Clone, Copy)]
pub struct GapDetector {
    timeframe: Timeframe,
    tolerance: f64,
}

impl GapDetector {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            tolerance: DEFAULT_GAP_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Detect gaps in a series of candle open times.
    ///
    /// Input need not be sorted; duplicates are ignored.
    pub fn detect(&self, timestamps: &[DateTime<Utc>]) -> Vec<Gap> {
        let mut sorted: Vec<i64> = timestamps.iter().map(|t| t.timestamp_millis()).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let interval = self.timeframe.as_millis();
        let threshold = interval as f64 * self.tolerance;

        sorted
            .windows(2)
            .filter_map(|pair| {
                let delta = pair[1] - pair[0];
                if (delta as f64) <= threshold {
                    return None;
                }
                Some(Gap {
                    start: millis(pair[0])?,
                    end: millis(pair[1])?,
                    missing_candles: (delta / interval - 1).max(0),
                })
            })
            .collect()
    }

    /// Total candles missing across a set of gaps
    pub fn total_missing(gaps: &[Gap]) -> i64 {
        gaps.iter().map(|g| g.missing_candles).sum()
    }
}

fn millis(ms: i64) -> Option<DateTime<Utc>> {
    super::types::millis_to_utc(ms).ok()
}

/// Convenience wrapper with the default tolerance
pub fn detect_gaps(timeframe: Timeframe, timestamps: &[DateTime<Utc>]) -> Vec<Gap> {
    GapDetector::new(timeframe).detect(timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minutes(offsets: &[i64]) -> Vec<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        offsets.iter().map(|m| base + Duration::minutes(*m)).collect()
    }

    #[test]
    fn test_detect_no_gaps() {
        let ts = minutes(&[0, 1, 2, 3, 4]);
        assert!(detect_gaps(Timeframe::OneMinute, &ts).is_empty());
    }

    #[test]
    fn test_single_missing_minute() {
        let ts = minutes(&[0, 1, 2, 4, 5]);
        let gaps = detect_gaps(Timeframe::OneMinute, &ts);

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start, ts[2]);
        assert_eq!(gaps[0].end, ts[3]);
        assert_eq!(gaps[0].missing_candles, 1);
        assert_eq!(gaps[0].duration(), Duration::minutes(2));
    }

    #[test]
    fn test_multiple_gaps_and_unsorted_input() {
        let ts = minutes(&[40, 0, 10, 15, 20]);
        let gaps = detect_gaps(Timeframe::FiveMinutes, &ts);

        // 0 -> 10 misses 5; 20 -> 40 misses 25, 30, 35
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].missing_candles, 1);
        assert_eq!(gaps[1].missing_candles, 3);
        assert_eq!(GapDetector::total_missing(&gaps), 4);
    }

    #[test]
    fn test_jitter_below_tolerance_is_not_a_gap() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let ts = vec![base, base + Duration::seconds(85)];
        assert!(detect_gaps(Timeframe::OneMinute, &ts).is_empty());
    }

    #[test]
    fn test_duplicates_ignored() {
        let ts = minutes(&[0, 0, 1, 1, 2]);
        assert!(detect_gaps(Timeframe::OneMinute, &ts).is_empty());
    }

    #[test]
    fn test_custom_tolerance() {
        let ts = minutes(&[0, 2]);
        let detector = GapDetector::new(Timeframe::OneMinute).with_tolerance(2.5);
        assert!(detector.detect(&ts).is_empty());
    }

    #[test]
    fn test_empty_and_single() {
        assert!(detect_gaps(Timeframe::OneHour, &[]).is_empty());
        assert!(detect_gaps(Timeframe::OneHour, &minutes(&[0])).is_empty());
    }
}
