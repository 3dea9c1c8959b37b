//! Price bars and the reduced tail representation.

use serde::{Deserialize, Serialize};

/// One OHLC(V) price sample.
///
/// Bars are kept time-ascending; `ts` is a Unix timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl Bar {
    pub fn new(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: Option<f64>) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Reduce this bar to the `(ts, close)` pair the feature pipelines consume.
    pub fn tail_point(&self) -> TailPoint {
        TailPoint(self.ts as f64, self.close)
    }
}

/// `(timestamp, close)` pair, serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TailPoint(pub f64, pub f64);

impl TailPoint {
    pub fn ts(&self) -> f64 {
        self.0
    }

    pub fn close(&self) -> f64 {
        self.1
    }
}

/// Take the last `len` bars as tail points.
pub fn tail_from_bars(bars: &[Bar], len: usize) -> Vec<TailPoint> {
    let start = bars.len().saturating_sub(len);
    bars[start..].iter().map(Bar::tail_point).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, close: f64) -> Bar {
        Bar::new(ts, close, close + 1.0, close - 1.0, close, Some(10.0))
    }

    #[test]
    fn test_tail_takes_last_points() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i * 1000, 100.0 + i as f64)).collect();
        let tail = tail_from_bars(&bars, 3);

        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0], TailPoint(7000.0, 107.0));
        assert_eq!(tail[2].close(), 109.0);
    }

    #[test]
    fn test_tail_shorter_than_requested() {
        let bars = vec![bar(0, 1.0), bar(1, 2.0)];
        assert_eq!(tail_from_bars(&bars, 128).len(), 2);
        assert!(tail_from_bars(&[], 128).is_empty());
    }

    #[test]
    fn test_tail_point_serializes_as_array() {
        let json = serde_json::to_string(&TailPoint(1.0, 2.5)).unwrap();
        assert_eq!(json, "[1.0,2.5]");
    }
}
