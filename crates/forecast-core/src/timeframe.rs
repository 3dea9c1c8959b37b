//! Forecast timeframes.

use std::fmt;
use std::str::FromStr;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Timeframe enumeration for the supported bar periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    Hour1,
    Hour8,
    Day1,
    Week1,
    Month1, // approximated as 30 days
}

impl Timeframe {
    /// Returns the duration of one bar in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            Timeframe::Hour1 => HOUR_MS,
            Timeframe::Hour8 => 8 * HOUR_MS,
            Timeframe::Day1 => DAY_MS,
            Timeframe::Week1 => 7 * DAY_MS,
            Timeframe::Month1 => 30 * DAY_MS,
        }
    }

    /// Returns the label used in cache keys and requests.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Hour1 => "1h",
            Timeframe::Hour8 => "8h",
            Timeframe::Day1 => "1d",
            Timeframe::Week1 => "7d",
            Timeframe::Month1 => "1mo",
        }
    }

    /// Returns all available timeframes in order.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::Hour1,
            Timeframe::Hour8,
            Timeframe::Day1,
            Timeframe::Week1,
            Timeframe::Month1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a timeframe label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeframeError(pub String);

impl fmt::Display for ParseTimeframeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported timeframe: {}", self.0)
    }
}

impl std::error::Error for ParseTimeframeError {}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::all()
            .iter()
            .copied()
            .find(|tf| tf.label() == s)
            .ok_or_else(|| ParseTimeframeError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        for tf in Timeframe::all() {
            assert_eq!(tf.label().parse::<Timeframe>().unwrap(), *tf);
        }
    }

    #[test]
    fn test_millis() {
        assert_eq!(Timeframe::Hour1.millis(), 3_600_000);
        assert_eq!(Timeframe::Hour8.millis(), 8 * 3_600_000);
        assert_eq!(Timeframe::Month1.millis(), 30 * 86_400_000);
    }

    #[test]
    fn test_unknown_label() {
        assert!("15m".parse::<Timeframe>().is_err());
    }
}
