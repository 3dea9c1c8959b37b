//! Market data adapter contract.
//!
//! Network providers live outside this crate; the orchestrator only needs
//! something that turns a [`TimeseriesRequest`] into bars or a typed error.

use std::fmt;

use async_trait::async_trait;
use forecast_core::{Bar, Provider, Timeframe};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Largest `limit` a request may ask for.
pub const MAX_LIMIT: u32 = 2000;
/// Largest bar array accepted from a provider.
pub const MAX_BARS: usize = 50_000;

/// Bars wanted from a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeseriesRequest {
    pub symbol: String,
    pub provider: Provider,
    pub timeframe: Timeframe,
    /// Number of most recent bars.
    pub limit: u32,
}

impl TimeseriesRequest {
    /// Reject empty symbols and limits outside `1..=MAX_LIMIT`.
    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.symbol.trim().is_empty() || self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(AdapterError::new(
                AdapterErrorCode::InvalidParams,
                "Invalid market adapter request params",
            ));
        }
        Ok(())
    }
}

/// Where a timeseries came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSource {
    Network,
    /// Generated in-process.
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketTimeseries {
    pub bars: Vec<Bar>,
    pub symbol: String,
    pub provider: Provider,
    pub timeframe: Timeframe,
    pub source: MarketSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorCode {
    InvalidParams,
    UnsupportedProvider,
    ProviderError,
    NormalizationError,
}

impl AdapterErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterErrorCode::InvalidParams => "INVALID_PARAMS",
            AdapterErrorCode::UnsupportedProvider => "UNSUPPORTED_PROVIDER",
            AdapterErrorCode::ProviderError => "PROVIDER_ERROR",
            AdapterErrorCode::NormalizationError => "NORMALIZATION_ERROR",
        }
    }
}

impl fmt::Display for AdapterErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error-shaped adapter result.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct AdapterError {
    pub code: AdapterErrorCode,
    pub message: String,
}

impl AdapterError {
    pub fn new(code: AdapterErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Source of market bars.
#[async_trait]
pub trait MarketAdapter: Send + Sync {
    /// Fetch bars for `request`. Implementations should stop early once
    /// `cancel` fires.
    async fn get_market_timeseries(
        &self,
        request: &TimeseriesRequest,
        cancel: &CancellationToken,
    ) -> Result<MarketTimeseries, AdapterError>;
}

fn normalization_error() -> AdapterError {
    AdapterError::new(
        AdapterErrorCode::NormalizationError,
        "Failed to normalize provider data",
    )
}

/// Convert raw `[ts, open, high, low, close, volume?]` rows into bars.
///
/// Rows must have five or six finite fields with non-negative prices and
/// volume, and timestamps must not decrease.
pub fn normalize_raw_bars(raw: &[Vec<f64>]) -> Result<Vec<Bar>, AdapterError> {
    if raw.len() > MAX_BARS {
        log::warn!("Provider returned {} bars (max {})", raw.len(), MAX_BARS);
        return Err(normalization_error());
    }

    let mut bars = Vec::with_capacity(raw.len());
    for row in raw {
        let (ts, o, h, l, c, v) = match row.as_slice() {
            [ts, o, h, l, c] => (*ts, *o, *h, *l, *c, None),
            [ts, o, h, l, c, v] => (*ts, *o, *h, *l, *c, Some(*v)),
            _ => {
                log::warn!("Malformed bar with {} fields", row.len());
                return Err(normalization_error());
            }
        };

        let prices_ok = [o, h, l, c].iter().all(|p| p.is_finite() && *p >= 0.0);
        let volume_ok = v.map_or(true, |v| v.is_finite() && v >= 0.0);
        if !ts.is_finite() || !prices_ok || !volume_ok {
            log::warn!("Invalid bar values at ts {}", ts);
            return Err(normalization_error());
        }

        let bar = Bar::new(ts as i64, o, h, l, c, v);
        if bars.last().is_some_and(|prev: &Bar| bar.ts < prev.ts) {
            log::warn!("Bars are not time-ascending at ts {}", bar.ts);
            return Err(normalization_error());
        }
        bars.push(bar);
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_with_and_without_volume() {
        let raw = vec![
            vec![1000.0, 1.0, 2.0, 0.5, 1.5],
            vec![2000.0, 1.5, 2.5, 1.0, 2.0, 42.0],
        ];
        let bars = normalize_raw_bars(&raw).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, None);
        assert_eq!(bars[1].volume, Some(42.0));
        assert_eq!(bars[1].close, 2.0);
    }

    #[test]
    fn test_normalize_rejects_bad_shape() {
        let err = normalize_raw_bars(&[vec![1.0, 2.0, 3.0]]).unwrap_err();
        assert_eq!(err.code, AdapterErrorCode::NormalizationError);
    }

    #[test]
    fn test_normalize_rejects_negative_and_nan() {
        assert!(normalize_raw_bars(&[vec![1.0, -1.0, 2.0, 0.5, 1.5]]).is_err());
        assert!(normalize_raw_bars(&[vec![1.0, 1.0, f64::NAN, 0.5, 1.5]]).is_err());
        assert!(normalize_raw_bars(&[vec![1.0, 1.0, 2.0, 0.5, 1.5, -3.0]]).is_err());
    }

    #[test]
    fn test_normalize_rejects_decreasing_timestamps() {
        let raw = vec![vec![2000.0, 1.0, 2.0, 0.5, 1.5], vec![1000.0, 1.0, 2.0, 0.5, 1.5]];
        assert!(normalize_raw_bars(&raw).is_err());
    }

    #[test]
    fn test_equal_timestamps_allowed() {
        let raw = vec![vec![1000.0, 1.0, 2.0, 0.5, 1.5], vec![1000.0, 1.0, 2.0, 0.5, 1.5]];
        assert_eq!(normalize_raw_bars(&raw).unwrap().len(), 2);
    }

    #[test]
    fn test_request_validation() {
        let mut req = TimeseriesRequest {
            symbol: "SBER".into(),
            provider: Provider::Moex,
            timeframe: Timeframe::Day1,
            limit: 200,
        };
        assert!(req.validate().is_ok());
        req.limit = 0;
        assert_eq!(req.validate().unwrap_err().code, AdapterErrorCode::InvalidParams);
        req.limit = MAX_LIMIT + 1;
        assert!(req.validate().is_err());
        req.limit = 10;
        req.symbol = "  ".into();
        assert!(req.validate().is_err());
    }
}
