//! Deterministic local market data, no network.
//!
//! Bars are seeded from `symbol:timeframe:limit`, so the same request always
//! yields the same series and different symbols get different price levels.

use async_trait::async_trait;
use forecast_core::{Provider, Timeframe};
use tokio_util::sync::CancellationToken;

use crate::market::{
    normalize_raw_bars, AdapterError, AdapterErrorCode, MarketAdapter, MarketSource, MarketTimeseries,
    TimeseriesRequest,
};

const BASE_EPOCH_MS: i64 = 1_700_000_000_000;
const YEAR_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// 32-bit FNV-1a over UTF-16 code units.
fn hash_seed(input: &str) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for unit in input.encode_utf16() {
        h ^= unit as u32;
        h = h.wrapping_mul(16_777_619);
    }
    h
}

/// Mulberry32 generator yielding values in `[0, 1)`.
struct Mulberry32(u32);

impl Mulberry32 {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_add(0x6d2b_79f5);
        let a = self.0;
        let mut t = (a ^ (a >> 15)).wrapping_mul(1 | a);
        t = t.wrapping_add((t ^ (t >> 7)).wrapping_mul(61 | t)) ^ t;
        (t ^ (t >> 14)) as f64 / 4_294_967_296.0
    }
}

/// Generate raw `[ts, open, high, low, close, volume]` rows, oldest first.
pub fn generate_mock_rows(symbol: &str, timeframe: Timeframe, limit: u32) -> Vec<Vec<f64>> {
    let step = timeframe.millis();
    let seed = hash_seed(&format!("{}:{}:{}", symbol, timeframe.label(), limit));
    let mut rnd = Mulberry32(seed);

    let now = BASE_EPOCH_MS + (seed as i64 % YEAR_MS);
    let end_ts = now.div_euclid(step) * step;
    let mut last_close = 80.0 + (seed % 120) as f64;

    (0..limit as i64)
        .rev()
        .map(|i| {
            let ts = end_ts - i * step;
            let open = last_close;
            let high = open + rnd.next_f64() * 3.0;
            let low = open - rnd.next_f64() * 3.0;
            let close = low + rnd.next_f64() * (high - low);
            let volume = 10.0 + rnd.next_f64() * 100.0;
            last_close = close;
            vec![ts as f64, open, high, low, close, volume]
        })
        .collect()
}

/// Adapter serving [`Provider::Mock`] and [`Provider::Custom`] from the local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockProvider;

#[async_trait]
impl MarketAdapter for MockProvider {
    async fn get_market_timeseries(
        &self,
        request: &TimeseriesRequest,
        cancel: &CancellationToken,
    ) -> Result<MarketTimeseries, AdapterError> {
        request.validate()?;
        if !matches!(request.provider, Provider::Mock | Provider::Custom) {
            return Err(AdapterError::new(
                AdapterErrorCode::UnsupportedProvider,
                format!("Provider {} is not supported", request.provider),
            ));
        }
        if cancel.is_cancelled() {
            return Err(AdapterError::new(AdapterErrorCode::ProviderError, "Request cancelled"));
        }

        let rows = generate_mock_rows(&request.symbol, request.timeframe, request.limit);
        let bars = normalize_raw_bars(&rows)?;
        log::debug!(
            "Generated {} mock bars for {} {}",
            bars.len(),
            request.symbol,
            request.timeframe
        );

        Ok(MarketTimeseries {
            bars,
            symbol: request.symbol.clone(),
            provider: request.provider,
            timeframe: request.timeframe,
            source: MarketSource::Local,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(symbol: &str, provider: Provider, limit: u32) -> TimeseriesRequest {
        TimeseriesRequest {
            symbol: symbol.into(),
            provider,
            timeframe: Timeframe::Hour1,
            limit,
        }
    }

    #[test]
    fn test_fnv_offset_basis() {
        assert_eq!(hash_seed(""), 2_166_136_261);
        assert_ne!(hash_seed("SBER:1h:200"), hash_seed("SBER:1h:201"));
    }

    #[test]
    fn test_rows_are_deterministic() {
        assert_eq!(
            generate_mock_rows("SBER", Timeframe::Hour1, 50),
            generate_mock_rows("SBER", Timeframe::Hour1, 50)
        );
        assert_ne!(
            generate_mock_rows("SBER", Timeframe::Hour1, 50),
            generate_mock_rows("GAZP", Timeframe::Hour1, 50)
        );
    }

    #[test]
    fn test_rows_shape() {
        let rows = generate_mock_rows("BTCUSDT", Timeframe::Day1, 200);
        assert_eq!(rows.len(), 200);
        for pair in rows.windows(2) {
            assert_eq!(pair[1][0] - pair[0][0], Timeframe::Day1.millis() as f64);
            // each bar opens at the previous close
            assert_eq!(pair[1][1], pair[0][4]);
        }
        for row in &rows {
            let (high, low, close) = (row[2], row[3], row[4]);
            assert!(low <= close && close <= high);
            assert!(row[0] as i64 % Timeframe::Day1.millis() == 0);
        }
    }

    #[tokio::test]
    async fn test_mock_adapter_serves_mock_and_custom() {
        let cancel = CancellationToken::new();
        let ts = MockProvider
            .get_market_timeseries(&request("SBER", Provider::Mock, 200), &cancel)
            .await
            .unwrap();
        assert_eq!(ts.bars.len(), 200);
        assert_eq!(ts.source, MarketSource::Local);

        assert!(MockProvider
            .get_market_timeseries(&request("SBER", Provider::Custom, 10), &cancel)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_mock_adapter_rejects_network_providers() {
        let err = MockProvider
            .get_market_timeseries(&request("SBER", Provider::Moex, 10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, AdapterErrorCode::UnsupportedProvider);
    }

    #[tokio::test]
    async fn test_mock_adapter_invalid_limit() {
        let err = MockProvider
            .get_market_timeseries(&request("SBER", Provider::Mock, 0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, AdapterErrorCode::InvalidParams);
    }
}
