//! Deterministic cache key builders.
//!
//! Keys are plain strings so they can be logged and compared directly:
//! - timeseries: `"{provider}:{symbol}:{timeframe}:{window}"`
//! - forecast: `"{symbol}:{timeframe}:h{horizon}:m{model}"`
//!
//! Free-text fields (symbol, model) escape `%` and `:` so that two different
//! inputs can never produce the same key.

use std::borrow::Cow;

use crate::provider::Provider;
use crate::timeframe::Timeframe;

/// Model segment used when no explicit model is requested.
pub const CLIENT_MODEL: &str = "client";

fn escape(field: &str) -> Cow<'_, str> {
    if field.contains(['%', ':']) {
        Cow::Owned(field.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(field)
    }
}

/// Build the cache key for a timeseries request.
pub fn timeseries_key(provider: Provider, symbol: &str, tf: Timeframe, window: u32) -> String {
    format!("{}:{}:{}:{}", provider.label(), escape(symbol), tf.label(), window)
}

/// Build the cache key for a forecast.
///
/// A missing or empty model collapses to [`CLIENT_MODEL`].
pub fn forecast_key(symbol: &str, tf: Timeframe, horizon: u32, model: Option<&str>) -> String {
    let model = model.filter(|m| !m.is_empty()).unwrap_or(CLIENT_MODEL);
    format!(
        "{}:{}:h{}:m{}",
        escape(symbol),
        tf.label(),
        horizon,
        escape(model)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeseries_key_format() {
        let key = timeseries_key(Provider::Binance, "BTCUSDT", Timeframe::Hour1, 6);
        assert_eq!(key, "BINANCE:BTCUSDT:1h:6");
    }

    #[test]
    fn test_timeseries_key_changes_with_every_field() {
        let base = timeseries_key(Provider::Binance, "BTCUSDT", Timeframe::Hour1, 6);
        assert_ne!(base, timeseries_key(Provider::Moex, "BTCUSDT", Timeframe::Hour1, 6));
        assert_ne!(base, timeseries_key(Provider::Binance, "ETHUSDT", Timeframe::Hour1, 6));
        assert_ne!(base, timeseries_key(Provider::Binance, "BTCUSDT", Timeframe::Day1, 6));
        assert_ne!(base, timeseries_key(Provider::Binance, "BTCUSDT", Timeframe::Hour1, 7));
    }

    #[test]
    fn test_forecast_key_defaults_to_client() {
        assert_eq!(
            forecast_key("SBER", Timeframe::Day1, 24, None),
            "SBER:1d:h24:mclient"
        );
        assert_eq!(
            forecast_key("SBER", Timeframe::Day1, 24, Some("")),
            "SBER:1d:h24:mclient"
        );
        assert_eq!(
            forecast_key("SBER", Timeframe::Day1, 24, Some("lgbm")),
            "SBER:1d:h24:mlgbm"
        );
    }

    #[test]
    fn test_forecast_key_changes_with_every_field() {
        let base = forecast_key("SBER", Timeframe::Hour1, 24, None);
        assert_ne!(base, forecast_key("GAZP", Timeframe::Hour1, 24, None));
        assert_ne!(base, forecast_key("SBER", Timeframe::Hour8, 24, None));
        assert_ne!(base, forecast_key("SBER", Timeframe::Hour1, 12, None));
        assert_ne!(base, forecast_key("SBER", Timeframe::Hour1, 24, Some("lgbm")));
    }

    #[test]
    fn test_delimiters_in_free_fields_stay_injective() {
        let a = forecast_key("A:1h:h1:mx", Timeframe::Hour1, 1, Some("y"));
        let b = forecast_key("A", Timeframe::Hour1, 1, Some("x:1h:h1:my"));
        assert_ne!(a, b);

        let c = timeseries_key(Provider::Mock, "a%3Ab", Timeframe::Hour1, 1);
        let d = timeseries_key(Provider::Mock, "a:b", Timeframe::Hour1, 1);
        assert_ne!(c, d);
        assert_eq!(d, "MOCK:a%3Ab:1h:1");
    }
}
