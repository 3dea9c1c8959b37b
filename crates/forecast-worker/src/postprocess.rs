//! Turning model deltas into price percentiles.

/// `p50[i] = last_close + delta[i]` for `i < horizon`; missing deltas count as 0.
///
/// Deltas are offsets from the last observed close, not step increments.
pub fn p50_from_delta(delta: &[f32], last_close: f64, horizon: usize) -> Vec<f64> {
    (0..horizon)
        .map(|i| last_close + delta.get(i).copied().unwrap_or(0.0) as f64)
        .collect()
}

/// Symmetric relative band around p50, returned as `(p10, p90)`.
pub fn quantile_band(p50: &[f64], band: f64) -> (Vec<f64>, Vec<f64>) {
    let p10 = p50.iter().map(|v| v * (1.0 - band)).collect();
    let p90 = p50.iter().map(|v| v * (1.0 + band)).collect();
    (p10, p90)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p50_is_pointwise() {
        assert_eq!(p50_from_delta(&[1.0, 2.0, -1.0], 100.0, 3), vec![101.0, 102.0, 99.0]);
    }

    #[test]
    fn test_p50_pads_missing_deltas() {
        assert_eq!(p50_from_delta(&[0.5], 10.0, 3), vec![10.5, 10.0, 10.0]);
        assert_eq!(p50_from_delta(&[], 10.0, 2), vec![10.0, 10.0]);
    }

    #[test]
    fn test_p50_truncates_to_horizon() {
        assert_eq!(p50_from_delta(&[1.0, 2.0, 3.0], 0.0, 2).len(), 2);
    }

    #[test]
    fn test_band() {
        let (p10, p90) = quantile_band(&[100.0, 200.0], 0.01);
        for (got, want) in p10.iter().zip([99.0, 198.0]) {
            assert!((got - want).abs() < 1e-9);
        }
        for (got, want) in p90.iter().zip([101.0, 202.0]) {
            assert!((got - want).abs() < 1e-9);
        }
    }
}
