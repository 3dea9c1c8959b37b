//! Feature extraction with plain `f32` arithmetic.
//!
//! The helpers below mirror the loops in `shaders/features.wgsl` one for one
//! (same accumulation order, same guards) so the two paths agree to within
//! float contraction differences.

use forecast_config::{ModelConfig, Normalization, FEATURE_COUNT};
use forecast_core::TailPoint;

use crate::backend::{ComputedFeatures, FeatureBackendKind, FeatureComputer};
use crate::{ensure_finite, FeatureError, Features};

/// Resolved z-score statistics, padded to [`FEATURE_COUNT`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ZscoreStats {
    pub mean: Features,
    pub std: Features,
    pub epsilon: f32,
}

impl ZscoreStats {
    /// Missing mean entries are 0 and missing std entries are 1.
    pub fn from_normalization(norm: &Normalization) -> Option<Self> {
        match norm {
            Normalization::Zscore { mean, std, epsilon } => {
                let mut stats = ZscoreStats {
                    mean: [0.0; FEATURE_COUNT],
                    std: [1.0; FEATURE_COUNT],
                    epsilon: *epsilon,
                };
                for (dst, src) in stats.mean.iter_mut().zip(mean) {
                    *dst = *src;
                }
                for (dst, src) in stats.std.iter_mut().zip(std) {
                    *dst = *src;
                }
                Some(stats)
            }
            Normalization::Other => None,
        }
    }

    pub fn apply(&self, raw: Features) -> Features {
        let mut out = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            out[i] = (raw[i] - self.mean[i]) / (self.std[i] + self.epsilon);
        }
        out
    }
}

/// Closes of the last `feature_window` tail points, as `f32`.
pub(crate) fn window_closes(tail: &[TailPoint], model: &ModelConfig) -> Result<Vec<f32>, FeatureError> {
    let need = model.feature_window.max(1);
    if tail.len() < need {
        return Err(FeatureError::TailTooShort {
            need,
            got: tail.len(),
        });
    }
    Ok(tail[tail.len() - need..]
        .iter()
        .map(|p| p.close() as f32)
        .collect())
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0f32;
    for v in values {
        sum += v;
    }
    sum / values.len() as f32
}

/// Population standard deviation; 0 for fewer than two values.
fn std(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let mut acc = 0.0f32;
    for v in values {
        let d = v - m;
        acc += d * d;
    }
    (acc / values.len() as f32).sqrt()
}

/// Exponential moving average seeded with the first value.
fn ema(values: &[f32], span: f32) -> f32 {
    let Some((&first, rest)) = values.split_first() else {
        return 0.0;
    };
    let alpha = 2.0 / (span + 1.0);
    let mut acc = first;
    for v in rest {
        acc = alpha * v + (1.0 - alpha) * acc;
    }
    acc
}

fn returns(closes: &[f32]) -> Vec<f32> {
    closes
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { (w[1] - w[0]) / w[0] })
        .collect()
}

fn last(values: &[f32], n: usize) -> &[f32] {
    &values[values.len().saturating_sub(n)..]
}

/// The ten raw (unnormalized) features of a non-empty close window.
pub(crate) fn raw_features(closes: &[f32]) -> Features {
    let len = closes.len();
    let last_close = closes[len - 1];
    let rets = returns(closes);

    let momentum_3 = if len >= 3 { last_close - closes[len - 3] } else { 0.0 };
    let momentum_8 = if len >= 8 { last_close - closes[len - 8] } else { 0.0 };

    [
        last_close,
        mean(last(closes, 5)),
        mean(last(closes, 20)),
        std(last(closes, 20)),
        momentum_3,
        momentum_8,
        ema(last(closes, 5), 5.0),
        ema(last(closes, 10), 10.0),
        mean(last(&rets, 5)),
        std(last(&rets, 20)),
    ]
}

/// CPU feature pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuFeatures;

impl CpuFeatures {
    /// Compute the feature vector for `tail` under `model`'s window and normalization.
    ///
    /// Normalization other than z-score leaves the raw features untouched.
    pub fn compute(tail: &[TailPoint], model: &ModelConfig) -> Result<Features, FeatureError> {
        let closes = window_closes(tail, model)?;
        let raw = raw_features(&closes);
        let features = match model.normalization.as_ref().and_then(ZscoreStats::from_normalization) {
            Some(stats) => stats.apply(raw),
            None => raw,
        };
        ensure_finite(features)
    }
}

impl FeatureComputer for CpuFeatures {
    fn backend(&self) -> FeatureBackendKind {
        FeatureBackendKind::Cpu
    }

    fn compute(&mut self, tail: &[TailPoint], model: &ModelConfig) -> Result<ComputedFeatures, FeatureError> {
        Ok(ComputedFeatures {
            features: CpuFeatures::compute(tail, model)?,
            backend: FeatureBackendKind::Cpu,
        })
    }
}
