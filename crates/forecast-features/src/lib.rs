//! Feature extraction for the on-device forecast models.
//!
//! Every model consumes the same ten close-price features. They can be
//! computed with plain `f32` arithmetic ([`CpuFeatures`]) or by a single wgpu
//! compute dispatch ([`GpuFeatures`]); [`FeatureSelector`] picks the path and
//! falls back to the CPU when the GPU cannot serve a request.

pub mod backend;
pub mod cpu;
pub mod error;
pub mod gpu;

pub use backend::{ComputedFeatures, Fallback, FeatureBackendKind, FeatureComputer, FeatureSelector};
pub use cpu::CpuFeatures;
pub use error::FeatureError;
pub use forecast_config::FEATURE_COUNT;
pub use gpu::{is_gpu_supported, GpuFeatures};

/// One feature vector, in [`FEATURE_NAMES`] order.
pub type Features = [f32; FEATURE_COUNT];

/// Feature names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "last_close",
    "mean_5",
    "mean_20",
    "std_20",
    "momentum_3",
    "momentum_8",
    "ema_5",
    "ema_10",
    "ret_mean_5",
    "ret_std_20",
];

/// Reject vectors containing NaN or infinities.
pub(crate) fn ensure_finite(features: Features) -> Result<Features, FeatureError> {
    match features.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(FeatureError::NonFinite {
            index,
            name: FEATURE_NAMES[index],
        }),
        None => Ok(features),
    }
}
