use thiserror::Error;

/// Errors raised by the feature pipelines.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("EBADINPUT: tail too short (need >= {need}, got {got})")]
    TailTooShort { need: usize, got: usize },

    #[error("feature {index} ({name}) is not finite")]
    NonFinite { index: usize, name: &'static str },

    #[error("GPU feature pipeline expects zscore normalization")]
    UnsupportedNormalization,

    #[error("GPU adapter is not available: {0}")]
    GpuUnavailable(String),

    #[error("GPU feature dispatch failed: {0}")]
    Gpu(String),
}

impl FeatureError {
    /// True when the caller supplied unusable input rather than hitting a runtime fault.
    pub fn is_bad_input(&self) -> bool {
        matches!(self, FeatureError::TailTooShort { .. })
    }
}
