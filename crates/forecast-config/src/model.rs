//! Model registry and feature normalization settings.

use serde::{Deserialize, Serialize};

/// Number of features every model consumes.
pub const FEATURE_COUNT: usize = 10;

/// Feature normalization applied before inference.
///
/// Only z-score is understood; any other `type` deserializes to
/// [`Normalization::Other`] and leaves features unscaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Normalization {
    Zscore {
        mean: Vec<f32>,
        std: Vec<f32>,
        epsilon: f32,
    },
    #[serde(other)]
    Other,
}

impl Normalization {
    /// Neutral z-score statistics (mean 0, std 1).
    pub fn neutral_zscore() -> Self {
        Normalization::Zscore {
            mean: vec![0.0; FEATURE_COUNT],
            std: vec![1.0; FEATURE_COUNT],
            epsilon: 1e-6,
        }
    }

    pub fn is_zscore(&self) -> bool {
        matches!(self, Normalization::Zscore { .. })
    }
}

/// Configuration of one on-device forecast model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Human readable model name (also accepted when resolving a request).
    pub model_name: String,
    /// Unique version string, e.g. `lgbm-0-1-0`.
    pub model_ver: String,
    /// Path to the ONNX file.
    pub path: String,
    /// Optional quantized variant, tried before `path`.
    #[serde(default)]
    pub quant_path: Option<String>,
    /// Name of the model's input tensor.
    #[serde(default = "default_input_name")]
    pub input_name: String,
    /// Shape of the input tensor, normally `[1, FEATURE_COUNT]`.
    #[serde(default = "default_input_shape")]
    pub input_shape: [usize; 2],
    /// Number of closes the feature pipeline looks at.
    pub feature_window: usize,
    /// Number of tail points the orchestrator sends at minimum.
    #[serde(default = "default_tail_size")]
    pub tail_size: usize,
    /// Number of steps the model was trained to predict.
    pub horizon_steps: usize,
    #[serde(default)]
    pub normalization: Option<Normalization>,
    /// Relative tolerance for CPU/GPU feature parity checks.
    #[serde(default = "default_rtol")]
    pub rtol: f32,
    /// Absolute tolerance for CPU/GPU feature parity checks.
    #[serde(default = "default_atol")]
    pub atol: f32,
}

fn default_input_name() -> String {
    "input".to_string()
}

fn default_input_shape() -> [usize; 2] {
    [1, FEATURE_COUNT]
}

fn default_tail_size() -> usize {
    128
}

fn default_rtol() -> f32 {
    1e-3
}

fn default_atol() -> f32 {
    1e-4
}

impl ModelConfig {
    fn builtin(model_name: &str, model_ver: &str, file: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            model_ver: model_ver.to_string(),
            path: format!("models/{file}.onnx"),
            quant_path: Some(format!("models/{file}.quant.onnx")),
            input_name: default_input_name(),
            input_shape: default_input_shape(),
            feature_window: 64,
            tail_size: default_tail_size(),
            horizon_steps: 24,
            normalization: Some(Normalization::neutral_zscore()),
            rtol: default_rtol(),
            atol: default_atol(),
        }
    }

    /// Gradient boosted model, the default.
    pub fn lgbm() -> Self {
        Self::builtin("forecast_lgbm_v1", "lgbm-0-1-0", "forecast_lgbm_v1")
    }

    pub fn catboost() -> Self {
        Self::builtin("forecast_catboost_v1", "cat-0-1-0", "forecast_catboost_v1")
    }

    /// Linear baseline.
    pub fn minimal() -> Self {
        Self::builtin("forecast_minimal", "min-0-1-0", "forecast_minimal")
    }

    /// Candidate model files, quantized first.
    pub fn candidate_paths(&self) -> Vec<&str> {
        self.quant_path
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.path.as_str()))
            .collect()
    }
}

/// Model selection and registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Version used when a request names no model.
    pub default_model: String,
    /// Relative width of the p10/p90 band around p50.
    pub quantile_band: f64,
    pub registry: Vec<ModelConfig>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: "lgbm-0-1-0".to_string(),
            quantile_band: 0.01,
            registry: vec![ModelConfig::lgbm(), ModelConfig::catboost(), ModelConfig::minimal()],
        }
    }
}

impl ModelsConfig {
    /// Resolve a requested model (alias, version or name) to a version.
    ///
    /// Returns `None` when the request names an unknown model. The aliases
    /// `minimal`, `lgbm` and `catboost` map to the built-in versions.
    pub fn resolve_model_version(&self, model: &str) -> Option<String> {
        let alias = match model.to_lowercase().as_str() {
            "minimal" => Some("min-0-1-0"),
            "lgbm" => Some("lgbm-0-1-0"),
            "catboost" => Some("cat-0-1-0"),
            _ => None,
        };
        if let Some(ver) = alias {
            if self.get(ver).is_some() {
                return Some(ver.to_string());
            }
        }

        self.registry
            .iter()
            .find(|m| m.model_ver == model || m.model_name == model)
            .map(|m| m.model_ver.clone())
    }

    /// Look up a model by version.
    pub fn get(&self, model_ver: &str) -> Option<&ModelConfig> {
        self.registry.iter().find(|m| m.model_ver == model_ver)
    }

    /// The default model, or the first registered one if the default is missing.
    pub fn default_config(&self) -> Option<&ModelConfig> {
        self.get(&self.default_model).or_else(|| self.registry.first())
    }
}
