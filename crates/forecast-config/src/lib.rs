//! Configuration management for the forecast pipeline.
//!
//! Loads configuration from TOML files; every section falls back to defaults
//! so a partial file is always valid.

pub mod model;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use model::{ModelConfig, ModelsConfig, Normalization, FEATURE_COUNT};

/// Environment variable overriding the feature backend preference.
pub const FEATURES_BACKEND_ENV: &str = "FORECAST_FEATURES_BACKEND";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub features: FeaturesConfig,
    pub models: ModelsConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from default locations.
    ///
    /// Searches in order:
    /// 1. `./forecast.toml`
    /// 2. `~/.config/forecast/config.toml`
    ///
    /// Returns default config if no file found.
    pub fn load_default() -> Self {
        let mut candidates = vec![Self::default_path()];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("forecast").join("config.toml"));
        }
        Self::load_first(&candidates)
    }

    /// First candidate that loads. Missing files are skipped quietly; files
    /// that exist but fail to parse are skipped with a warning.
    pub fn load_first(candidates: &[PathBuf]) -> Self {
        for path in candidates {
            match Self::load(path) {
                Ok(config) => return config,
                Err(ConfigError::ReadError(_)) => {}
                Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
            }
        }
        Self::default()
    }

    /// Save configuration to a file path.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("forecast.toml")
    }
}

/// Orchestration timing and cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay between a selection change and the forecast run.
    pub debounce_ms: u64,
    /// Age after which a cached timeseries is refetched.
    pub timeseries_ttl_ms: u64,
    /// Accept `mock`/`custom` selections (mapped to the local generator).
    pub allow_mock_provider: bool,
    /// Minimum number of tail points sent to the worker.
    pub min_tail: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            timeseries_ttl_ms: 10 * 60 * 1000,
            allow_mock_provider: false,
            min_tail: 128,
        }
    }
}

impl OrchestratorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn timeseries_ttl(&self) -> Duration {
        Duration::from_millis(self.timeseries_ttl_ms)
    }
}

/// Preferred feature extraction backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureBackendPreference {
    /// GPU when available, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    #[serde(rename = "webgpu")]
    WebGpu,
}

impl FeatureBackendPreference {
    /// Read the preference from [`FEATURES_BACKEND_ENV`], falling back to `default`.
    pub fn from_env_or(default: Self) -> Self {
        std::env::var(FEATURES_BACKEND_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

impl FromStr for FeatureBackendPreference {
    type Err = std::convert::Infallible;

    /// Unknown values mean `auto`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "cpu" => FeatureBackendPreference::Cpu,
            "webgpu" | "gpu" => FeatureBackendPreference::WebGpu,
            _ => FeatureBackendPreference::Auto,
        })
    }
}

impl fmt::Display for FeatureBackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeatureBackendPreference::Auto => "auto",
            FeatureBackendPreference::Cpu => "cpu",
            FeatureBackendPreference::WebGpu => "webgpu",
        })
    }
}

/// Feature extraction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub backend: FeatureBackendPreference,
}

impl FeaturesConfig {
    /// Configured backend with the environment override applied.
    pub fn effective_backend(&self) -> FeatureBackendPreference {
        FeatureBackendPreference::from_env_or(self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.orchestrator.debounce_ms, 250);
        assert_eq!(config.orchestrator.timeseries_ttl(), Duration::from_secs(600));
        assert_eq!(config.features.backend, FeatureBackendPreference::Auto);
        assert_eq!(config.models.registry.len(), 3);
        assert_eq!(config.models.default_config().unwrap().model_ver, "lgbm-0-1-0");
    }

    #[test]
    fn test_resolve_model_version() {
        let models = ModelsConfig::default();
        assert_eq!(models.resolve_model_version("minimal").as_deref(), Some("min-0-1-0"));
        assert_eq!(models.resolve_model_version("CatBoost").as_deref(), Some("cat-0-1-0"));
        assert_eq!(models.resolve_model_version("lgbm-0-1-0").as_deref(), Some("lgbm-0-1-0"));
        assert_eq!(
            models.resolve_model_version("forecast_minimal").as_deref(),
            Some("min-0-1-0")
        );
        assert_eq!(models.resolve_model_version("gpt"), None);
    }

    #[test]
    fn test_backend_preference_parse() {
        assert_eq!("cpu".parse(), Ok(FeatureBackendPreference::Cpu));
        assert_eq!("WebGPU".parse(), Ok(FeatureBackendPreference::WebGpu));
        assert_eq!("whatever".parse(), Ok(FeatureBackendPreference::Auto));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[orchestrator]
debounce_ms = 100
allow_mock_provider = true

[features]
backend = "cpu"

[models]
default_model = "tiny-1"

[[models.registry]]
model_name = "tiny"
model_ver = "tiny-1"
path = "tiny.onnx"
feature_window = 32
horizon_steps = 12

[models.registry.normalization]
type = "zscore"
mean = [0.0, 1.0]
std = [1.0, 2.0]
epsilon = 0.000001
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.orchestrator.debounce_ms, 100);
        assert_eq!(config.orchestrator.timeseries_ttl_ms, 600_000);
        assert!(config.orchestrator.allow_mock_provider);
        assert_eq!(config.features.backend, FeatureBackendPreference::Cpu);

        let model = config.models.default_config().unwrap();
        assert_eq!(model.model_ver, "tiny-1");
        assert_eq!(model.input_name, "input");
        assert_eq!(model.input_shape, [1, FEATURE_COUNT]);
        assert!(model.quant_path.is_none());
        assert!(model.normalization.as_ref().unwrap().is_zscore());
    }

    #[test]
    fn test_unknown_normalization_type() {
        let toml = r#"
model_name = "raw"
model_ver = "raw-1"
path = "raw.onnx"
feature_window = 20
horizon_steps = 4

[normalization]
type = "minmax"
"#;
        let model: ModelConfig = toml::from_str(toml).unwrap();
        assert_eq!(model.normalization, Some(Normalization::Other));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.toml");

        let mut config = Config::default();
        config.orchestrator.debounce_ms = 42;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.orchestrator.debounce_ms, 42);
        assert_eq!(loaded.models.registry, config.models.registry);
    }

    #[test]
    fn test_load_first_skips_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let broken = dir.path().join("broken.toml");
        let good = dir.path().join("good.toml");
        fs::write(&broken, "[orchestrator\ndebounce_ms = ").unwrap();
        let mut config = Config::default();
        config.orchestrator.debounce_ms = 7;
        config.save(&good).unwrap();

        let loaded = Config::load_first(&[missing.clone(), broken.clone(), good]);
        assert_eq!(loaded.orchestrator.debounce_ms, 7);

        let fallback = Config::load_first(&[broken, missing]);
        assert_eq!(fallback.orchestrator.debounce_ms, 250);
    }

    #[test]
    fn test_candidate_paths_prefer_quantized() {
        let model = ModelConfig::minimal();
        assert_eq!(
            model.candidate_paths(),
            vec!["models/forecast_minimal.quant.onnx", "models/forecast_minimal.onnx"]
        );
    }
}
