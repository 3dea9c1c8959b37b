//! Backend selection between the CPU and GPU feature pipelines.

use std::fmt;

use forecast_config::{FeatureBackendPreference, ModelConfig};
use forecast_core::TailPoint;
use serde::{Deserialize, Serialize};

use crate::cpu::CpuFeatures;
use crate::gpu::GpuFeatures;
use crate::{FeatureError, Features};

/// The path that actually produced a feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureBackendKind {
    Cpu,
    #[serde(rename = "webgpu")]
    WebGpu,
}

impl fmt::Display for FeatureBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeatureBackendKind::Cpu => "cpu",
            FeatureBackendKind::WebGpu => "webgpu",
        })
    }
}

/// Features tagged with the backend that computed them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputedFeatures {
    pub features: Features,
    pub backend: FeatureBackendKind,
}

/// A strategy for turning a tail into a feature vector.
pub trait FeatureComputer: Send {
    /// Backend this computer nominally runs on.
    fn backend(&self) -> FeatureBackendKind;

    fn compute(&mut self, tail: &[TailPoint], model: &ModelConfig) -> Result<ComputedFeatures, FeatureError>;
}

impl FeatureComputer for Box<dyn FeatureComputer> {
    fn backend(&self) -> FeatureBackendKind {
        (**self).backend()
    }

    fn compute(&mut self, tail: &[TailPoint], model: &ModelConfig) -> Result<ComputedFeatures, FeatureError> {
        (**self).compute(tail, model)
    }
}

/// Runs `primary` and retries on `secondary` when it fails.
pub struct Fallback<P, S> {
    primary: P,
    secondary: S,
}

impl<P: FeatureComputer, S: FeatureComputer> Fallback<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: FeatureComputer, S: FeatureComputer> FeatureComputer for Fallback<P, S> {
    fn backend(&self) -> FeatureBackendKind {
        self.primary.backend()
    }

    fn compute(&mut self, tail: &[TailPoint], model: &ModelConfig) -> Result<ComputedFeatures, FeatureError> {
        match self.primary.compute(tail, model) {
            Ok(computed) => Ok(computed),
            Err(e) => {
                log::warn!(
                    "{} features failed for {} ({}), using {}",
                    self.primary.backend(),
                    model.model_ver,
                    e,
                    self.secondary.backend()
                );
                self.secondary.compute(tail, model)
            }
        }
    }
}

/// Chooses the feature path for each request.
///
/// - preference `cpu`: always CPU
/// - `webgpu` or `auto`: GPU (falling back to CPU on error) when a GPU is
///   available and the model uses z-score normalization, CPU otherwise
pub struct FeatureSelector {
    preference: FeatureBackendPreference,
    cpu: CpuFeatures,
    gpu: Option<Fallback<Box<dyn FeatureComputer>, CpuFeatures>>,
}

impl FeatureSelector {
    /// Build a selector, probing the GPU unless the preference is `cpu`.
    pub fn new(preference: FeatureBackendPreference) -> Self {
        let gpu: Option<Box<dyn FeatureComputer>> = match preference {
            FeatureBackendPreference::Cpu => None,
            _ => match GpuFeatures::new() {
                Ok(gpu) => Some(Box::new(gpu)),
                Err(e) => {
                    log::info!("Feature extraction will use the CPU: {}", e);
                    None
                }
            },
        };
        Self::from_parts(preference, gpu)
    }

    /// Build a selector around an explicit GPU computer.
    pub fn with_gpu(preference: FeatureBackendPreference, gpu: Box<dyn FeatureComputer>) -> Self {
        Self::from_parts(preference, Some(gpu))
    }

    /// CPU only, regardless of preference.
    pub fn cpu_only(preference: FeatureBackendPreference) -> Self {
        Self::from_parts(preference, None)
    }

    fn from_parts(preference: FeatureBackendPreference, gpu: Option<Box<dyn FeatureComputer>>) -> Self {
        Self {
            preference,
            cpu: CpuFeatures,
            gpu: gpu.map(|g| Fallback::new(g, CpuFeatures)),
        }
    }

    pub fn preference(&self) -> FeatureBackendPreference {
        self.preference
    }

    pub fn gpu_available(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn compute(&mut self, tail: &[TailPoint], model: &ModelConfig) -> Result<ComputedFeatures, FeatureError> {
        let zscore = model.normalization.as_ref().is_some_and(|n| n.is_zscore());
        match &mut self.gpu {
            Some(chain) if self.preference != FeatureBackendPreference::Cpu && zscore => {
                chain.compute(tail, model)
            }
            _ => FeatureComputer::compute(&mut self.cpu, tail, model),
        }
    }
}
