//! ONNX model sessions and their per-version cache.

use std::collections::HashMap;
use std::sync::Once;

use forecast_config::ModelConfig;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;

use crate::protocol::SessionBackend;

/// Preferred output tensor name; the first output is used when absent.
pub const DELTA_OUTPUT: &str = "delta";

static ORT_INIT: Once = Once::new();

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Unable to load ONNX session for {model_ver}: {message}")]
    Load { model_ver: String, message: String },

    #[error("ONNX output \"{0}\" is missing")]
    MissingOutput(String),

    #[error("Input shape {shape:?} does not fit {len} features")]
    InputShape { shape: [usize; 2], len: usize },

    #[error("ONNX runtime error: {0}")]
    Runtime(String),
}

impl From<ort::Error> for ModelError {
    fn from(e: ort::Error) -> Self {
        ModelError::Runtime(e.to_string())
    }
}

/// A loaded forecast model.
pub trait ForecastModel: Send {
    fn backend(&self) -> SessionBackend;

    /// Run the model on one feature vector and return the per-step deltas.
    fn predict(&mut self, features: &[f32]) -> Result<Vec<f32>, ModelError>;
}

/// Creates [`ForecastModel`]s from configuration.
pub trait ModelLoader: Send {
    fn load(&self, model: &ModelConfig) -> Result<Box<dyn ForecastModel>, ModelError>;
}

/// Loads models with ONNX Runtime on the CPU execution provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxLoader;

impl OnnxLoader {
    fn load_file(path: &str) -> Result<Session, ort::Error> {
        Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(path)
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, model: &ModelConfig) -> Result<Box<dyn ForecastModel>, ModelError> {
        ORT_INIT.call_once(|| {
            let _ = ort::init().with_name("forecast").commit();
        });

        let mut last_error = String::from("no candidate paths");
        for path in model.candidate_paths() {
            match Self::load_file(path) {
                Ok(session) => {
                    log::info!("Loaded {} from {}", model.model_ver, path);
                    return Ok(Box::new(OnnxModel {
                        session,
                        input_name: model.input_name.clone(),
                        input_shape: model.input_shape,
                    }));
                }
                Err(e) => {
                    log::debug!("Could not load {}: {}", path, e);
                    last_error = format!("{path}: {e}");
                }
            }
        }

        Err(ModelError::Load {
            model_ver: model.model_ver.clone(),
            message: last_error,
        })
    }
}

/// An ONNX Runtime session for one model version.
pub struct OnnxModel {
    session: Session,
    input_name: String,
    input_shape: [usize; 2],
}

impl ForecastModel for OnnxModel {
    fn backend(&self) -> SessionBackend {
        SessionBackend::Wasm
    }

    fn predict(&mut self, features: &[f32]) -> Result<Vec<f32>, ModelError> {
        if self.input_shape[0] * self.input_shape[1] != features.len() {
            return Err(ModelError::InputShape {
                shape: self.input_shape,
                len: features.len(),
            });
        }

        let input = Tensor::from_array((self.input_shape, features.to_vec()))?;
        let outputs = self.session.run(ort::inputs![self.input_name.as_str() => input])?;

        let delta = if let Some(output) = outputs.get(DELTA_OUTPUT) {
            let (_, data) = output.try_extract_tensor::<f32>()?;
            data.to_vec()
        } else {
            let (_, output) = outputs
                .iter()
                .next()
                .ok_or_else(|| ModelError::MissingOutput(DELTA_OUTPUT.to_string()))?;
            let (_, data) = output.try_extract_tensor::<f32>()?;
            data.to_vec()
        };
        Ok(delta)
    }
}

/// Model sessions keyed by model version. Failed loads are not cached.
pub struct SessionCache {
    loader: Box<dyn ModelLoader>,
    sessions: HashMap<String, Box<dyn ForecastModel>>,
}

impl SessionCache {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            sessions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Return the cached session for `model`, loading it on first use.
    pub fn get_or_load(
        &mut self,
        model: &ModelConfig,
    ) -> Result<&mut (dyn ForecastModel + 'static), ModelError> {
        if !self.sessions.contains_key(&model.model_ver) {
            let loaded = self.loader.load(model)?;
            self.sessions.insert(model.model_ver.clone(), loaded);
        }
        self.sessions
            .get_mut(&model.model_ver)
            .map(|m| m.as_mut())
            .ok_or_else(|| ModelError::Load {
                model_ver: model.model_ver.clone(),
                message: "session vanished from cache".to_string(),
            })
    }
}
