//! Messages exchanged between the caller and the inference worker.
//!
//! Every message is a JSON object tagged by `type` and correlated by `id`:
//!
//! ```text
//! -> { "id": "req_1", "type": "infer", "payload": { "tail": [[ts, close], ...], "horizon": 24, "model": "lgbm" } }
//! -> { "id": "req_1", "type": "cancel" }
//! <- { "id": "req_1", "type": "onnx:infer:done", "payload": { "p50": [...], "p10": [...], "p90": [...], "diag": {...} } }
//! <- { "id": "req_1", "type": "error", "payload": { "code": "EBADINPUT", "message": "..." } }
//! ```

use std::fmt;

use forecast_core::TailPoint;
use forecast_features::FeatureBackendKind;
use serde::{Deserialize, Serialize};

/// Reply type tag for completed inference.
pub const DONE_TYPE: &str = "onnx:infer:done";
/// Reply type tag for failed inference.
pub const ERROR_TYPE: &str = "error";

/// Caller to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerRequest {
    #[serde(rename = "infer")]
    Infer { id: String, payload: InferPayload },
    /// The caller no longer wants the reply for `id`.
    #[serde(rename = "cancel")]
    Cancel { id: String },
}

impl WorkerRequest {
    pub fn id(&self) -> &str {
        match self {
            WorkerRequest::Infer { id, .. } | WorkerRequest::Cancel { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferPayload {
    pub tail: Vec<TailPoint>,
    pub horizon: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Worker to caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerReply {
    #[serde(rename = "onnx:infer:done")]
    Done { id: String, payload: InferResult },
    #[serde(rename = "error")]
    Error { id: String, payload: ErrorPayload },
}

impl WorkerReply {
    pub fn id(&self) -> &str {
        match self {
            WorkerReply::Done { id, .. } | WorkerReply::Error { id, .. } => id,
        }
    }

    pub fn error(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        WorkerReply::Error {
            id: id.into(),
            payload: ErrorPayload {
                code,
                message: message.into(),
            },
        }
    }
}

/// Percentile forecast with run diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferResult {
    pub p50: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p10: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p90: Option<Vec<f64>>,
    pub diag: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub runtime_ms: f64,
    pub backend: SessionBackend,
    pub model_ver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features_backend: Option<FeatureBackendKind>,
}

/// Execution provider the model session ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Portable CPU execution.
    Wasm,
    #[serde(rename = "webgpu")]
    WebGpu,
}

impl fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionBackend::Wasm => "wasm",
            SessionBackend::WebGpu => "webgpu",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Worker error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Model session could not be created.
    #[serde(rename = "ELOAD")]
    Load,
    #[serde(rename = "ERUNTIME")]
    Runtime,
    /// Tail, horizon or model name rejected.
    #[serde(rename = "EBADINPUT")]
    BadInput,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Load => "ELOAD",
            ErrorCode::Runtime => "ERUNTIME",
            ErrorCode::BadInput => "EBADINPUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
