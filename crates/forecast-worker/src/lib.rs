//! Background inference worker.
//!
//! A single dedicated thread receives [`WorkerRequest`]s, computes features,
//! runs the ONNX model for the requested version and answers with a
//! [`WorkerReply`] correlated by request id.

pub mod postprocess;
pub mod protocol;
pub mod session;
pub mod worker;

pub use protocol::{
    Diagnostics, ErrorCode, ErrorPayload, InferPayload, InferResult, SessionBackend, WorkerReply,
    WorkerRequest,
};
pub use session::{ForecastModel, ModelError, ModelLoader, OnnxLoader, SessionCache};
pub use worker::{InferenceWorker, WorkerGone, WorkerHandle};
