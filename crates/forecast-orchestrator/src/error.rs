use forecast_worker::ErrorCode;
use thiserror::Error;

/// Errors surfaced by a forecast run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Malformed tail or horizon, rejected before any async work.
    #[error("{0}")]
    InvalidInput(String),

    /// Market data could not be fetched or normalized.
    #[error("{0}")]
    Provider(String),

    /// The worker answered with an `error` reply.
    #[error("{message}")]
    Worker { code: ErrorCode, message: String },

    #[error("Unknown worker message type: {0}")]
    UnknownMessage(String),

    #[error("Inference worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The run was cancelled by its caller.
    #[error("Forecast run aborted")]
    Aborted,
}

impl ForecastError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, ForecastError::Aborted)
    }
}
