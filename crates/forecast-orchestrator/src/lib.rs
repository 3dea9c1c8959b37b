//! Forecast orchestration on the caller side.
//!
//! - `cache` - timeseries/forecast caches and per-key run status
//! - `market` - market adapter contract and bar normalization
//! - `mock` - deterministic local market data
//! - `client` - async client for the inference worker thread
//! - `manager` - one forecast run: bars, inference, store
//! - `trigger` - debounced, deduplicated dispatch of runs

pub mod cache;
pub mod client;
pub mod error;
pub mod manager;
pub mod market;
pub mod mock;
pub mod trigger;

pub use cache::{CacheEntry, ForecastEntry, ForecastSeries, LocalCache, RunStatus};
pub use client::{ForecastInference, WorkerClient};
pub use error::ForecastError;
pub use manager::{ForecastManager, ForecastRequest};
pub use market::{
    normalize_raw_bars, AdapterError, AdapterErrorCode, MarketAdapter, MarketSource, MarketTimeseries,
    TimeseriesRequest,
};
pub use mock::MockProvider;
pub use trigger::{ForecastParams, OrchestratorTrigger, Selection, TriggerOutcome};
