//! Core types for the forecast pipeline.
//!
//! This crate provides fundamental data structures shared by every stage:
//! - `Bar` - OHLC(V) price sample
//! - `TailPoint` - reduced `(timestamp, close)` pair consumed by feature pipelines
//! - `Timeframe` / `Provider` - the labels that make up cache keys
//! - `keys` - deterministic timeseries and forecast cache keys

pub mod bar;
pub mod keys;
pub mod provider;
pub mod timeframe;

pub use bar::{tail_from_bars, Bar, TailPoint};
pub use keys::{forecast_key, timeseries_key, CLIENT_MODEL};
pub use provider::Provider;
pub use timeframe::{ParseTimeframeError, Timeframe};
