//! Single forecast run: fetch bars if stale, infer, store.

use std::sync::Arc;
use std::time::Duration;

use forecast_config::{ModelsConfig, OrchestratorConfig};
use forecast_core::{forecast_key, tail_from_bars, timeseries_key, Bar, Provider, Timeframe};
use tokio_util::sync::CancellationToken;

use crate::cache::{now_ms, CacheEntry, ForecastEntry, LocalCache, RunStatus, DEFAULT_TIMESERIES_TTL};
use crate::client::ForecastInference;
use crate::error::ForecastError;
use crate::market::{MarketAdapter, TimeseriesRequest};

/// Bars kept in a tail regardless of horizon.
pub const DEFAULT_MIN_TAIL: usize = 128;

/// Everything that identifies one forecast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastRequest {
    pub symbol: String,
    pub provider: Provider,
    pub tf: Timeframe,
    /// Number of bars to fetch.
    pub window: u32,
    pub horizon: u32,
    pub model: Option<String>,
}

impl ForecastRequest {
    pub fn timeseries_key(&self) -> String {
        timeseries_key(self.provider, &self.symbol, self.tf, self.window)
    }

    pub fn forecast_key(&self) -> String {
        forecast_key(&self.symbol, self.tf, self.horizon, self.model.as_deref())
    }

    /// Bars handed to inference: `max(2 * horizon, min_tail)`.
    pub fn tail_len(&self, min_tail: usize) -> usize {
        (2 * self.horizon as usize).max(min_tail)
    }
}

/// Runs forecasts against a shared cache.
pub struct ForecastManager {
    cache: Arc<LocalCache>,
    adapter: Arc<dyn MarketAdapter>,
    inference: Arc<dyn ForecastInference>,
    models: ModelsConfig,
    ttl: Duration,
    min_tail: usize,
}

impl ForecastManager {
    pub fn new(
        cache: Arc<LocalCache>,
        adapter: Arc<dyn MarketAdapter>,
        inference: Arc<dyn ForecastInference>,
    ) -> Self {
        Self {
            cache,
            adapter,
            inference,
            models: ModelsConfig::default(),
            ttl: DEFAULT_TIMESERIES_TTL,
            min_tail: DEFAULT_MIN_TAIL,
        }
    }

    /// Apply TTL and tail settings from configuration.
    pub fn with_config(mut self, config: &OrchestratorConfig) -> Self {
        self.ttl = config.timeseries_ttl();
        self.min_tail = config.min_tail;
        self
    }

    /// Model registry used to look up each model's `tail_size`.
    pub fn with_models(mut self, models: ModelsConfig) -> Self {
        self.models = models;
        self
    }

    /// Minimum tail for the requested model: the larger of the configured
    /// floor and the model's own `tail_size`.
    fn min_tail_for(&self, model: Option<&str>) -> usize {
        let model_ver = match model.filter(|m| !m.is_empty()) {
            Some(requested) => self.models.resolve_model_version(requested),
            None => Some(self.models.default_model.clone()),
        };
        let tail_size = model_ver
            .and_then(|ver| self.models.get(&ver))
            .map_or(0, |m| m.tail_size);
        self.min_tail.max(tail_size)
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    /// Run one forecast end to end.
    ///
    /// Status for the forecast key is `Running` while this executes, then
    /// `Idle` on success or cancellation and `Error` on failure. An existing
    /// forecast for the key is kept and inference is skipped.
    pub async fn run(&self, request: &ForecastRequest, cancel: &CancellationToken) -> Result<(), ForecastError> {
        let fc_key = request.forecast_key();
        self.cache.set_status(&fc_key, RunStatus::Running);

        let result = self.run_inner(request, &fc_key, cancel).await;
        match &result {
            Ok(()) => self.cache.set_status(&fc_key, RunStatus::Idle),
            Err(ForecastError::Aborted) => {
                log::debug!("Forecast {} aborted", fc_key);
                self.cache.set_status(&fc_key, RunStatus::Idle);
            }
            Err(e) => {
                log::error!("Forecast {} failed: {}", fc_key, e);
                self.cache.set_status(&fc_key, RunStatus::Error);
            }
        }
        result
    }

    async fn run_inner(
        &self,
        request: &ForecastRequest,
        fc_key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ForecastError> {
        let series = self.ensure_timeseries(request, cancel).await?;
        if cancel.is_cancelled() {
            return Err(ForecastError::Aborted);
        }

        if self.cache.get_forecast(fc_key).is_some() {
            log::debug!("Forecast {} already cached", fc_key);
            return Ok(());
        }

        let tail = tail_from_bars(&series.data, request.tail_len(self.min_tail_for(request.model.as_deref())));
        let last_ts = series.data.last().map(|b| b.ts).unwrap_or_else(now_ms);

        let result = self
            .inference
            .infer_forecast(tail, request.horizon, request.model.clone(), cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(ForecastError::Aborted);
        }

        log::info!(
            "Forecast {} ready: {} steps, model {} in {:.1} ms",
            fc_key,
            result.p50.len(),
            result.diag.model_ver,
            result.diag.runtime_ms
        );
        self.cache
            .set_forecast(fc_key, ForecastEntry::from_result(result, last_ts, request.tf));
        Ok(())
    }

    /// Cached bars for the request, refetched once older than the TTL.
    pub async fn ensure_timeseries(
        &self,
        request: &ForecastRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<CacheEntry<Vec<Bar>>>, ForecastError> {
        let ts_key = request.timeseries_key();
        if let Some(entry) = self.cache.get_timeseries(&ts_key) {
            if !entry.is_stale(now_ms(), self.ttl) {
                return Ok(entry);
            }
        }

        let market_request = TimeseriesRequest {
            symbol: request.symbol.clone(),
            provider: request.provider,
            timeframe: request.tf,
            limit: request.window,
        };
        if cancel.is_cancelled() {
            return Err(ForecastError::Aborted);
        }
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ForecastError::Aborted),
            fetched = self.adapter.get_market_timeseries(&market_request, cancel) => fetched,
        };
        let series = match fetched {
            Ok(series) => series,
            // Adapters may report their own cancellation as an error.
            Err(_) if cancel.is_cancelled() => return Err(ForecastError::Aborted),
            Err(e) => return Err(ForecastError::Provider(e.message)),
        };

        log::debug!("Fetched {} bars for {}", series.bars.len(), ts_key);
        Ok(self.cache.set_timeseries(&ts_key, series.bars))
    }
}
