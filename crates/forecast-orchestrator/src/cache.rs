//! Local timeseries and forecast caches with per-forecast run status.
//!
//! Entries are stored behind `Arc` and replaced wholesale; readers holding an
//! old entry keep seeing a consistent snapshot.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use forecast_core::{Bar, Timeframe};
use forecast_worker::{Diagnostics, InferResult};

/// Default age after which a cached timeseries is refetched.
pub const DEFAULT_TIMESERIES_TTL: Duration = Duration::from_secs(10 * 60);

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Cached data with its fetch time (Unix ms).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub fetched_at: i64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, fetched_at: i64) -> Self {
        Self { data, fetched_at }
    }

    /// Stale once strictly older than `ttl`.
    pub fn is_stale(&self, now: i64, ttl: Duration) -> bool {
        now - self.fetched_at > ttl.as_millis() as i64
    }
}

/// Orchestration state of one forecast key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Error,
}

/// Percentile price series, one value per forecast step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastSeries {
    pub p10: Vec<f64>,
    pub p50: Vec<f64>,
    pub p90: Vec<f64>,
}

/// A stored forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastEntry {
    pub series: ForecastSeries,
    pub meta: Diagnostics,
    /// Timestamp of the last observed bar.
    pub last_ts: i64,
    pub timeframe: Timeframe,
    pub fetched_at: i64,
}

impl ForecastEntry {
    pub fn from_result(result: InferResult, last_ts: i64, timeframe: Timeframe) -> Self {
        Self {
            series: ForecastSeries {
                p10: result.p10.unwrap_or_default(),
                p50: result.p50,
                p90: result.p90.unwrap_or_default(),
            },
            meta: result.diag,
            last_ts,
            timeframe,
            fetched_at: now_ms(),
        }
    }

    /// Pair each value with its step timestamp, `last_ts + step * (i + 1)`.
    pub fn timestamped(&self, values: &[f64]) -> Vec<(i64, f64)> {
        let step = self.timeframe.millis();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (self.last_ts + step * (i as i64 + 1), *v))
            .collect()
    }
}

type TimeseriesMap = HashMap<String, Arc<CacheEntry<Vec<Bar>>>>;

/// Shared in-memory caches.
#[derive(Debug, Default)]
pub struct LocalCache {
    timeseries: RwLock<TimeseriesMap>,
    forecasts: RwLock<HashMap<String, Arc<ForecastEntry>>>,
    status: RwLock<HashMap<String, RunStatus>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache instance.
    pub fn shared() -> Arc<LocalCache> {
        static SHARED: OnceLock<Arc<LocalCache>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(LocalCache::new())))
    }

    pub fn get_timeseries(&self, key: &str) -> Option<Arc<CacheEntry<Vec<Bar>>>> {
        read(&self.timeseries).get(key).cloned()
    }

    /// Store bars fetched now.
    pub fn set_timeseries(&self, key: &str, bars: Vec<Bar>) -> Arc<CacheEntry<Vec<Bar>>> {
        self.set_timeseries_at(key, bars, now_ms())
    }

    /// Store bars with an explicit fetch time.
    pub fn set_timeseries_at(&self, key: &str, bars: Vec<Bar>, fetched_at: i64) -> Arc<CacheEntry<Vec<Bar>>> {
        let entry = Arc::new(CacheEntry::new(bars, fetched_at));
        write(&self.timeseries).insert(key.to_string(), Arc::clone(&entry));
        entry
    }

    /// Absent keys are always stale.
    pub fn is_timeseries_stale(&self, key: &str, ttl: Duration) -> bool {
        match read(&self.timeseries).get(key) {
            Some(entry) => entry.is_stale(now_ms(), ttl),
            None => true,
        }
    }

    pub fn get_forecast(&self, key: &str) -> Option<Arc<ForecastEntry>> {
        read(&self.forecasts).get(key).cloned()
    }

    pub fn set_forecast(&self, key: &str, entry: ForecastEntry) {
        write(&self.forecasts).insert(key.to_string(), Arc::new(entry));
    }

    /// Remove a forecast; returns whether one was stored.
    pub fn clear_forecast(&self, key: &str) -> bool {
        write(&self.forecasts).remove(key).is_some()
    }

    /// Drop every cached timeseries, forecast and status.
    pub fn clear(&self) {
        write(&self.timeseries).clear();
        write(&self.forecasts).clear();
        write(&self.status).clear();
    }

    /// Status of a forecast key; `Idle` if never run.
    pub fn status(&self, fc_key: &str) -> RunStatus {
        read(&self.status).get(fc_key).copied().unwrap_or_default()
    }

    pub fn set_status(&self, fc_key: &str, status: RunStatus) {
        write(&self.status).insert(fc_key.to_string(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_worker::SessionBackend;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar::new(i as i64 * 1000, 1.0, 2.0, 0.5, 1.5, None))
            .collect()
    }

    fn diag() -> Diagnostics {
        Diagnostics {
            runtime_ms: 1.0,
            backend: SessionBackend::Wasm,
            model_ver: "lgbm-0-1-0".into(),
            features_backend: None,
        }
    }

    #[test]
    fn test_unknown_key_is_stale() {
        let cache = LocalCache::new();
        assert!(cache.is_timeseries_stale("MOCK:SBER:1h:200", DEFAULT_TIMESERIES_TTL));
        assert!(cache.get_timeseries("MOCK:SBER:1h:200").is_none());
    }

    #[test]
    fn test_fresh_entry_not_stale() {
        let cache = LocalCache::new();
        cache.set_timeseries("k", bars(3));
        assert!(!cache.is_timeseries_stale("k", DEFAULT_TIMESERIES_TTL));
        assert_eq!(cache.get_timeseries("k").unwrap().data.len(), 3);
    }

    #[test]
    fn test_old_entry_is_stale() {
        let cache = LocalCache::new();
        let ttl = Duration::from_millis(500);
        cache.set_timeseries_at("k", bars(1), now_ms() - 10_000);
        assert!(cache.is_timeseries_stale("k", ttl));
        assert!(!cache.is_timeseries_stale("k", Duration::from_secs(60)));
    }

    #[test]
    fn test_staleness_boundary() {
        let entry = CacheEntry::new((), 1_000);
        let ttl = Duration::from_millis(100);
        assert!(!entry.is_stale(1_100, ttl));
        assert!(entry.is_stale(1_101, ttl));
    }

    #[test]
    fn test_replacement_keeps_old_snapshot() {
        let cache = LocalCache::new();
        cache.set_timeseries("k", bars(2));
        let before = cache.get_timeseries("k").unwrap();
        cache.set_timeseries("k", bars(5));
        assert_eq!(before.data.len(), 2);
        assert_eq!(cache.get_timeseries("k").unwrap().data.len(), 5);
    }

    #[test]
    fn test_status_is_per_key() {
        let cache = LocalCache::new();
        assert_eq!(cache.status("a"), RunStatus::Idle);
        cache.set_status("a", RunStatus::Running);
        cache.set_status("b", RunStatus::Error);
        assert_eq!(cache.status("a"), RunStatus::Running);
        assert_eq!(cache.status("b"), RunStatus::Error);
        assert_eq!(cache.status("c"), RunStatus::Idle);
    }

    #[test]
    fn test_forecast_set_clear() {
        let cache = LocalCache::new();
        let entry = ForecastEntry {
            series: ForecastSeries {
                p50: vec![1.0, 2.0],
                ..Default::default()
            },
            meta: diag(),
            last_ts: 0,
            timeframe: Timeframe::Hour1,
            fetched_at: now_ms(),
        };
        cache.set_forecast("f", entry.clone());
        assert_eq!(*cache.get_forecast("f").unwrap(), entry);
        assert!(cache.clear_forecast("f"));
        assert!(!cache.clear_forecast("f"));
    }

    #[test]
    fn test_timestamped_series() {
        let result = InferResult {
            p50: vec![10.0, 11.0],
            p10: None,
            p90: None,
            diag: diag(),
        };
        let entry = ForecastEntry::from_result(result, 1_000, Timeframe::Hour1);
        assert_eq!(
            entry.timestamped(&entry.series.p50),
            vec![(1_000 + 3_600_000, 10.0), (1_000 + 7_200_000, 11.0)]
        );
        assert!(entry.series.p10.is_empty());
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = LocalCache::new();
        cache.set_timeseries("k", bars(1));
        cache.set_status("f", RunStatus::Error);
        cache.clear();
        assert!(cache.get_timeseries("k").is_none());
        assert_eq!(cache.status("f"), RunStatus::Idle);
    }
}
