//! Debounced, deduplicated dispatch of forecast runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use forecast_config::OrchestratorConfig;
use forecast_core::{Provider, Timeframe, CLIENT_MODEL};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::manager::{ForecastManager, ForecastRequest};

/// Asset picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Provider name as selected, e.g. `binance`.
    pub provider: String,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastParams {
    pub tf: Timeframe,
    pub window: u32,
    pub horizon: u32,
    pub model: Option<String>,
}

/// What [`OrchestratorTrigger::observe`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A run was scheduled for this signature.
    Scheduled(String),
    /// Same signature as the last dispatch.
    Unchanged,
    Ignored(String),
}

#[derive(Default)]
struct TriggerState {
    last_signature: Option<String>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Watches selections and runs the forecast manager after a quiet period.
pub struct OrchestratorTrigger {
    manager: Arc<ForecastManager>,
    debounce: Duration,
    allow_mock: bool,
    state: Mutex<TriggerState>,
}

impl OrchestratorTrigger {
    pub fn new(manager: Arc<ForecastManager>, config: &OrchestratorConfig) -> Self {
        Self {
            manager,
            debounce: config.debounce(),
            allow_mock: config.allow_mock_provider,
            state: Mutex::new(TriggerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_provider(&self, name: &str) -> Option<Provider> {
        match name.trim().to_lowercase().as_str() {
            "binance" => Some(Provider::Binance),
            "moex" => Some(Provider::Moex),
            "mock" | "custom" if self.allow_mock => Some(Provider::Mock),
            _ => None,
        }
    }

    /// Signature of the last scheduled run.
    pub fn last_signature(&self) -> Option<String> {
        self.state().last_signature.clone()
    }

    /// React to a selection or parameter change.
    ///
    /// Must be called within a tokio runtime.
    pub fn observe(&self, selection: &Selection, params: &ForecastParams) -> TriggerOutcome {
        let Some(provider) = self.map_provider(&selection.provider) else {
            return TriggerOutcome::Ignored(format!("unsupported provider: {}", selection.provider));
        };
        let symbol = selection.symbol.trim();
        if symbol.is_empty() {
            return TriggerOutcome::Ignored("empty symbol".into());
        }
        if params.horizon == 0 || params.window == 0 {
            return TriggerOutcome::Ignored("horizon and window must be positive".into());
        }

        let model = params.model.clone().filter(|m| !m.is_empty());
        let signature = format!(
            "{}:{}:{}:{}:{}:{}",
            provider.label(),
            symbol,
            params.tf.label(),
            params.window,
            params.horizon,
            model.as_deref().unwrap_or(CLIENT_MODEL)
        );

        let mut state = self.state();
        if state.last_signature.as_deref() == Some(signature.as_str()) {
            return TriggerOutcome::Unchanged;
        }
        if let Some(previous) = state.cancel.take() {
            previous.cancel();
        }

        let request = ForecastRequest {
            symbol: symbol.to_string(),
            provider,
            tf: params.tf,
            window: params.window,
            horizon: params.horizon,
            model,
        };
        let cancel = CancellationToken::new();
        let manager = Arc::clone(&self.manager);
        let debounce = self.debounce;
        let token = cancel.clone();

        log::debug!("Scheduling forecast {}", signature);
        state.task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {}
                _ = token.cancelled() => return,
            }
            // Errors are already recorded in the run status.
            let _ = manager.run(&request, &token).await;
        }));
        state.cancel = Some(cancel);
        state.last_signature = Some(signature.clone());
        TriggerOutcome::Scheduled(signature)
    }

    /// Wait for the most recently scheduled run to finish.
    pub async fn settle(&self) {
        let task = self.state().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("Forecast task failed: {}", e);
            }
        }
    }
}

impl Drop for OrchestratorTrigger {
    fn drop(&mut self) {
        if let Some(cancel) = self.state().cancel.take() {
            cancel.cancel();
        }
    }
}
