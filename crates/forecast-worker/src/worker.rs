//! The inference worker and its dedicated thread.
//!
//! The worker owns the feature selector and every model session. It handles
//! one request at a time: validate, resolve the model, build features, run
//! the session, postprocess and reply. Any failure, panics included, becomes
//! an `error` reply carrying one of the worker error codes.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use forecast_config::{Config, ModelsConfig};
use forecast_features::{FeatureError, FeatureSelector};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::postprocess::{p50_from_delta, quantile_band};
use crate::protocol::{Diagnostics, ErrorCode, InferPayload, InferResult, WorkerReply, WorkerRequest};
use crate::session::{ModelError, ModelLoader, OnnxLoader, SessionCache};

/// A failed request, before it is turned into a reply.
#[derive(Debug, Clone, PartialEq)]
struct Failure {
    code: ErrorCode,
    message: String,
}

impl Failure {
    fn bad_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::BadInput,
            message: message.into(),
        }
    }
}

impl From<FeatureError> for Failure {
    fn from(e: FeatureError) -> Self {
        let code = if e.is_bad_input() {
            ErrorCode::BadInput
        } else {
            ErrorCode::Runtime
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<ModelError> for Failure {
    fn from(e: ModelError) -> Self {
        let code = match e {
            ModelError::Load { .. } => ErrorCode::Load,
            _ => ErrorCode::Runtime,
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "ML worker runtime error".to_string()
    }
}

/// Runs forecast inference requests.
pub struct InferenceWorker {
    models: ModelsConfig,
    selector: FeatureSelector,
    sessions: SessionCache,
}

impl InferenceWorker {
    pub fn new(models: ModelsConfig, selector: FeatureSelector, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            models,
            selector,
            sessions: SessionCache::new(loader),
        }
    }

    /// Worker with ONNX Runtime sessions and the configured feature backend.
    pub fn from_config(config: &Config) -> Self {
        let preference = config.features.effective_backend();
        log::info!("Feature backend preference: {}", preference);
        Self::new(
            config.models.clone(),
            FeatureSelector::new(preference),
            Box::new(OnnxLoader),
        )
    }

    /// Handle one inference request and build its reply.
    pub fn handle(&mut self, id: &str, payload: &InferPayload) -> WorkerReply {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.infer(payload, started)));

        match outcome {
            Ok(Ok(result)) => {
                log::debug!(
                    "{} done in {:.2} ms ({}, features {:?})",
                    id,
                    result.diag.runtime_ms,
                    result.diag.model_ver,
                    result.diag.features_backend
                );
                WorkerReply::Done {
                    id: id.to_string(),
                    payload: result,
                }
            }
            Ok(Err(failure)) => {
                log::warn!("{} failed: {} {}", id, failure.code, failure.message);
                WorkerReply::error(id, failure.code, failure.message)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("{} panicked: {}", id, message);
                WorkerReply::error(id, ErrorCode::Runtime, message)
            }
        }
    }

    fn infer(&mut self, payload: &InferPayload, started: Instant) -> Result<InferResult, Failure> {
        let Some(last) = payload.tail.last() else {
            return Err(Failure::bad_input("Invalid tail or horizon"));
        };
        if payload.horizon == 0 {
            return Err(Failure::bad_input("Invalid tail or horizon"));
        }

        let model_ver = match payload.model.as_deref().filter(|m| !m.is_empty()) {
            Some(requested) => self
                .models
                .resolve_model_version(requested)
                .ok_or_else(|| Failure::bad_input(format!("Unsupported model version: {requested}")))?,
            None => self.models.default_model.clone(),
        };
        let model = self
            .models
            .get(&model_ver)
            .or_else(|| self.models.default_config())
            .cloned()
            .ok_or_else(|| Failure {
                code: ErrorCode::Load,
                message: "No forecast models are registered".to_string(),
            })?;

        if payload.horizon as usize > model.horizon_steps {
            log::debug!(
                "Horizon {} exceeds the {} steps {} predicts; padding with flat deltas",
                payload.horizon,
                model.horizon_steps,
                model.model_ver
            );
        }

        let computed = self.selector.compute(&payload.tail, &model)?;
        let session = self.sessions.get_or_load(&model)?;
        let backend = session.backend();
        let delta = session.predict(&computed.features)?;

        let p50 = p50_from_delta(&delta, last.close(), payload.horizon as usize);
        let (p10, p90) = quantile_band(&p50, self.models.quantile_band);

        Ok(InferResult {
            p50,
            p10: Some(p10),
            p90: Some(p90),
            diag: Diagnostics {
                runtime_ms: started.elapsed().as_secs_f64() * 1000.0,
                backend,
                model_ver: model.model_ver,
                features_backend: Some(computed.backend),
            },
        })
    }

    /// Move the worker onto its own thread.
    ///
    /// Replies are delivered on `replies`; the thread exits when every
    /// [`WorkerHandle`] is dropped or the reply receiver goes away.
    pub fn spawn(self, replies: UnboundedSender<WorkerReply>) -> std::io::Result<WorkerHandle> {
        Self::spawn_with(move || self, replies)
    }

    /// Build the worker on its own thread, then run it.
    ///
    /// `build` runs on the worker thread, so slow setup such as GPU probing
    /// never blocks the caller. Requests posted meanwhile are queued.
    pub fn spawn_with<F>(build: F, replies: UnboundedSender<WorkerReply>) -> std::io::Result<WorkerHandle>
    where
        F: FnOnce() -> InferenceWorker + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("forecast-worker".to_string())
            .spawn(move || build().run(Inbox::new(rx), replies))?;
        Ok(WorkerHandle {
            requests: tx,
            thread,
        })
    }

    /// Spawn a worker built from `config` on the worker thread.
    pub fn spawn_from_config(config: Config, replies: UnboundedSender<WorkerReply>) -> std::io::Result<WorkerHandle> {
        Self::spawn_with(move || Self::from_config(&config), replies)
    }

    fn run(mut self, mut inbox: Inbox, replies: UnboundedSender<WorkerReply>) {
        log::info!("Inference worker started");
        while let Some((id, payload)) = inbox.next() {
            inbox.begin(&id);
            let reply = self.handle(&id, &payload);
            inbox.drain();
            if inbox.finish() {
                log::debug!("Dropping reply for cancelled request {}", id);
                continue;
            }
            if replies.send(reply).is_err() {
                break;
            }
        }
        log::info!("Inference worker stopped");
    }
}

/// Pending requests and cancellations seen by the worker thread.
struct Inbox {
    rx: mpsc::Receiver<WorkerRequest>,
    queue: VecDeque<(String, InferPayload)>,
    current: Option<String>,
    current_cancelled: bool,
    disconnected: bool,
}

impl Inbox {
    fn new(rx: mpsc::Receiver<WorkerRequest>) -> Self {
        Self {
            rx,
            queue: VecDeque::new(),
            current: None,
            current_cancelled: false,
            disconnected: false,
        }
    }

    fn accept(&mut self, request: WorkerRequest) {
        match request {
            WorkerRequest::Infer { id, payload } => self.queue.push_back((id, payload)),
            WorkerRequest::Cancel { id } => {
                let before = self.queue.len();
                self.queue.retain(|(queued, _)| *queued != id);
                if self.queue.len() != before {
                    log::debug!("Dropped queued request {}", id);
                } else if self.current.as_deref() == Some(id.as_str()) {
                    self.current_cancelled = true;
                }
            }
        }
    }

    /// Take every message already waiting, without blocking.
    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(request) => self.accept(request),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    /// Next request to run, blocking while idle. `None` once the senders are gone.
    fn next(&mut self) -> Option<(String, InferPayload)> {
        loop {
            if self.queue.is_empty() {
                if self.disconnected {
                    return None;
                }
                match self.rx.recv() {
                    Ok(request) => self.accept(request),
                    Err(_) => return None,
                }
            }
            self.drain();
            if let Some(next) = self.queue.pop_front() {
                return Some(next);
            }
        }
    }

    fn begin(&mut self, id: &str) {
        self.current = Some(id.to_string());
        self.current_cancelled = false;
    }

    /// Clear the in-flight request; true if it was cancelled meanwhile.
    fn finish(&mut self) -> bool {
        self.current = None;
        std::mem::take(&mut self.current_cancelled)
    }
}

/// The worker thread stopped accepting requests.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("inference worker has stopped")]
pub struct WorkerGone;

/// Sending side of a running worker thread.
pub struct WorkerHandle {
    requests: mpsc::Sender<WorkerRequest>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn post(&self, request: WorkerRequest) -> Result<(), WorkerGone> {
        self.requests.send(request).map_err(|_| WorkerGone)
    }

    /// Close the request channel and wait for the thread to finish its queue.
    pub fn shutdown(self) {
        let WorkerHandle { requests, thread } = self;
        drop(requests);
        if thread.join().is_err() {
            log::error!("Inference worker thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionBackend;
    use crate::session::ForecastModel;
    use forecast_config::FeatureBackendPreference;
    use forecast_core::TailPoint;
    use std::sync::{Arc, Mutex};

    struct FixedModel {
        delta: Vec<f32>,
        panic: bool,
    }

    impl ForecastModel for FixedModel {
        fn backend(&self) -> SessionBackend {
            SessionBackend::Wasm
        }

        fn predict(&mut self, features: &[f32]) -> Result<Vec<f32>, ModelError> {
            assert_eq!(features.len(), 10);
            if self.panic {
                panic!("kernel exploded");
            }
            Ok(self.delta.clone())
        }
    }

    struct FixedLoader {
        delta: Vec<f32>,
        panic: bool,
        fail: bool,
    }

    impl ModelLoader for FixedLoader {
        fn load(&self, model: &forecast_config::ModelConfig) -> Result<Box<dyn ForecastModel>, ModelError> {
            if self.fail {
                return Err(ModelError::Load {
                    model_ver: model.model_ver.clone(),
                    message: "file not found".into(),
                });
            }
            Ok(Box::new(FixedModel {
                delta: self.delta.clone(),
                panic: self.panic,
            }))
        }
    }

    fn worker_with(loader: impl ModelLoader + 'static) -> InferenceWorker {
        InferenceWorker::new(
            ModelsConfig::default(),
            FeatureSelector::cpu_only(FeatureBackendPreference::Cpu),
            Box::new(loader),
        )
    }

    fn worker(delta: Vec<f32>) -> InferenceWorker {
        worker_with(FixedLoader {
            delta,
            panic: false,
            fail: false,
        })
    }

    fn payload(len: usize, horizon: u32, model: Option<&str>) -> InferPayload {
        InferPayload {
            tail: (0..len).map(|i| TailPoint(i as f64, 100.0 + i as f64)).collect(),
            horizon,
            model: model.map(str::to_string),
        }
    }

    fn expect_error(reply: WorkerReply) -> (ErrorCode, String) {
        match reply {
            WorkerReply::Error { payload, .. } => (payload.code, payload.message),
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    fn expect_done(reply: WorkerReply) -> InferResult {
        match reply {
            WorkerReply::Done { payload, .. } => payload,
            other => panic!("expected done reply, got {other:?}"),
        }
    }

    #[test]
    fn test_successful_inference() {
        let mut w = worker(vec![1.0, 2.0, 3.0]);
        let result = expect_done(w.handle("req_1", &payload(128, 3, None)));

        assert_eq!(result.p50, vec![228.0, 229.0, 230.0]);
        assert_eq!(result.p10.as_ref().map(Vec::len), Some(3));
        assert!(result.p90.as_ref().unwrap()[0] > result.p50[0]);
        assert_eq!(result.diag.model_ver, "lgbm-0-1-0");
        assert_eq!(result.diag.backend, SessionBackend::Wasm);
        assert_eq!(result.diag.features_backend, Some(forecast_features::FeatureBackendKind::Cpu));
        assert!(result.diag.runtime_ms >= 0.0);
    }

    #[test]
    fn test_p50_length_matches_horizon() {
        let mut w = worker(vec![0.5]);
        let result = expect_done(w.handle("req_1", &payload(128, 24, None)));
        assert_eq!(result.p50.len(), 24);
    }

    #[test]
    fn test_model_alias_resolves() {
        let mut w = worker(vec![0.0]);
        let result = expect_done(w.handle("req_1", &payload(128, 1, Some("minimal"))));
        assert_eq!(result.diag.model_ver, "min-0-1-0");
    }

    #[test]
    fn test_invalid_tail_or_horizon() {
        let mut w = worker(vec![]);
        assert_eq!(
            expect_error(w.handle("a", &payload(0, 3, None))),
            (ErrorCode::BadInput, "Invalid tail or horizon".to_string())
        );
        assert_eq!(expect_error(w.handle("b", &payload(128, 0, None))).0, ErrorCode::BadInput);
    }

    #[test]
    fn test_unknown_model() {
        let mut w = worker(vec![]);
        assert_eq!(
            expect_error(w.handle("a", &payload(128, 3, Some("gpt")))),
            (ErrorCode::BadInput, "Unsupported model version: gpt".to_string())
        );
    }

    #[test]
    fn test_short_tail() {
        let mut w = worker(vec![]);
        assert_eq!(
            expect_error(w.handle("a", &payload(10, 3, None))),
            (
                ErrorCode::BadInput,
                "EBADINPUT: tail too short (need >= 64, got 10)".to_string()
            )
        );
    }

    #[test]
    fn test_load_failure() {
        let mut w = worker_with(FixedLoader {
            delta: vec![],
            panic: false,
            fail: true,
        });
        assert_eq!(expect_error(w.handle("a", &payload(128, 3, None))).0, ErrorCode::Load);
    }

    #[test]
    fn test_panic_becomes_runtime_error() {
        let mut w = worker_with(FixedLoader {
            delta: vec![],
            panic: true,
            fail: false,
        });
        assert_eq!(
            expect_error(w.handle("a", &payload(128, 3, None))),
            (ErrorCode::Runtime, "kernel exploded".to_string())
        );
    }

    struct GatedModel {
        started: mpsc::Sender<()>,
        gate: Arc<Mutex<mpsc::Receiver<()>>>,
    }

    impl ForecastModel for GatedModel {
        fn backend(&self) -> SessionBackend {
            SessionBackend::Wasm
        }

        fn predict(&mut self, _features: &[f32]) -> Result<Vec<f32>, ModelError> {
            let _ = self.started.send(());
            let _ = self.gate.lock().unwrap().recv();
            Ok(vec![1.0])
        }
    }

    struct GatedLoader {
        started: mpsc::Sender<()>,
        gate: Arc<Mutex<mpsc::Receiver<()>>>,
    }

    impl ModelLoader for GatedLoader {
        fn load(&self, _model: &forecast_config::ModelConfig) -> Result<Box<dyn ForecastModel>, ModelError> {
            Ok(Box::new(GatedModel {
                started: self.started.clone(),
                gate: Arc::clone(&self.gate),
            }))
        }
    }

    fn infer(id: &str) -> WorkerRequest {
        WorkerRequest::Infer {
            id: id.to_string(),
            payload: payload(128, 1, None),
        }
    }

    /// Cancelled requests are neither computed nor answered
    #[test]
    fn test_cancelled_requests_get_no_reply() {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let w = worker_with(GatedLoader {
            started: started_tx,
            gate: Arc::new(Mutex::new(gate_rx)),
        });
        let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = w.spawn(reply_tx).unwrap();

        handle.post(infer("a")).unwrap();
        started_rx.recv().unwrap();

        handle.post(infer("b")).unwrap();
        handle.post(WorkerRequest::Cancel { id: "b".into() }).unwrap();
        handle.post(WorkerRequest::Cancel { id: "a".into() }).unwrap();
        handle.post(infer("c")).unwrap();

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();

        let reply = reply_rx.blocking_recv().unwrap();
        assert_eq!(reply.id(), "c");
        assert_eq!(started_rx.recv().ok(), Some(()));
        assert!(started_rx.try_recv().is_err());

        handle.shutdown();
        assert!(reply_rx.blocking_recv().is_none());
    }

    #[test]
    fn test_requests_answered_in_order() {
        let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = worker(vec![1.0]).spawn(reply_tx).unwrap();

        handle.post(infer("one")).unwrap();
        handle.post(infer("two")).unwrap();

        assert_eq!(reply_rx.blocking_recv().unwrap().id(), "one");
        assert_eq!(reply_rx.blocking_recv().unwrap().id(), "two");
        handle.shutdown();
    }

    #[test]
    fn test_worker_is_built_on_its_thread() {
        let (built_tx, built_rx) = mpsc::channel();
        let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = InferenceWorker::spawn_with(
            move || {
                let name = thread::current().name().map(str::to_string);
                built_tx.send(name).unwrap();
                worker(vec![1.0])
            },
            reply_tx,
        )
        .unwrap();

        // Posted before the build finishes; still answered.
        handle.post(infer("early")).unwrap();
        assert_eq!(built_rx.recv().unwrap().as_deref(), Some("forecast-worker"));
        assert_eq!(reply_rx.blocking_recv().unwrap().id(), "early");
        handle.shutdown();
    }
}
