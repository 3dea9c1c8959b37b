//! Async client for the inference worker thread.
//!
//! Requests are correlated by id: each call registers a oneshot sender,
//! posts an `infer` message and waits for the router task to deliver the
//! matching reply. Cancelling a call forgets the pending entry and tells the
//! worker to drop the request.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use forecast_config::Config;
use forecast_core::TailPoint;
use forecast_worker::{InferPayload, InferResult, InferenceWorker, WorkerHandle, WorkerReply, WorkerRequest};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::cache::now_ms;
use crate::error::ForecastError;

/// Something that can produce a forecast for a tail of closes.
#[async_trait]
pub trait ForecastInference: Send + Sync {
    async fn infer_forecast(
        &self,
        tail: Vec<TailPoint>,
        horizon: u32,
        model: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<InferResult, ForecastError>;
}

type ReplySender = oneshot::Sender<Result<InferResult, ForecastError>>;
type Pending = Arc<Mutex<HashMap<String, ReplySender>>>;
type Spawner = dyn Fn(mpsc::UnboundedSender<WorkerReply>) -> io::Result<WorkerHandle> + Send + Sync;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_request_id() -> String {
    format!("req_{}_{}", now_ms(), REQUEST_SEQ.fetch_add(1, Ordering::Relaxed))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    spawner: Box<Spawner>,
    handle: Mutex<Option<WorkerHandle>>,
    pending: Pending,
}

impl Inner {
    /// Post to the worker, starting it on first use.
    ///
    /// Must be called from within a tokio runtime; the reply router is a task.
    fn post(&self, request: WorkerRequest) -> Result<(), ForecastError> {
        let mut handle = lock(&self.handle);
        if handle.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = (self.spawner)(tx).map_err(|e| ForecastError::WorkerUnavailable(e.to_string()))?;
            tokio::spawn(route_replies(rx, Arc::clone(&self.pending)));
            log::debug!("Inference worker spawned");
            *handle = Some(worker);
        }

        let posted = handle.as_ref().map(|worker| worker.post(request));
        match posted {
            Some(Ok(())) => Ok(()),
            Some(Err(gone)) => {
                // Respawn on the next call.
                *handle = None;
                Err(ForecastError::WorkerUnavailable(gone.to_string()))
            }
            None => Err(ForecastError::WorkerUnavailable("worker not started".into())),
        }
    }

    fn forget(&self, id: &str) -> bool {
        lock(&self.pending).remove(id).is_some()
    }
}

async fn route_replies(mut rx: mpsc::UnboundedReceiver<WorkerReply>, pending: Pending) {
    while let Some(reply) = rx.recv().await {
        deliver(&pending, reply);
    }

    let orphaned: Vec<_> = lock(&pending).drain().collect();
    if !orphaned.is_empty() {
        log::warn!("Inference worker stopped with {} pending requests", orphaned.len());
    }
    for (_, tx) in orphaned {
        let _ = tx.send(Err(ForecastError::WorkerUnavailable("worker stopped".into())));
    }
}

fn deliver(pending: &Pending, reply: WorkerReply) {
    let Some(tx) = lock(pending).remove(reply.id()) else {
        log::debug!("No pending request for reply {}", reply.id());
        return;
    };
    let result = match reply {
        WorkerReply::Done { payload, .. } => Ok(payload),
        WorkerReply::Error { payload, .. } => Err(ForecastError::Worker {
            code: payload.code,
            message: payload.message,
        }),
    };
    let _ = tx.send(result);
}

/// Handle to the background inference worker. Cheap to clone.
#[derive(Clone)]
pub struct WorkerClient {
    inner: Arc<Inner>,
}

impl WorkerClient {
    /// Client for an [`InferenceWorker`] built from `config`.
    ///
    /// The worker, including feature backend probing, is built on its own
    /// thread.
    pub fn new(config: Config) -> Self {
        Self::with_spawner(move |replies| InferenceWorker::spawn_from_config(config.clone(), replies))
    }

    /// Client with a custom worker factory, called once per worker start.
    pub fn with_spawner<F>(spawner: F) -> Self
    where
        F: Fn(mpsc::UnboundedSender<WorkerReply>) -> io::Result<WorkerHandle> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                spawner: Box::new(spawner),
                handle: Mutex::new(None),
                pending: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    /// Requests still waiting for a reply.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Route a JSON-encoded worker message to its pending request.
    ///
    /// Messages of an unknown type reject the matching request.
    pub fn deliver_json(&self, raw: &str) -> Result<(), ForecastError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ForecastError::InvalidInput(format!("Malformed worker message: {e}")))?;
        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or_default().to_string();

        match kind.as_str() {
            forecast_worker::protocol::DONE_TYPE | forecast_worker::protocol::ERROR_TYPE => {
                let reply: WorkerReply = serde_json::from_value(value)
                    .map_err(|e| ForecastError::InvalidInput(format!("Malformed worker message: {e}")))?;
                deliver(&self.inner.pending, reply);
                Ok(())
            }
            _ => {
                let err = ForecastError::UnknownMessage(kind);
                let tx = value
                    .get("id")
                    .and_then(|id| id.as_str())
                    .and_then(|id| lock(&self.inner.pending).remove(id));
                if let Some(tx) = tx {
                    let _ = tx.send(Err(err.clone()));
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ForecastInference for WorkerClient {
    async fn infer_forecast(
        &self,
        tail: Vec<TailPoint>,
        horizon: u32,
        model: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<InferResult, ForecastError> {
        if tail.is_empty() || horizon == 0 {
            return Err(ForecastError::InvalidInput(
                "Invalid tail or horizon for inference".into(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(ForecastError::Aborted);
        }

        let id = next_request_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(id.clone(), tx);

        let request = WorkerRequest::Infer {
            id: id.clone(),
            payload: InferPayload { tail, horizon, model },
        };
        if let Err(e) = self.inner.post(request) {
            self.inner.forget(&id);
            return Err(e);
        }

        tokio::select! {
            reply = rx => reply.unwrap_or_else(|_| {
                Err(ForecastError::WorkerUnavailable("reply channel closed".into()))
            }),
            _ = cancel.cancelled() => {
                if self.inner.forget(&id) {
                    let _ = self.inner.post(WorkerRequest::Cancel { id: id.clone() });
                }
                log::debug!("Inference request {} cancelled", id);
                Err(ForecastError::Aborted)
            }
        }
    }
}
