//! Controller runtime: reconciler contract, worker pools, periodic resync.
//!
//! Each resource kind gets one [`Controller`] with its own worker pool.
//! Within a pool the [`WorkQueue`] serializes invocations per resource
//! instance; different objects reconcile in parallel. Reconcilers rely on
//! that guarantee instead of locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use promoter_model::meta::{ObjectKey, Resource};
use promoter_store::ObjectStore;

use crate::error::{ControllerError, ControllerResult};
use crate::queue::WorkQueue;

const DEFAULT_WORKERS: usize = 2;
const DEFAULT_RESYNC: Duration = Duration::from_secs(30);
const ERROR_REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// What to do after a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    Requeue,
    RequeueAfter(Duration),
}

/// One reconciler: given the key of one resource instance, move the world
/// closer to its desired state.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> ControllerResult<Action>;
}

/// Reconcile counters exposed on the metrics endpoint.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    pub reconciles: AtomicU64,
    pub errors: AtomicU64,
}

/// Lists the keys of every object of one kind, for periodic resync.
#[async_trait]
pub trait KeyLister: Send + Sync {
    async fn list_keys(&self) -> Vec<ObjectKey>;
}

pub struct StoreKeyLister<T: Resource> {
    store: Arc<dyn ObjectStore<T>>,
}

impl<T: Resource> StoreKeyLister<T> {
    pub fn new(store: Arc<dyn ObjectStore<T>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<T: Resource> KeyLister for StoreKeyLister<T> {
    async fn list_keys(&self) -> Vec<ObjectKey> {
        match self.store.list_all().await {
            Ok(objects) => objects.iter().map(|o| o.metadata().key()).collect(),
            Err(err) => {
                warn!(kind = T::KIND, error = %err, "resync list failed");
                Vec::new()
            }
        }
    }
}

/// Runs one reconciler over a work queue with `workers` tokio tasks plus a
/// resync ticker that enqueues every object of the kind.
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
    lister: Arc<dyn KeyLister>,
    workers: usize,
    resync: Duration,
    metrics: Arc<ControllerMetrics>,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>, lister: Arc<dyn KeyLister>) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            lister,
            workers: DEFAULT_WORKERS,
            resync: DEFAULT_RESYNC,
            metrics: Arc::new(ControllerMetrics::default()),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_resync(mut self, resync: Duration) -> Self {
        self.resync = resync;
        self
    }

    /// Handle for external enqueueing (the event router).
    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    pub fn metrics(&self) -> Arc<ControllerMetrics> {
        self.metrics.clone()
    }

    /// Spawn the resync ticker and worker tasks. Tasks stop when `cancel`
    /// fires; pending delayed requeues are dropped.
    pub fn start(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.workers + 1);

        {
            let queue = self.queue.clone();
            let lister = self.lister.clone();
            let cancel = cancel.clone();
            let resync = self.resync;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(resync);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            for key in lister.list_keys().await {
                                queue.add(key);
                            }
                        }
                    }
                }
            }));
        }

        for worker in 0..self.workers {
            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            let metrics = self.metrics.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(reconciler, queue, metrics, cancel, worker).await;
            }));
        }

        handles
    }
}

async fn worker_loop<R: Reconciler>(
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
    metrics: Arc<ControllerMetrics>,
    cancel: CancellationToken,
    worker: usize,
) {
    debug!(kind = reconciler.kind(), worker, "worker started");
    while let Some(key) = queue.next(&cancel).await {
        let outcome = reconciler.reconcile(&key, &cancel).await;
        metrics.reconciles.fetch_add(1, Ordering::Relaxed);
        queue.done(&key);
        match outcome {
            Ok(Action::Done) => {}
            Ok(Action::Requeue) => queue.add(key),
            Ok(Action::RequeueAfter(delay)) => {
                requeue_after(queue.clone(), key, delay, cancel.clone());
            }
            Err(ControllerError::Cancelled) => {}
            Err(err) => {
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                warn!(kind = reconciler.kind(), key = %key, error = %err, "reconcile failed");
                requeue_after(queue.clone(), key, ERROR_REQUEUE_DELAY, cancel.clone());
            }
        }
    }
    debug!(kind = reconciler.kind(), worker, "worker stopped");
}

fn requeue_after(queue: Arc<WorkQueue>, key: ObjectKey, delay: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => queue.add(key),
        }
    });
}
