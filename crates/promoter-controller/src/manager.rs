//! Manager: runs the controllers and routes store events to their queues.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use promoter_model::commit_status::CommitStatus;
use promoter_model::meta::{ObjectKey, Resource};
use promoter_model::promotion_strategy::PromotionStrategy;
use promoter_model::proposed_commit::ProposedCommit;
use promoter_model::pull_request::PullRequest;
use promoter_store::{MemoryStore, ObjectStore, StoreEvent, StoreOp, Stores};

use crate::queue::WorkQueue;
use crate::runtime::{Controller, Reconciler};

/// Owns the cancellation token and the spawned controller tasks.
pub struct Manager {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a controller under this manager's cancellation scope.
    pub fn register<R: Reconciler>(&mut self, controller: Controller<R>) {
        self.handles.extend(controller.start(self.cancel.clone()));
    }

    /// Track an auxiliary task (e.g. the event router).
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Cancel everything and wait for all tasks to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Work-queue handles the event router feeds.
#[derive(Clone)]
pub struct RouterQueues {
    pub promotion_strategies: Arc<WorkQueue>,
    pub proposed_commits: Arc<WorkQueue>,
    pub pull_requests: Arc<WorkQueue>,
    pub commit_statuses: Arc<WorkQueue>,
}

/// Subscribe to store events and enqueue the affected objects.
///
/// Spec changes enqueue the object itself (status-only writes are dropped,
/// the generation-changed predicate); any change to a ProposedCommit also
/// enqueues its owning PromotionStrategy.
pub fn spawn_event_router(
    store: Arc<MemoryStore>,
    stores: Stores,
    queues: RouterQueues,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => route_event(&stores, &queues, event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "store event stream lagged; resync covers the gap");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

async fn route_event(stores: &Stores, queues: &RouterQueues, event: StoreEvent) {
    let spec_change = event.op != StoreOp::StatusUpdated;
    if event.kind == PromotionStrategy::KIND {
        if spec_change {
            queues.promotion_strategies.add(event.key);
        }
    } else if event.kind == ProposedCommit::KIND {
        // Owned resource: any change re-triggers the owning strategy.
        if event.op != StoreOp::Deleted {
            if let Ok(pc) = stores
                .proposed_commits
                .get(&event.key.namespace, &event.key.name)
                .await
            {
                if let Some(owner) = pc.metadata.controller_owner() {
                    if owner.kind == PromotionStrategy::KIND {
                        queues.promotion_strategies.add(ObjectKey::new(
                            event.key.namespace.clone(),
                            owner.name.clone(),
                        ));
                    }
                }
            }
        }
        if spec_change {
            queues.proposed_commits.add(event.key);
        }
    } else if event.kind == PullRequest::KIND {
        if spec_change {
            queues.pull_requests.add(event.key);
        }
    } else if event.kind == CommitStatus::KIND {
        if spec_change {
            queues.commit_statuses.add(event.key);
        }
    }
}
