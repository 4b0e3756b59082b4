//! Store contract: typed access to namespaced resource records.
//!
//! The durable backend is an external collaborator; this trait captures the
//! contract the reconcilers rely on. [`crate::MemoryStore`] is the in-process
//! implementation used by tests and the single-process daemon.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use promoter_model::commit_status::CommitStatus;
use promoter_model::meta::{ObjectKey, Resource};
use promoter_model::promotion_strategy::PromotionStrategy;
use promoter_model::proposed_commit::ProposedCommit;
use promoter_model::pull_request::PullRequest;
use promoter_model::scm_provider::{GitRepository, ScmProvider, Secret};

use crate::error::StoreResult;

/// Selection options for [`ObjectStore::list`].
///
/// Labels select by equality on every entry; the field selector matches one
/// of the resource's indexed fields (only `CommitStatus` exposes
/// `.spec.sha`).
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub label_selector: BTreeMap<String, String>,
    pub field_selector: Option<(&'static str, String)>,
}

impl ListParams {
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.label_selector.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, field: &'static str, value: impl Into<String>) -> Self {
        self.field_selector = Some((field, value.into()));
        self
    }

    /// Whether `obj` satisfies both selectors.
    pub fn matches<T: Resource>(&self, obj: &T) -> bool {
        let labels = &obj.metadata().labels;
        if !self
            .label_selector
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
        {
            return false;
        }
        match &self.field_selector {
            Some((field, value)) => obj.indexed_fields().get(field) == Some(value),
            None => true,
        }
    }
}

/// What a store mutation did, for watch-style triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Created,
    /// Spec or metadata write (bumps generation for spec writes).
    SpecUpdated,
    /// Status-subresource write; generation is untouched.
    StatusUpdated,
    Deleted,
}

/// Emitted on every mutation. Controllers map these to work-queue keys.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub kind: &'static str,
    pub key: ObjectKey,
    pub op: StoreOp,
}

/// Typed store access for one resource kind.
///
/// `update` is compare-and-swap on `resource_version` and bumps the
/// generation; `update_status` bumps only the resource version and must not
/// carry spec edits. `delete` honors finalizers: a finalized object is
/// marked with a deletion timestamp and removed once its finalizer list
/// empties. Removal cascades to owned dependents.
#[async_trait]
pub trait ObjectStore<T: Resource>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<T>;

    async fn list(&self, namespace: &str, params: &ListParams) -> StoreResult<Vec<T>>;

    /// All objects of the kind across namespaces, for periodic resync.
    async fn list_all(&self) -> StoreResult<Vec<T>>;

    async fn create(&self, obj: T) -> StoreResult<T>;

    async fn update(&self, obj: T) -> StoreResult<T>;

    async fn update_status(&self, obj: T) -> StoreResult<T>;

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()>;
}

/// Per-kind handles onto one store, cloned cheaply.
///
/// Reconcilers take this instead of a kitchen-sink client so each call site
/// names the kind it touches.
#[derive(Clone)]
pub struct Stores {
    pub promotion_strategies: Arc<dyn ObjectStore<PromotionStrategy>>,
    pub proposed_commits: Arc<dyn ObjectStore<ProposedCommit>>,
    pub pull_requests: Arc<dyn ObjectStore<PullRequest>>,
    pub commit_statuses: Arc<dyn ObjectStore<CommitStatus>>,
    pub scm_providers: Arc<dyn ObjectStore<ScmProvider>>,
    pub git_repositories: Arc<dyn ObjectStore<GitRepository>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
}

impl Stores {
    /// Handles backed by one in-memory store.
    pub fn memory(store: Arc<crate::MemoryStore>) -> Self {
        Self {
            promotion_strategies: store.clone(),
            proposed_commits: store.clone(),
            pull_requests: store.clone(),
            commit_statuses: store.clone(),
            scm_providers: store.clone(),
            git_repositories: store.clone(),
            secrets: store,
        }
    }
}
