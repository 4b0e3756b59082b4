//! Behavioral contract tests for the store.
//!
//! Any conforming store implementation must pass these; they exercise the
//! guarantees the reconcilers depend on: compare-and-swap, the status
//! subresource, selectors, finalizer-aware deletion, and cascading removal
//! of owned dependents.

use std::sync::Arc;

use promoter_model::commit_status::{CommitStatus, CommitStatusSpec, CommitStatusState};
use promoter_model::labels::{LABEL_COMMIT_STATUS, LABEL_ENVIRONMENT};
use promoter_model::meta::{ObjectMeta, Resource};
use promoter_model::promotion_strategy::{
    Environment, PromotionStrategy, PromotionStrategySpec, PromotionStrategyStatus,
};
use promoter_model::proposed_commit::{ProposedCommit, ProposedCommitSpec};
use promoter_model::pull_request::{
    PullRequest, PullRequestSpec, PullRequestState, PULL_REQUEST_FINALIZER,
};
use promoter_model::scm_provider::RepositoryReference;
use promoter_model::COMMIT_STATUS_SHA_FIELD;
use promoter_store::{ListParams, MemoryStore, ObjectStore, StoreError, StoreOp};

fn strategy(name: &str) -> PromotionStrategy {
    PromotionStrategy {
        metadata: ObjectMeta::new("default", name),
        spec: PromotionStrategySpec {
            repository: RepositoryReference::default(),
            environments: vec![Environment::new("env/dev")],
            active_commit_statuses: Vec::new(),
            proposed_commit_statuses: Vec::new(),
        },
        status: PromotionStrategyStatus::default(),
    }
}

fn commit_status(name: &str, key: &str, sha: &str) -> CommitStatus {
    let mut cs = CommitStatus {
        metadata: ObjectMeta::new("default", name),
        spec: CommitStatusSpec {
            repository: RepositoryReference::default(),
            sha: sha.to_string(),
            name: key.to_string(),
            description: String::new(),
            state: CommitStatusState::Pending,
            url: String::new(),
        },
        status: Default::default(),
    };
    cs.metadata
        .labels
        .insert(LABEL_COMMIT_STATUS.to_string(), key.to_string());
    cs
}

#[tokio::test]
async fn create_assigns_identity_and_versions() {
    let store = MemoryStore::new();
    let created = store.create(strategy("demo")).await.unwrap();

    assert!(!created.metadata.uid.is_nil());
    assert_eq!(created.metadata.resource_version, 1);
    assert_eq!(created.metadata.generation, 1);
    assert!(created.metadata.creation_timestamp.is_some());
}

#[tokio::test]
async fn create_rejects_duplicates() {
    let store = MemoryStore::new();
    store.create(strategy("demo")).await.unwrap();
    let err = store.create(strategy("demo")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
}

#[tokio::test]
async fn get_missing_is_not_found() {
    let store = MemoryStore::new();
    let err = ObjectStore::<PromotionStrategy>::get(&store, "default", "missing")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn update_is_compare_and_swap() {
    let store = MemoryStore::new();
    let created = store.create(strategy("demo")).await.unwrap();

    let mut stale = created.clone();
    let updated = store.update(created).await.unwrap();
    assert_eq!(updated.metadata.resource_version, 2);
    assert_eq!(updated.metadata.generation, 2);

    stale.spec.environments.push(Environment::new("env/prod"));
    let err = store.update(stale).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn status_update_does_not_bump_generation() {
    let store = MemoryStore::new();
    let created = store.create(strategy("demo")).await.unwrap();

    let updated = store.update_status(created).await.unwrap();
    assert_eq!(updated.metadata.resource_version, 2);
    assert_eq!(updated.metadata.generation, 1);
}

#[tokio::test]
async fn list_filters_by_label_selector() {
    let store = MemoryStore::new();
    let mut a = strategy("with-label");
    a.metadata
        .labels
        .insert(LABEL_ENVIRONMENT.to_string(), "env-dev".to_string());
    store.create(a).await.unwrap();
    store.create(strategy("without-label")).await.unwrap();

    let params = ListParams::default().with_label(LABEL_ENVIRONMENT, "env-dev");
    let found: Vec<PromotionStrategy> = store.list("default", &params).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].metadata.name, "with-label");
}

#[tokio::test]
async fn list_filters_by_indexed_sha_field() {
    let store = MemoryStore::new();
    store
        .create(commit_status("health-1", "health", "sha-a"))
        .await
        .unwrap();
    store
        .create(commit_status("health-2", "health", "sha-b"))
        .await
        .unwrap();

    let params = ListParams::default()
        .with_label(LABEL_COMMIT_STATUS, "health")
        .with_field(COMMIT_STATUS_SHA_FIELD, "sha-a");
    let found: Vec<CommitStatus> = store.list("default", &params).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].spec.sha, "sha-a");
}

#[tokio::test]
async fn list_is_namespace_scoped() {
    let store = MemoryStore::new();
    store.create(strategy("demo")).await.unwrap();

    let found: Vec<PromotionStrategy> =
        store.list("other", &ListParams::default()).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn delete_cascades_through_owner_references() {
    let store = MemoryStore::new();
    let ps = store.create(strategy("demo")).await.unwrap();

    let mut pc = ProposedCommit {
        metadata: ObjectMeta::new("default", "demo-env-dev"),
        spec: ProposedCommitSpec {
            repository: RepositoryReference::default(),
            active_branch: "env/dev".into(),
            proposed_branch: "env/dev-next".into(),
        },
        status: Default::default(),
    };
    pc.metadata.owner_references.push(ps.owner_reference(true));
    let pc = store.create(pc).await.unwrap();

    let mut pr = PullRequest {
        metadata: ObjectMeta::new("default", "demo-pr"),
        spec: PullRequestSpec {
            repository: RepositoryReference::default(),
            title: "Promote".into(),
            description: String::new(),
            source_branch: "env/dev-next".into(),
            target_branch: "env/dev".into(),
            state: PullRequestState::Open,
            merge_commit_message: String::new(),
        },
        status: Default::default(),
    };
    pr.metadata.owner_references.push(pc.owner_reference(true));
    store.create(pr).await.unwrap();

    ObjectStore::<PromotionStrategy>::delete(&store, "default", "demo")
        .await
        .unwrap();

    assert!(ObjectStore::<ProposedCommit>::get(&store, "default", "demo-env-dev")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(ObjectStore::<PullRequest>::get(&store, "default", "demo-pr")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn finalizer_defers_removal_until_cleared() {
    let store = MemoryStore::new();
    let mut pr = PullRequest {
        metadata: ObjectMeta::new("default", "finalized-pr"),
        spec: PullRequestSpec {
            repository: RepositoryReference::default(),
            title: "Promote".into(),
            description: String::new(),
            source_branch: "env/dev-next".into(),
            target_branch: "env/dev".into(),
            state: PullRequestState::Open,
            merge_commit_message: String::new(),
        },
        status: Default::default(),
    };
    pr.metadata.add_finalizer(PULL_REQUEST_FINALIZER);
    store.create(pr).await.unwrap();

    ObjectStore::<PullRequest>::delete(&store, "default", "finalized-pr")
        .await
        .unwrap();

    // Still present, but marked as terminating.
    let mut terminating: PullRequest = store.get("default", "finalized-pr").await.unwrap();
    assert!(terminating.metadata.is_deleting());

    terminating.metadata.remove_finalizer(PULL_REQUEST_FINALIZER);
    store.update(terminating).await.unwrap();

    assert!(ObjectStore::<PullRequest>::get(&store, "default", "finalized-pr")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn mutations_emit_events() {
    let store = Arc::new(MemoryStore::new());
    let mut rx = store.subscribe();

    let created = store.create(strategy("demo")).await.unwrap();
    let ev = rx.recv().await.unwrap();
    assert_eq!(ev.kind, PromotionStrategy::KIND);
    assert_eq!(ev.op, StoreOp::Created);

    let updated = store.update(created).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().op, StoreOp::SpecUpdated);

    store.update_status(updated).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().op, StoreOp::StatusUpdated);

    ObjectStore::<PromotionStrategy>::delete(store.as_ref(), "default", "demo")
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap().op, StoreOp::Deleted);
}
