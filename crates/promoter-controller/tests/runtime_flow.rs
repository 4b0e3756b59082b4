//! The full runtime (manager, event router, worker pools) converging a
//! strategy end-to-end without any manual reconcile ordering.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use promoter_controller::{
    spawn_event_router, CommitStatusReconciler, Controller, FakeShaResolver, Manager,
    PromotionStrategyReconciler, PromotionStrategyReconcilerConfig, ProposedCommitReconciler,
    ProposedCommitReconcilerConfig, PullRequestReconciler, RouterQueues, StoreKeyLister,
};
use promoter_model::meta::ObjectMeta;
use promoter_model::promotion_strategy::{
    Environment, PromotionStrategy, PromotionStrategySpec,
};
use promoter_model::pull_request::PullRequest;
use promoter_model::scm_provider::{
    FakeSpec, LocalObjectReference, NamespacedObjectReference, RepositoryReference, ScmProvider,
    ScmProviderSpec, Secret,
};
use promoter_scm::{DefaultProviderFactory, FakeScm, ProviderFactory};
use promoter_store::{MemoryStore, ObjectStore, Stores};

#[tokio::test]
async fn runtime_promotes_single_environment_unattended() {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store.clone());
    let scm = Arc::new(FakeScm::new());
    let factory: Arc<dyn ProviderFactory> = Arc::new(DefaultProviderFactory::new(scm.clone()));
    let resolver = Arc::new(FakeShaResolver::new());

    let t = Utc.timestamp_opt(100, 0).unwrap();
    resolver.set_branch("env/dev", "D1", t, "H1", t);
    resolver.set_branch("env/dev-next", "D1", t, "H1", t);

    let fast = Duration::from_millis(200);
    let promotion_strategies = Controller::new(
        Arc::new(PromotionStrategyReconciler::new(
            stores.clone(),
            PromotionStrategyReconcilerConfig {
                requeue_duration: fast,
            },
        )),
        Arc::new(StoreKeyLister::new(stores.promotion_strategies.clone())),
    )
    .with_resync(Duration::from_millis(500));
    let proposed_commits = Controller::new(
        Arc::new(ProposedCommitReconciler::new(
            stores.clone(),
            resolver,
            ProposedCommitReconcilerConfig {
                requeue_duration: fast,
            },
        )),
        Arc::new(StoreKeyLister::new(stores.proposed_commits.clone())),
    )
    .with_resync(Duration::from_millis(500));
    let pull_requests = Controller::new(
        Arc::new(PullRequestReconciler::new(stores.clone(), factory.clone())),
        Arc::new(StoreKeyLister::new(stores.pull_requests.clone())),
    )
    .with_resync(Duration::from_millis(500));
    let commit_statuses = Controller::new(
        Arc::new(CommitStatusReconciler::new(stores.clone(), factory)),
        Arc::new(StoreKeyLister::new(stores.commit_statuses.clone())),
    )
    .with_resync(Duration::from_millis(500));

    let queues = RouterQueues {
        promotion_strategies: promotion_strategies.queue(),
        proposed_commits: proposed_commits.queue(),
        pull_requests: pull_requests.queue(),
        commit_statuses: commit_statuses.queue(),
    };
    let mut manager = Manager::new();
    manager.track(spawn_event_router(
        store,
        stores.clone(),
        queues,
        manager.cancel_token(),
    ));
    manager.register(promotion_strategies);
    manager.register(proposed_commits);
    manager.register(pull_requests);
    manager.register(commit_statuses);

    stores
        .scm_providers
        .create(ScmProvider {
            metadata: ObjectMeta::new("default", "fake-provider"),
            spec: ScmProviderSpec {
                github: None,
                fake: Some(FakeSpec {}),
                secret_ref: LocalObjectReference {
                    name: "scm-secret".into(),
                },
            },
        })
        .await
        .unwrap();
    stores
        .secrets
        .create(Secret {
            metadata: ObjectMeta::new("default", "scm-secret"),
            data: BTreeMap::new(),
        })
        .await
        .unwrap();
    stores
        .promotion_strategies
        .create(PromotionStrategy {
            metadata: ObjectMeta::new("default", "demo"),
            spec: PromotionStrategySpec {
                repository: RepositoryReference {
                    owner: "demo-org".into(),
                    name: "demo-repo".into(),
                    scm_provider_ref: NamespacedObjectReference {
                        name: "fake-provider".into(),
                        namespace: None,
                    },
                },
                environments: vec![Environment::new("env/dev")],
                active_commit_statuses: Vec::new(),
                proposed_commit_statuses: Vec::new(),
            },
            status: Default::default(),
        })
        .await
        .unwrap();

    // The PR is opened, merged on the provider, and its record removed,
    // without any manual driving.
    let converged = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let remaining: Vec<PullRequest> = stores.pull_requests.list_all().await.unwrap();
            if scm.merged_count() >= 1 && remaining.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "promotion did not converge in time");

    manager.shutdown().await;
}
