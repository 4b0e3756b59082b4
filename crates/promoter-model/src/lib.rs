//! Resource model for the GitOps promotion controller.
//!
//! Typed records for the six resource kinds, the metadata/ownership
//! machinery they share, the reserved label keys used for cross-referencing,
//! and the length-safe name/label derivation helpers.

pub mod commit_status;
pub mod labels;
pub mod meta;
pub mod names;
pub mod promotion_strategy;
pub mod proposed_commit;
pub mod pull_request;
pub mod scm_provider;

pub use commit_status::{
    CommitStatus, CommitStatusSpec, CommitStatusState, CommitStatusStatus, COMMIT_STATUS_SHA_FIELD,
};
pub use meta::{ObjectKey, ObjectMeta, OwnerReference, Resource};
pub use names::{kube_safe_label, kube_safe_unique_name, proposed_commit_name, pull_request_name};
pub use promotion_strategy::{
    upsert_environment_status, BranchStateStatus, CommitStatusSelector, Environment,
    EnvironmentStatus, HealthyDrySha, PromotionStrategy, PromotionStrategySpec,
    PromotionStrategyStatus, RollupState, RollupStatus,
};
pub use proposed_commit::{
    CommitBranchState, ProposedCommit, ProposedCommitSpec, ProposedCommitStatus, ShaState,
};
pub use pull_request::{
    PullRequest, PullRequestSpec, PullRequestState, PullRequestStatus, PULL_REQUEST_FINALIZER,
};
pub use scm_provider::{
    FakeSpec, GitHubSpec, GitRepository, GitRepositorySpec, LocalObjectReference,
    NamespacedObjectReference, RepositoryReference, ScmProvider, ScmProviderSpec, Secret,
};
