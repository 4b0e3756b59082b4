//! Reconciles one ProposedCommit: resolves the four-way SHA status from git
//! and owns the PullRequest for its environment.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use promoter_model::labels::{LABEL_ENVIRONMENT, LABEL_PROMOTION_STRATEGY, LABEL_PROPOSED_COMMIT};
use promoter_model::meta::{ObjectKey, ObjectMeta, Resource};
use promoter_model::names::{kube_safe_label, pull_request_name};
use promoter_model::proposed_commit::{CommitBranchState, ProposedCommit};
use promoter_model::pull_request::{PullRequest, PullRequestSpec, PullRequestState};
use promoter_store::{ObjectStore, Stores};

use crate::error::ControllerResult;
use crate::git::ShaResolver;
use crate::runtime::{Action, Reconciler};
use crate::scm::scm_provider_and_secret;

#[derive(Debug, Clone)]
pub struct ProposedCommitReconcilerConfig {
    pub requeue_duration: Duration,
}

impl Default for ProposedCommitReconcilerConfig {
    fn default() -> Self {
        Self {
            requeue_duration: Duration::from_secs(60),
        }
    }
}

pub struct ProposedCommitReconciler {
    stores: Stores,
    resolver: Arc<dyn ShaResolver>,
    config: ProposedCommitReconcilerConfig,
}

impl ProposedCommitReconciler {
    pub fn new(
        stores: Stores,
        resolver: Arc<dyn ShaResolver>,
        config: ProposedCommitReconcilerConfig,
    ) -> Self {
        Self {
            stores,
            resolver,
            config,
        }
    }

    /// Create the environment's PullRequest if it does not exist yet. The
    /// record carries the cross-referencing labels the orchestrator selects
    /// on, and an owner reference for cascading deletion.
    async fn ensure_pull_request(&self, pc: &ProposedCommit) -> ControllerResult<()> {
        let namespace = &pc.metadata.namespace;
        let name = pull_request_name(&pc.spec);
        match self.stores.pull_requests.get(namespace, &name).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let mut labels = BTreeMap::new();
        if let Some(strategy) = pc.metadata.labels.get(LABEL_PROMOTION_STRATEGY) {
            labels.insert(LABEL_PROMOTION_STRATEGY.to_string(), strategy.clone());
        }
        labels.insert(
            LABEL_PROPOSED_COMMIT.to_string(),
            kube_safe_label(&pc.metadata.name),
        );
        labels.insert(
            LABEL_ENVIRONMENT.to_string(),
            kube_safe_label(&pc.spec.active_branch),
        );

        let dry_sha = short_sha(&pc.status.proposed.dry.sha);
        let pr = PullRequest {
            metadata: ObjectMeta {
                labels,
                owner_references: vec![pc.owner_reference(true)],
                ..ObjectMeta::new(namespace.clone(), name.clone())
            },
            spec: PullRequestSpec {
                repository: pc.spec.repository.clone(),
                title: format!("Promote {dry_sha} to {}", pc.spec.active_branch),
                description: format!(
                    "Promotes `{}` from `{}` into `{}`.",
                    pc.status.proposed.dry.sha, pc.spec.proposed_branch, pc.spec.active_branch
                ),
                source_branch: pc.spec.proposed_branch.clone(),
                target_branch: pc.spec.active_branch.clone(),
                state: PullRequestState::Open,
                merge_commit_message: String::new(),
            },
            status: Default::default(),
        };

        match self.stores.pull_requests.create(pr).await {
            Ok(_) => {
                info!(namespace = %namespace, name = %name, "created pull request");
                Ok(())
            }
            // Raced another worker; the record exists, which is all we need.
            Err(err) if matches!(err, promoter_store::StoreError::AlreadyExists { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(7)]
}

#[async_trait]
impl Reconciler for ProposedCommitReconciler {
    fn kind(&self) -> &'static str {
        ProposedCommit::KIND
    }

    async fn reconcile(
        &self,
        key: &ObjectKey,
        _cancel: &CancellationToken,
    ) -> ControllerResult<Action> {
        let mut pc = match self.stores.proposed_commits.get(&key.namespace, &key.name).await {
            Ok(pc) => pc,
            Err(err) if err.is_not_found() => {
                debug!(namespace = %key.namespace, name = %key.name, "ProposedCommit not found");
                return Ok(Action::Done);
            }
            Err(err) => return Err(err.into()),
        };

        if pc.metadata.is_deleting() {
            return Ok(Action::Done);
        }

        let (scm, _secret) =
            scm_provider_and_secret(&self.stores, &pc.spec.repository, &key.namespace).await?;

        let active = self
            .resolver
            .resolve(&pc.spec.repository, &scm, &pc.spec.active_branch)
            .await?;
        let proposed = self
            .resolver
            .resolve(&pc.spec.repository, &scm, &pc.spec.proposed_branch)
            .await?;

        pc.status.active = CommitBranchState {
            dry: active.dry,
            hydrated: active.hydrated,
        };
        pc.status.proposed = CommitBranchState {
            dry: proposed.dry,
            hydrated: proposed.hydrated,
        };
        let pc = self.stores.proposed_commits.update_status(pc).await?;

        self.ensure_pull_request(&pc).await?;

        Ok(Action::RequeueAfter(self.config.requeue_duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sha_truncates_long_shas() {
        assert_eq!(short_sha("0123456789abcdef"), "0123456");
        assert_eq!(short_sha("abc"), "abc");
        assert_eq!(short_sha(""), "");
    }
}
