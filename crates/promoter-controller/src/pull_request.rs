//! Reconciles one PullRequest record against the SCM provider.
//!
//! A state machine converging `status.state` toward `spec.state` through the
//! provider operations open/update/merge/close. The record owns a finalizer
//! so a provider-side PR is closed before the record disappears.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use promoter_model::meta::{ObjectKey, Resource};
use promoter_model::pull_request::{PullRequest, PullRequestState, PULL_REQUEST_FINALIZER};
use promoter_scm::{ProviderFactory, PullRequestProvider, ScmError};
use promoter_store::{retry_on_conflict, ObjectStore, Stores};

use crate::error::ControllerResult;
use crate::runtime::{Action, Reconciler};
use crate::scm::scm_provider_and_secret;

pub struct PullRequestReconciler {
    stores: Stores,
    factory: Arc<dyn ProviderFactory>,
}

impl PullRequestReconciler {
    pub fn new(stores: Stores, factory: Arc<dyn ProviderFactory>) -> Self {
        Self { stores, factory }
    }

    /// Ensure the finalizer is present on live objects, and run it on
    /// terminating ones. Returns `None` when the record was finalized.
    async fn handle_finalizer(
        &self,
        pr: PullRequest,
        provider: &dyn PullRequestProvider,
    ) -> ControllerResult<Option<PullRequest>> {
        let prs = self.stores.pull_requests.clone();
        let key = pr.metadata.key();

        if !pr.metadata.is_deleting() {
            if pr.metadata.has_finalizer(PULL_REQUEST_FINALIZER) {
                return Ok(Some(pr));
            }
            let updated = retry_on_conflict(|| {
                let prs = prs.clone();
                let key = key.clone();
                async move {
                    let mut current = prs.get(&key.namespace, &key.name).await?;
                    if !current.metadata.has_finalizer(PULL_REQUEST_FINALIZER) {
                        current.metadata.add_finalizer(PULL_REQUEST_FINALIZER);
                        current = prs.update(current).await?;
                    }
                    Ok(current)
                }
            })
            .await?;
            return Ok(Some(updated));
        }

        if pr.metadata.has_finalizer(PULL_REQUEST_FINALIZER) {
            let mut pr = pr;
            self.close_pull_request(&mut pr, provider).await?;
            retry_on_conflict(|| {
                let prs = prs.clone();
                let key = key.clone();
                async move {
                    let mut current = prs.get(&key.namespace, &key.name).await?;
                    current.metadata.remove_finalizer(PULL_REQUEST_FINALIZER);
                    prs.update(current).await?;
                    Ok(())
                }
            })
            .await?;
            return Ok(None);
        }

        Ok(Some(pr))
    }

    async fn create_pull_request(
        &self,
        pr: &mut PullRequest,
        provider: &dyn PullRequestProvider,
    ) -> ControllerResult<()> {
        info!(namespace = %pr.metadata.namespace, name = %pr.metadata.name, "opening pull request");
        let id = provider
            .create(
                &pr.spec.title,
                &pr.spec.source_branch,
                &pr.spec.target_branch,
                &pr.spec.description,
                pr,
            )
            .await?;
        pr.status.state = Some(PullRequestState::Open);
        pr.status.pr_creation_time = Some(Utc::now());
        pr.status.id = id;
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        pr: &mut PullRequest,
        provider: &dyn PullRequestProvider,
    ) -> ControllerResult<()> {
        info!(namespace = %pr.metadata.namespace, name = %pr.metadata.name, "merging pull request");
        provider.merge(&pr.spec.merge_commit_message, pr).await?;
        pr.status.state = Some(PullRequestState::Merged);
        Ok(())
    }

    async fn close_pull_request(
        &self,
        pr: &mut PullRequest,
        provider: &dyn PullRequestProvider,
    ) -> ControllerResult<()> {
        // Nothing to close once merged.
        if pr.status.state == Some(PullRequestState::Merged) {
            return Ok(());
        }
        info!(namespace = %pr.metadata.namespace, name = %pr.metadata.name, "closing pull request");
        match provider.close(pr).await {
            Ok(()) | Err(ScmError::PullRequestNotFound(_)) => {
                pr.status.state = Some(PullRequestState::Closed);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Reconciler for PullRequestReconciler {
    fn kind(&self) -> &'static str {
        PullRequest::KIND
    }

    async fn reconcile(
        &self,
        key: &ObjectKey,
        _cancel: &CancellationToken,
    ) -> ControllerResult<Action> {
        let pr = match self.stores.pull_requests.get(&key.namespace, &key.name).await {
            Ok(pr) => pr,
            Err(err) if err.is_not_found() => {
                debug!(namespace = %key.namespace, name = %key.name, "PullRequest not found");
                return Ok(Action::Done);
            }
            Err(err) => return Err(err.into()),
        };

        let (provider_resource, secret) =
            scm_provider_and_secret(&self.stores, &pr.spec.repository, &key.namespace).await?;
        let provider = self.factory.pull_requests(&provider_resource, &secret)?;

        let Some(mut pr) = self.handle_finalizer(pr, provider.as_ref()).await? else {
            return Ok(Action::Done);
        };

        let found = provider.find_open(&pr).await?;

        // A status was recorded but the provider no longer has an open PR:
        // the record outlived its subject.
        if !found && pr.status.state.is_some() {
            info!(
                namespace = %key.namespace,
                name = %key.name,
                "deleting pull request, no open PR found on provider"
            );
            return match self.stores.pull_requests.delete(&key.namespace, &key.name).await {
                Ok(()) => Ok(Action::Done),
                Err(err) if err.is_not_found() => Ok(Action::Done),
                Err(err) => Err(err.into()),
            };
        }

        if pr.status.state == Some(pr.spec.state)
            && pr.status.observed_generation == pr.metadata.generation
        {
            debug!(namespace = %key.namespace, name = %key.name, "reconcile not needed");
            return Ok(Action::Done);
        }

        if pr.spec.state == PullRequestState::Open && pr.status.state != Some(PullRequestState::Open)
        {
            self.create_pull_request(&mut pr, provider.as_ref()).await?;
        }

        if pr.spec.state == PullRequestState::Merged
            && pr.status.state != Some(PullRequestState::Merged)
        {
            self.merge_pull_request(&mut pr, provider.as_ref()).await?;
            self.stores.pull_requests.update_status(pr).await?;
            // Deletion happens on the next cycle, once the provider stops
            // reporting the PR as open.
            return Ok(Action::Requeue);
        }

        if pr.spec.state == PullRequestState::Closed
            && pr.status.state != Some(PullRequestState::Closed)
        {
            self.close_pull_request(&mut pr, provider.as_ref()).await?;
            self.stores.pull_requests.update_status(pr).await?;
            return Ok(Action::Requeue);
        }

        if pr.status.observed_generation != pr.metadata.generation {
            info!(namespace = %key.namespace, name = %key.name, "updating pull request");
            provider
                .update(&pr.spec.title, &pr.spec.description, &pr)
                .await?;
        }

        pr.status.observed_generation = pr.metadata.generation;
        self.stores.pull_requests.update_status(pr).await?;
        Ok(Action::Done)
    }
}
