//! Reconciles one CommitStatus record against the SCM provider.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use promoter_model::commit_status::CommitStatus;
use promoter_model::meta::{ObjectKey, Resource};
use promoter_scm::ProviderFactory;
use promoter_store::{ObjectStore, Stores};

use crate::error::ControllerResult;
use crate::runtime::{Action, Reconciler};
use crate::scm::scm_provider_and_secret;

pub struct CommitStatusReconciler {
    stores: Stores,
    factory: Arc<dyn ProviderFactory>,
}

impl CommitStatusReconciler {
    pub fn new(stores: Stores, factory: Arc<dyn ProviderFactory>) -> Self {
        Self { stores, factory }
    }
}

#[async_trait]
impl Reconciler for CommitStatusReconciler {
    fn kind(&self) -> &'static str {
        CommitStatus::KIND
    }

    async fn reconcile(
        &self,
        key: &ObjectKey,
        _cancel: &CancellationToken,
    ) -> ControllerResult<Action> {
        let mut cs = match self.stores.commit_statuses.get(&key.namespace, &key.name).await {
            Ok(cs) => cs,
            Err(err) if err.is_not_found() => {
                debug!(namespace = %key.namespace, name = %key.name, "CommitStatus not found");
                return Ok(Action::Done);
            }
            Err(err) => return Err(err.into()),
        };

        if cs.metadata.is_deleting() {
            return Ok(Action::Done);
        }

        // Already published at this generation.
        if cs.status.observed_generation == cs.metadata.generation && !cs.status.id.is_empty() {
            return Ok(Action::Done);
        }

        let (provider, secret) =
            scm_provider_and_secret(&self.stores, &cs.spec.repository, &key.namespace).await?;
        let driver = self.factory.commit_statuses(&provider, &secret)?;

        let id = driver.publish(&cs).await?;
        info!(
            namespace = %key.namespace,
            name = %key.name,
            sha = %cs.spec.sha,
            state = %cs.spec.state,
            "published commit status"
        );

        cs.status.id = id;
        cs.status.state = Some(cs.spec.state);
        cs.status.observed_generation = cs.metadata.generation;
        self.stores.commit_statuses.update_status(cs).await?;

        Ok(Action::Done)
    }
}
