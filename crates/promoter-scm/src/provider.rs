//! SCM provider driver contract.
//!
//! Drivers are backend-agnostic and injected as trait objects; the
//! [`ProviderFactory`] dispatches on the `ScmProvider` variant so the
//! reconcilers never name a concrete driver.

use std::sync::Arc;

use async_trait::async_trait;

use promoter_model::commit_status::CommitStatus;
use promoter_model::pull_request::PullRequest;
use promoter_model::scm_provider::{ScmProvider, Secret};

use crate::error::{ScmError, ScmResult};
use crate::fake::FakeScm;
use crate::github::GithubScm;

/// Pull-request operations against one provider.
#[async_trait]
pub trait PullRequestProvider: Send + Sync {
    /// Whether an open PR for this branch pair exists on the provider.
    async fn find_open(&self, pr: &PullRequest) -> ScmResult<bool>;

    /// Open a PR and return the provider-assigned id.
    async fn create(
        &self,
        title: &str,
        source_branch: &str,
        target_branch: &str,
        description: &str,
        pr: &PullRequest,
    ) -> ScmResult<String>;

    /// Update title and description of the open PR.
    async fn update(&self, title: &str, description: &str, pr: &PullRequest) -> ScmResult<()>;

    /// Merge the open PR. An empty commit message means provider default.
    async fn merge(&self, commit_message: &str, pr: &PullRequest) -> ScmResult<()>;

    /// Close the open PR without merging.
    async fn close(&self, pr: &PullRequest) -> ScmResult<()>;
}

/// Commit-status publication against one provider.
#[async_trait]
pub trait CommitStatusProvider: Send + Sync {
    /// Publish the status and return the provider-assigned id.
    async fn publish(&self, cs: &CommitStatus) -> ScmResult<String>;
}

/// Builds drivers from an `ScmProvider` record and its credential secret.
pub trait ProviderFactory: Send + Sync {
    fn pull_requests(
        &self,
        provider: &ScmProvider,
        secret: &Secret,
    ) -> ScmResult<Arc<dyn PullRequestProvider>>;

    fn commit_statuses(
        &self,
        provider: &ScmProvider,
        secret: &Secret,
    ) -> ScmResult<Arc<dyn CommitStatusProvider>>;
}

/// Default factory: GitHub drivers are built per call from the secret; the
/// fake driver is a shared instance so tests can observe provider-side
/// effects.
pub struct DefaultProviderFactory {
    fake: Arc<FakeScm>,
}

impl DefaultProviderFactory {
    pub fn new(fake: Arc<FakeScm>) -> Self {
        Self { fake }
    }

    fn github(&self, provider: &ScmProvider, secret: &Secret) -> ScmResult<Option<Arc<GithubScm>>> {
        let Some(github) = &provider.spec.github else {
            return Ok(None);
        };
        let token = secret.token().ok_or_else(|| {
            ScmError::MissingCredentials(format!(
                "secret {} has no token key",
                secret.metadata.name
            ))
        })?;
        Ok(Some(Arc::new(GithubScm::new(&github.domain, token)?)))
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn pull_requests(
        &self,
        provider: &ScmProvider,
        secret: &Secret,
    ) -> ScmResult<Arc<dyn PullRequestProvider>> {
        if let Some(github) = self.github(provider, secret)? {
            return Ok(github);
        }
        if provider.spec.fake.is_some() {
            return Ok(self.fake.clone());
        }
        Err(ScmError::UnknownProvider {
            name: provider.metadata.name.clone(),
        })
    }

    fn commit_statuses(
        &self,
        provider: &ScmProvider,
        secret: &Secret,
    ) -> ScmResult<Arc<dyn CommitStatusProvider>> {
        if let Some(github) = self.github(provider, secret)? {
            return Ok(github);
        }
        if provider.spec.fake.is_some() {
            return Ok(self.fake.clone());
        }
        Err(ScmError::UnknownProvider {
            name: provider.metadata.name.clone(),
        })
    }
}
