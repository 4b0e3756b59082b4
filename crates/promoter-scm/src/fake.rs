//! In-process fake driver for testing.
//!
//! Keeps open pull requests and published statuses in memory. Merge and
//! close drop the PR from the open set, so a later `find_open` misses it —
//! the same observable behavior the reconcilers see from a real provider.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use promoter_model::commit_status::{CommitStatus, CommitStatusState};
use promoter_model::pull_request::PullRequest;

use crate::error::{ScmError, ScmResult};
use crate::provider::{CommitStatusProvider, PullRequestProvider};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PrKey {
    owner: String,
    name: String,
    source_branch: String,
    target_branch: String,
}

impl PrKey {
    fn of(pr: &PullRequest) -> Self {
        Self {
            owner: pr.spec.repository.owner.clone(),
            name: pr.spec.repository.name.clone(),
            source_branch: pr.spec.source_branch.clone(),
            target_branch: pr.spec.target_branch.clone(),
        }
    }
}

/// One provider-side pull request held by the fake.
#[derive(Debug, Clone)]
pub struct FakePullRequest {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// One provider-side commit status held by the fake.
#[derive(Debug, Clone)]
pub struct FakeCommitStatus {
    pub id: String,
    pub name: String,
    pub state: CommitStatusState,
    pub url: String,
}

#[derive(Debug, Default)]
struct FakeState {
    open: HashMap<PrKey, FakePullRequest>,
    merged: Vec<FakePullRequest>,
    closed: Vec<FakePullRequest>,
    statuses: HashMap<String, Vec<FakeCommitStatus>>,
    next_id: u64,
}

/// Shared in-memory SCM provider.
#[derive(Debug, Default)]
pub struct FakeScm {
    state: Mutex<FakeState>,
}

impl FakeScm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    /// Titles of merged PRs, in merge order.
    pub fn merged_titles(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.merged.iter().map(|p| p.title.clone()).collect()
    }

    pub fn merged_count(&self) -> usize {
        self.state.lock().unwrap().merged.len()
    }

    pub fn closed_count(&self) -> usize {
        self.state.lock().unwrap().closed.len()
    }

    /// Statuses published for `sha`, in publish order.
    pub fn statuses_for(&self, sha: &str) -> Vec<FakeCommitStatus> {
        let state = self.state.lock().unwrap();
        state.statuses.get(sha).cloned().unwrap_or_default()
    }

    /// Drop an open PR as if an actor closed it out-of-band on the provider.
    pub fn drop_open(&self, pr: &PullRequest) -> bool {
        let mut state = self.state.lock().unwrap();
        state.open.remove(&PrKey::of(pr)).is_some()
    }
}

#[async_trait]
impl PullRequestProvider for FakeScm {
    async fn find_open(&self, pr: &PullRequest) -> ScmResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.open.contains_key(&PrKey::of(pr)))
    }

    async fn create(
        &self,
        title: &str,
        _source_branch: &str,
        _target_branch: &str,
        description: &str,
        pr: &PullRequest,
    ) -> ScmResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state.open.insert(
            PrKey::of(pr),
            FakePullRequest {
                id: id.clone(),
                title: title.to_string(),
                description: description.to_string(),
            },
        );
        Ok(id)
    }

    async fn update(&self, title: &str, description: &str, pr: &PullRequest) -> ScmResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.open.get_mut(&PrKey::of(pr)) {
            Some(open) => {
                open.title = title.to_string();
                open.description = description.to_string();
                Ok(())
            }
            None => Err(ScmError::PullRequestNotFound(pr.metadata.name.clone())),
        }
    }

    async fn merge(&self, _commit_message: &str, pr: &PullRequest) -> ScmResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.open.remove(&PrKey::of(pr)) {
            Some(open) => {
                state.merged.push(open);
                Ok(())
            }
            None => Err(ScmError::PullRequestNotFound(pr.metadata.name.clone())),
        }
    }

    async fn close(&self, pr: &PullRequest) -> ScmResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.open.remove(&PrKey::of(pr)) {
            Some(open) => {
                state.closed.push(open);
                Ok(())
            }
            None => Err(ScmError::PullRequestNotFound(pr.metadata.name.clone())),
        }
    }
}

#[async_trait]
impl CommitStatusProvider for FakeScm {
    async fn publish(&self, cs: &CommitStatus) -> ScmResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .statuses
            .entry(cs.spec.sha.clone())
            .or_default()
            .push(FakeCommitStatus {
                id: id.clone(),
                name: cs.spec.name.clone(),
                state: cs.spec.state,
                url: cs.spec.url.clone(),
            });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use promoter_model::commit_status::CommitStatusSpec;
    use promoter_model::meta::ObjectMeta;
    use promoter_model::pull_request::{PullRequestSpec, PullRequestState};
    use promoter_model::scm_provider::RepositoryReference;

    use super::*;

    fn pull_request(source: &str, target: &str) -> PullRequest {
        PullRequest {
            metadata: ObjectMeta::new("default", format!("{source}-{target}")),
            spec: PullRequestSpec {
                repository: RepositoryReference {
                    owner: "demo-org".into(),
                    name: "demo-repo".into(),
                    scm_provider_ref: Default::default(),
                },
                title: format!("Promote {source} to {target}"),
                description: String::new(),
                source_branch: source.to_string(),
                target_branch: target.to_string(),
                state: PullRequestState::Open,
                merge_commit_message: String::new(),
            },
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn pull_request_lifecycle() {
        let fake = FakeScm::new();
        let pr = pull_request("env/dev-next", "env/dev");

        assert!(!fake.find_open(&pr).await.unwrap());

        let id = fake
            .create(&pr.spec.title, &pr.spec.source_branch, &pr.spec.target_branch, "", &pr)
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert!(fake.find_open(&pr).await.unwrap());

        fake.merge("", &pr).await.unwrap();
        assert!(!fake.find_open(&pr).await.unwrap());
        assert_eq!(fake.merged_count(), 1);
    }

    #[tokio::test]
    async fn close_drops_from_open_set() {
        let fake = FakeScm::new();
        let pr = pull_request("env/test-next", "env/test");
        fake.create("t", &pr.spec.source_branch, &pr.spec.target_branch, "", &pr)
            .await
            .unwrap();

        fake.close(&pr).await.unwrap();
        assert!(!fake.find_open(&pr).await.unwrap());
        assert_eq!(fake.closed_count(), 1);
    }

    #[tokio::test]
    async fn merge_of_unknown_pr_errors() {
        let fake = FakeScm::new();
        let pr = pull_request("env/dev-next", "env/dev");
        let err = fake.merge("", &pr).await.unwrap_err();
        assert!(matches!(err, ScmError::PullRequestNotFound(_)));
    }

    #[tokio::test]
    async fn publish_appends_per_sha() {
        let fake = FakeScm::new();
        let cs = CommitStatus {
            metadata: ObjectMeta::new("default", "health"),
            spec: CommitStatusSpec {
                repository: RepositoryReference::default(),
                sha: "abc123".into(),
                name: "argocd-app-health".into(),
                description: String::new(),
                state: CommitStatusState::Success,
                url: String::new(),
            },
            status: Default::default(),
        };
        fake.publish(&cs).await.unwrap();
        fake.publish(&cs).await.unwrap();

        let published = fake.statuses_for("abc123");
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].name, "argocd-app-health");
    }
}
