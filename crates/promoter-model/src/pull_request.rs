//! PullRequest: a desired-vs-observed record of one provider-side PR.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};
use crate::scm_provider::RepositoryReference;

/// Finalizer ensuring the provider-side PR is closed before the record
/// disappears. The misspelling is load-bearing: changing the literal would
/// orphan finalizers on objects written by earlier builds.
pub const PULL_REQUEST_FINALIZER: &str = "pullrequest.promoter.argoporoj.io/finalizer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Merged,
    Closed,
}

impl std::fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PullRequestState::Open => "open",
            PullRequestState::Merged => "merged",
            PullRequestState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestSpec {
    pub repository: RepositoryReference,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    /// Desired state; the reconciler converges the provider toward it.
    pub state: PullRequestState,
    /// Forwarded to the provider's merge call; empty means provider default.
    #[serde(default)]
    pub merge_commit_message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestStatus {
    /// Observed state on the provider; `None` until first convergence.
    #[serde(default)]
    pub state: Option<PullRequestState>,
    /// Provider-assigned id (e.g. the PR number).
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pr_creation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub observed_generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub metadata: ObjectMeta,
    pub spec: PullRequestSpec,
    #[serde(default)]
    pub status: PullRequestStatus,
}

impl Resource for PullRequest {
    const KIND: &'static str = "PullRequest";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_lowercase() {
        for (state, wire) in [
            (PullRequestState::Open, "\"open\""),
            (PullRequestState::Merged, "\"merged\""),
            (PullRequestState::Closed, "\"closed\""),
        ] {
            assert_eq!(serde_json::to_string(&state).unwrap(), wire);
            let back: PullRequestState = serde_json::from_str(wire).unwrap();
            assert_eq!(back, state);
        }
    }

    #[test]
    fn finalizer_literal_is_stable() {
        assert_eq!(
            PULL_REQUEST_FINALIZER,
            "pullrequest.promoter.argoporoj.io/finalizer"
        );
    }
}
