//! ProposedCommit: the (active, proposed) SHA pair for one environment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};
use crate::scm_provider::RepositoryReference;

/// A commit id plus its commit time.
///
/// The zero value (empty sha, epoch time) means "not yet resolved".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaState {
    #[serde(default)]
    pub sha: String,
    #[serde(default = "epoch")]
    pub commit_time: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl Default for ShaState {
    fn default() -> Self {
        Self {
            sha: String::new(),
            commit_time: epoch(),
        }
    }
}

impl ShaState {
    pub fn new(sha: impl Into<String>, commit_time: DateTime<Utc>) -> Self {
        Self {
            sha: sha.into(),
            commit_time,
        }
    }
}

/// Dry and hydrated commit state of one branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitBranchState {
    /// Commit id on the source (pre-hydration) branch.
    #[serde(default)]
    pub dry: ShaState,
    /// Commit id on the rendered, deployable branch.
    #[serde(default)]
    pub hydrated: ShaState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedCommitSpec {
    pub repository: RepositoryReference,
    /// The environment's branch.
    pub active_branch: String,
    /// Conventionally `"<activeBranch>-next"`.
    pub proposed_branch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposedCommitStatus {
    #[serde(default)]
    pub active: CommitBranchState,
    #[serde(default)]
    pub proposed: CommitBranchState,
}

impl ProposedCommitStatus {
    /// Whether all four SHAs have been resolved. The promotion strategy
    /// reconciler does not act on an environment until this holds.
    pub fn fully_resolved(&self) -> bool {
        !self.active.dry.sha.is_empty()
            && !self.active.hydrated.sha.is_empty()
            && !self.proposed.dry.sha.is_empty()
            && !self.proposed.hydrated.sha.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedCommit {
    pub metadata: ObjectMeta,
    pub spec: ProposedCommitSpec,
    #[serde(default)]
    pub status: ProposedCommitStatus,
}

impl Resource for ProposedCommit {
    const KIND: &'static str = "ProposedCommit";

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
    fn fully_resolved_requires_all_four_shas() {
        let mut status = ProposedCommitStatus::default();
        assert!(!status.fully_resolved());

        status.active.dry = ShaState::new("d1", Utc::now());
        status.active.hydrated = ShaState::new("h1", Utc::now());
        status.proposed.dry = ShaState::new("d2", Utc::now());
        assert!(!status.fully_resolved());

        status.proposed.hydrated = ShaState::new("h2", Utc::now());
        assert!(status.fully_resolved());
    }
}
