//! PromotionStrategy: the root declaration of an ordered environment chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commit_status::CommitStatusState;
use crate::meta::{ObjectMeta, Resource};
use crate::proposed_commit::ShaState;
use crate::scm_provider::RepositoryReference;

/// Selects commit-status records by their check key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatusSelector {
    pub key: String,
}

impl CommitStatusSelector {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// One environment in the promotion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// The Git branch representing this environment's deployed state.
    pub branch: String,
    /// Unset means true.
    #[serde(default)]
    pub auto_merge: Option<bool>,
    /// Extends the strategy-global list of the same name.
    #[serde(default)]
    pub active_commit_statuses: Vec<CommitStatusSelector>,
    #[serde(default)]
    pub proposed_commit_statuses: Vec<CommitStatusSelector>,
}

impl Environment {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            auto_merge: None,
            active_commit_statuses: Vec::new(),
            proposed_commit_statuses: Vec::new(),
        }
    }

    pub fn auto_merge_enabled(&self) -> bool {
        self.auto_merge.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionStrategySpec {
    pub repository: RepositoryReference,
    /// Ordered; the first environment has no upstream gate.
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub active_commit_statuses: Vec<CommitStatusSelector>,
    #[serde(default)]
    pub proposed_commit_statuses: Vec<CommitStatusSelector>,
}

/// Rolled-up state of an environment's gating checks.
///
/// The sentinel variants are observable status values, not errors: they
/// block promotion without failing the reconciler. `TooManyMatchingSha`
/// keeps its historical wire spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollupState {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "failure")]
    Failure,
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "no-commit-status-found")]
    NoCommitStatusFound,
    #[serde(rename = "to-many-matching-sha")]
    TooManyMatchingSha,
}

impl From<CommitStatusState> for RollupState {
    fn from(state: CommitStatusState) -> Self {
        match state {
            CommitStatusState::Pending => RollupState::Pending,
            CommitStatusState::Success => RollupState::Success,
            CommitStatusState::Failure => RollupState::Failure,
        }
    }
}

impl std::fmt::Display for RollupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RollupState::Success => "success",
            RollupState::Pending => "pending",
            RollupState::Failure => "failure",
            RollupState::Unknown => "unknown",
            RollupState::NoCommitStatusFound => "no-commit-status-found",
            RollupState::TooManyMatchingSha => "to-many-matching-sha",
        };
        f.write_str(s)
    }
}

/// A rolled-up commit status: state plus the sha it was derived from. The
/// sha mirrors the sentinel string when the state is a sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupStatus {
    pub state: RollupState,
    pub sha: String,
}

impl RollupStatus {
    pub fn unknown() -> Self {
        Self {
            state: RollupState::Unknown,
            sha: "unknown".to_string(),
        }
    }
}

/// Dry/hydrated state of one side (active or proposed) of an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStateStatus {
    pub dry: ShaState,
    pub hydrated: ShaState,
    pub commit_status: RollupStatus,
}

/// A dry sha observed healthy, with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthyDrySha {
    pub sha: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub branch: String,
    pub active: BranchStateStatus,
    pub proposed: BranchStateStatus,
    /// Capped at 10 entries.
    #[serde(default)]
    pub last_healthy_dry_shas: Vec<HealthyDrySha>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromotionStrategyStatus {
    #[serde(default)]
    pub environments: Vec<EnvironmentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionStrategy {
    pub metadata: ObjectMeta,
    pub spec: PromotionStrategySpec,
    #[serde(default)]
    pub status: PromotionStrategyStatus,
}

impl Resource for PromotionStrategy {
    const KIND: &'static str = "PromotionStrategy";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl PromotionStrategy {
    /// Status environments in spec order. Spec order is authoritative;
    /// the order entries landed in status is ignored.
    pub fn environments_from_status_in_order(&self) -> Vec<&EnvironmentStatus> {
        let mut out = Vec::with_capacity(self.spec.environments.len());
        for env in &self.spec.environments {
            for status in &self.status.environments {
                if env.branch == status.branch {
                    out.push(status);
                }
            }
        }
        out
    }

    /// Position (in spec order) and status entry for `branch`.
    pub fn environment_status_by_branch(&self, branch: &str) -> Option<(usize, &EnvironmentStatus)> {
        self.environments_from_status_in_order()
            .into_iter()
            .enumerate()
            .find(|(_, status)| status.branch == branch)
    }

    /// The status entry of the environment directly upstream of `branch`,
    /// if `branch` is not the first environment.
    pub fn previous_environment_status_by_branch(&self, branch: &str) -> Option<&EnvironmentStatus> {
        let ordered = self.environments_from_status_in_order();
        ordered
            .iter()
            .position(|status| status.branch == branch)
            .filter(|&i| i > 0)
            .map(|i| ordered[i - 1])
    }
}

/// Replace the entry with a matching branch, or append if none matches.
pub fn upsert_environment_status(
    mut list: Vec<EnvironmentStatus>,
    entry: EnvironmentStatus,
) -> Vec<EnvironmentStatus> {
    match list.iter().position(|e| e.branch == entry.branch) {
        Some(index) => list[index] = entry,
        None => list.push(entry),
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_entry(branch: &str) -> EnvironmentStatus {
        EnvironmentStatus {
            branch: branch.to_string(),
            active: BranchStateStatus {
                dry: ShaState::default(),
                hydrated: ShaState::default(),
                commit_status: RollupStatus::unknown(),
            },
            proposed: BranchStateStatus {
                dry: ShaState::default(),
                hydrated: ShaState::default(),
                commit_status: RollupStatus::unknown(),
            },
            last_healthy_dry_shas: Vec::new(),
        }
    }

    fn strategy(spec_branches: &[&str], status_branches: &[&str]) -> PromotionStrategy {
        PromotionStrategy {
            metadata: ObjectMeta::new("default", "demo"),
            spec: PromotionStrategySpec {
                repository: RepositoryReference::default(),
                environments: spec_branches.iter().map(|b| Environment::new(*b)).collect(),
                active_commit_statuses: Vec::new(),
                proposed_commit_statuses: Vec::new(),
            },
            status: PromotionStrategyStatus {
                environments: status_branches.iter().map(|b| status_entry(b)).collect(),
            },
        }
    }

    #[test]
    fn rollup_state_wire_values() {
        assert_eq!(
            serde_json::to_string(&RollupState::NoCommitStatusFound).unwrap(),
            "\"no-commit-status-found\""
        );
        assert_eq!(
            serde_json::to_string(&RollupState::TooManyMatchingSha).unwrap(),
            "\"to-many-matching-sha\""
        );
        assert_eq!(RollupState::TooManyMatchingSha.to_string(), "to-many-matching-sha");
    }

    #[test]
    fn auto_merge_defaults_to_true() {
        let env = Environment::new("environment/development");
        assert!(env.auto_merge_enabled());

        let env = Environment {
            auto_merge: Some(false),
            ..Environment::new("environment/production")
        };
        assert!(!env.auto_merge_enabled());
    }

    #[test]
    fn status_order_follows_spec_order() {
        let ps = strategy(
            &["env/dev", "env/test", "env/prod"],
            &["env/prod", "env/dev", "env/test"],
        );
        let ordered: Vec<_> = ps
            .environments_from_status_in_order()
            .iter()
            .map(|e| e.branch.clone())
            .collect();
        assert_eq!(ordered, vec!["env/dev", "env/test", "env/prod"]);
    }

    #[test]
    fn previous_environment_lookup() {
        let ps = strategy(&["env/dev", "env/test"], &["env/dev", "env/test"]);
        assert!(ps.previous_environment_status_by_branch("env/dev").is_none());
        let prev = ps.previous_environment_status_by_branch("env/test").unwrap();
        assert_eq!(prev.branch, "env/dev");
    }

    #[test]
    fn environment_status_by_branch_returns_spec_position() {
        let ps = strategy(&["env/dev", "env/test"], &["env/test", "env/dev"]);
        let (i, status) = ps.environment_status_by_branch("env/test").unwrap();
        assert_eq!(i, 1);
        assert_eq!(status.branch, "env/test");
    }

    #[test]
    fn upsert_replaces_matching_branch() {
        let list = vec![status_entry("env/dev"), status_entry("env/test")];
        let mut replacement = status_entry("env/dev");
        replacement.active.commit_status.state = RollupState::Success;

        let list = upsert_environment_status(list, replacement.clone());
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].active.commit_status.state, RollupState::Success);

        // Idempotent: applying the same entry twice yields the same list.
        let again = upsert_environment_status(list.clone(), replacement);
        assert_eq!(again, list);
    }

    #[test]
    fn upsert_appends_unknown_branch() {
        let list = upsert_environment_status(Vec::new(), status_entry("env/dev"));
        assert_eq!(list.len(), 1);
        let list = upsert_environment_status(list, status_entry("env/test"));
        assert_eq!(list.len(), 2);
    }
}
