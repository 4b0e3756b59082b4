//! Reconciles one PromotionStrategy: the top-level orchestrator.
//!
//! Per invocation it ensures one ProposedCommit per declared environment,
//! waits for their SHA resolution, bubbles the gating commit statuses up
//! into the strategy status, copies prior-stage statuses forward onto the
//! next stage's proposed sha, and flips gated PullRequests to merged.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use promoter_model::commit_status::{
    CommitStatus, CommitStatusSpec, CommitStatusState, COMMIT_STATUS_SHA_FIELD,
};
use promoter_model::labels::{
    LABEL_COMMIT_STATUS, LABEL_COMMIT_STATUS_COPY, LABEL_COMMIT_STATUS_COPY_FROM,
    LABEL_COMMIT_STATUS_COPY_FROM_BRANCH, LABEL_COMMIT_STATUS_COPY_FROM_SHA, LABEL_ENVIRONMENT,
    LABEL_PROMOTION_STRATEGY, LABEL_PROPOSED_COMMIT,
};
use promoter_model::meta::{ObjectKey, ObjectMeta, Resource};
use promoter_model::names::{kube_safe_label, proposed_commit_name};
use promoter_model::promotion_strategy::{
    upsert_environment_status, BranchStateStatus, CommitStatusSelector, Environment,
    EnvironmentStatus, PromotionStrategy, RollupState, RollupStatus,
};
use promoter_model::proposed_commit::{ProposedCommit, ProposedCommitSpec};
use promoter_model::pull_request::PullRequestState;
use promoter_store::{retry_on_conflict, ListParams, ObjectStore, Stores};

use crate::error::{ControllerError, ControllerResult};
use crate::runtime::{Action, Reconciler};

const MAX_HEALTHY_DRY_SHAS: usize = 10;

#[derive(Debug, Clone)]
pub struct PromotionStrategyReconcilerConfig {
    pub requeue_duration: Duration,
}

impl Default for PromotionStrategyReconcilerConfig {
    fn default() -> Self {
        Self {
            requeue_duration: Duration::from_secs(60),
        }
    }
}

pub struct PromotionStrategyReconciler {
    stores: Stores,
    config: PromotionStrategyReconcilerConfig,
}

/// Commit statuses gathered for one effective key list.
struct KeyedStatuses {
    /// Keys that matched exactly one record contribute here.
    collected: Vec<CommitStatus>,
    /// Sentinel from keys with zero or multiple matches; the last one wins.
    sentinel: Option<RollupState>,
}

/// Fold gathered statuses into a rollup.
///
/// With nothing collected and no sentinel the rollup is `success` anchored
/// at `default_sha`. With collected entries the state starts at `success`
/// and the first non-success entry in `override_list` overrides it with its
/// spec state and sha.
fn apply_rollup(
    rollup: &mut RollupStatus,
    keyed: &KeyedStatuses,
    override_list: &[CommitStatus],
    default_sha: &str,
) {
    if let Some(state) = keyed.sentinel {
        rollup.state = state;
        rollup.sha = state.to_string();
    }
    if keyed.collected.is_empty() {
        if rollup.state == RollupState::Unknown {
            rollup.state = RollupState::Success;
            rollup.sha = default_sha.to_string();
        }
        return;
    }
    rollup.state = RollupState::Success;
    for cs in override_list {
        if cs.status.state != Some(CommitStatusState::Success) {
            rollup.state = cs.spec.state.into();
            rollup.sha = cs.spec.sha.clone();
            break;
        }
    }
}

/// Environment-level keys extend the strategy-global ones; duplicates are
/// preserved.
fn effective_selectors(
    env_selectors: &[CommitStatusSelector],
    strategy_selectors: &[CommitStatusSelector],
) -> Vec<CommitStatusSelector> {
    env_selectors
        .iter()
        .cloned()
        .chain(strategy_selectors.iter().cloned())
        .collect()
}

impl PromotionStrategyReconciler {
    pub fn new(stores: Stores, config: PromotionStrategyReconcilerConfig) -> Self {
        Self { stores, config }
    }

    /// Fetch or create the environment's ProposedCommit, then block until
    /// its four SHAs are resolved. The wait re-fetches with randomized
    /// backoff to absorb cache lag and honors cancellation.
    async fn create_or_get_proposed_commit(
        &self,
        ps: &PromotionStrategy,
        environment: &Environment,
        cancel: &CancellationToken,
    ) -> ControllerResult<ProposedCommit> {
        let namespace = &ps.metadata.namespace;
        let name = proposed_commit_name(&ps.metadata.name, &environment.branch);

        match self.stores.proposed_commits.get(namespace, &name).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                info!(namespace = %namespace, name = %name, "ProposedCommit not found, creating");
                let mut labels = BTreeMap::new();
                labels.insert(
                    LABEL_PROMOTION_STRATEGY.to_string(),
                    kube_safe_label(&ps.metadata.name),
                );
                labels.insert(LABEL_PROPOSED_COMMIT.to_string(), kube_safe_label(&name));
                labels.insert(
                    LABEL_ENVIRONMENT.to_string(),
                    kube_safe_label(&environment.branch),
                );
                let pc = ProposedCommit {
                    metadata: ObjectMeta {
                        labels,
                        owner_references: vec![ps.owner_reference(true)],
                        ..ObjectMeta::new(namespace.clone(), name.clone())
                    },
                    spec: ProposedCommitSpec {
                        repository: ps.spec.repository.clone(),
                        active_branch: environment.branch.clone(),
                        proposed_branch: format!("{}-next", environment.branch),
                    },
                    status: Default::default(),
                };
                self.stores.proposed_commits.create(pc).await?;
            }
            Err(err) => return Err(err.into()),
        }

        loop {
            match self.stores.proposed_commits.get(namespace, &name).await {
                Ok(pc) if pc.status.fully_resolved() => return Ok(pc),
                Ok(_) => {}
                // Might not be observable yet right after the create.
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
            let sleep_ms = rand::thread_rng().gen_range(0..1000);
            debug!(
                namespace = %namespace,
                name = %name,
                sleep_ms,
                "ProposedCommit status not updated yet, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ControllerError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
            }
        }
    }

    /// List the non-copy commit statuses for each key at `sha` and classify
    /// them by match cardinality.
    async fn collect_statuses(
        &self,
        namespace: &str,
        selectors: &[CommitStatusSelector],
        sha: &str,
    ) -> ControllerResult<KeyedStatuses> {
        let mut collected = Vec::new();
        let mut sentinel = None;
        for selector in selectors {
            let params = ListParams::default()
                .with_label(LABEL_COMMIT_STATUS, kube_safe_label(&selector.key))
                .with_field(COMMIT_STATUS_SHA_FIELD, sha);
            let items = self.stores.commit_statuses.list(namespace, &params).await?;
            let mut matches: Vec<CommitStatus> =
                items.into_iter().filter(|cs| !cs.is_copy()).collect();
            match matches.len() {
                0 => sentinel = Some(RollupState::NoCommitStatusFound),
                1 => collected.push(matches.remove(0)),
                _ => sentinel = Some(RollupState::TooManyMatchingSha),
            }
        }
        Ok(KeyedStatuses {
            collected,
            sentinel,
        })
    }

    /// Upsert per-environment status entries and bubble up the active and
    /// proposed commit statuses.
    async fn calculate_status(
        &self,
        ps: &mut PromotionStrategy,
        pcs: &HashMap<String, ProposedCommit>,
    ) -> ControllerResult<()> {
        let environments = ps.spec.environments.clone();
        for environment in &environments {
            let pc = pcs.get(&environment.branch).ok_or_else(|| {
                ControllerError::Misconfigured(format!(
                    "ProposedCommit not found for branch {}",
                    environment.branch
                ))
            })?;

            let entry = EnvironmentStatus {
                branch: environment.branch.clone(),
                active: BranchStateStatus {
                    dry: pc.status.active.dry.clone(),
                    hydrated: pc.status.active.hydrated.clone(),
                    commit_status: RollupStatus::unknown(),
                },
                proposed: BranchStateStatus {
                    dry: pc.status.proposed.dry.clone(),
                    hydrated: pc.status.proposed.hydrated.clone(),
                    commit_status: RollupStatus::unknown(),
                },
                last_healthy_dry_shas: Vec::new(),
            };
            ps.status.environments =
                upsert_environment_status(std::mem::take(&mut ps.status.environments), entry);
            let Some(index) = ps
                .status
                .environments
                .iter()
                .position(|e| e.branch == environment.branch)
            else {
                continue;
            };

            if ps.status.environments[index].last_healthy_dry_shas.len() > MAX_HEALTHY_DRY_SHAS {
                ps.status.environments[index]
                    .last_healthy_dry_shas
                    .truncate(MAX_HEALTHY_DRY_SHAS);
            }

            let active_selectors = effective_selectors(
                &environment.active_commit_statuses,
                &ps.spec.active_commit_statuses,
            );
            let keyed_active = self
                .collect_statuses(
                    &ps.metadata.namespace,
                    &active_selectors,
                    &pc.status.active.hydrated.sha,
                )
                .await?;
            apply_rollup(
                &mut ps.status.environments[index].active.commit_status,
                &keyed_active,
                &keyed_active.collected,
                &pc.status.active.hydrated.sha,
            );

            let proposed_selectors = effective_selectors(
                &environment.proposed_commit_statuses,
                &ps.spec.proposed_commit_statuses,
            );
            let keyed_proposed = self
                .collect_statuses(
                    &ps.metadata.namespace,
                    &proposed_selectors,
                    &pc.status.proposed.hydrated.sha,
                )
                .await?;
            // Proposed rollups anchor at the active hydrated sha and take
            // their overrides from the active check list.
            apply_rollup(
                &mut ps.status.environments[index].proposed.commit_status,
                &keyed_proposed,
                &keyed_active.collected,
                &pc.status.active.hydrated.sha,
            );
        }
        Ok(())
    }

    /// Mirror the previous environment's active statuses onto the next
    /// environment's proposed sha so its PR shows prior-stage gate results.
    async fn copy_commit_statuses(
        &self,
        namespace: &str,
        selectors: &[CommitStatusSelector],
        copy_from_sha: &str,
        copy_to_sha: &str,
        branch: &str,
    ) -> ControllerResult<()> {
        for selector in selectors {
            let params = ListParams::default()
                .with_label(LABEL_COMMIT_STATUS, kube_safe_label(&selector.key))
                .with_field(COMMIT_STATUS_SHA_FIELD, copy_from_sha);
            let items = self.stores.commit_statuses.list(namespace, &params).await?;

            for cs in items.into_iter().filter(|cs| !cs.is_copy()) {
                let copy_name = format!("proposed-{}", cs.metadata.name);
                match self.stores.commit_statuses.get(namespace, &copy_name).await {
                    Err(err) if err.is_not_found() => {
                        let mut labels = cs.metadata.labels.clone();
                        insert_copy_labels(&mut labels, &cs.spec.name, copy_from_sha, branch);
                        let copy = CommitStatus {
                            metadata: ObjectMeta {
                                labels,
                                annotations: cs.metadata.annotations.clone(),
                                ..ObjectMeta::new(namespace.to_string(), copy_name)
                            },
                            spec: CommitStatusSpec {
                                repository: cs.spec.repository.clone(),
                                sha: copy_to_sha.to_string(),
                                name: format!("{} - {}", branch, cs.spec.name),
                                description: cs.spec.description.clone(),
                                state: cs.spec.state,
                                url: commit_url(&cs.spec, copy_from_sha),
                            },
                            status: Default::default(),
                        };
                        self.stores.commit_statuses.create(copy).await?;
                        // One missing copy handled per pass.
                        return Ok(());
                    }
                    Ok(mut existing) => {
                        existing.spec = cs.spec.clone();
                        insert_copy_labels(
                            &mut existing.metadata.labels,
                            &cs.spec.name,
                            copy_from_sha,
                            branch,
                        );
                        existing.spec.sha = copy_to_sha.to_string();
                        existing.spec.name = format!("{} - {}", branch, cs.spec.name);
                        existing.spec.url = commit_url(&cs.spec, copy_from_sha);
                        self.stores.commit_statuses.update(existing).await?;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }

    /// Flip the environment's PR to merged when it is open on both sides.
    async fn merge_environment_pull_request(
        &self,
        ps: &PromotionStrategy,
        environment: &Environment,
        pc: &ProposedCommit,
        previous: Option<&EnvironmentStatus>,
        current: &EnvironmentStatus,
    ) -> ControllerResult<()> {
        let params = ListParams::default()
            .with_label(
                LABEL_PROMOTION_STRATEGY,
                kube_safe_label(&ps.metadata.name),
            )
            .with_label(LABEL_PROPOSED_COMMIT, kube_safe_label(&pc.metadata.name))
            .with_label(LABEL_ENVIRONMENT, kube_safe_label(&environment.branch));
        let pull_requests = self
            .stores
            .pull_requests
            .list(&ps.metadata.namespace, &params)
            .await?;
        let Some(first) = pull_requests.first() else {
            return Ok(());
        };

        if first.status.state == Some(PullRequestState::Open) {
            match previous {
                Some(prev) => info!(
                    branch = %environment.branch,
                    auto_merge = environment.auto_merge_enabled(),
                    previous_environment_state = %prev.active.commit_status.state,
                    previous_environment_sha = %prev.active.commit_status.sha,
                    previous_environment_commit_time = %prev.active.dry.commit_time,
                    current_environment_commit_time = %current.active.dry.commit_time,
                    "active checks passed"
                ),
                None => info!(
                    branch = %environment.branch,
                    auto_merge = environment.auto_merge_enabled(),
                    "active checks passed without previous environment"
                ),
            }
        }

        if first.spec.state == PullRequestState::Open
            && first.status.state == Some(PullRequestState::Open)
        {
            let prs = self.stores.pull_requests.clone();
            let key = first.metadata.key();
            retry_on_conflict(|| {
                let prs = prs.clone();
                let key = key.clone();
                async move {
                    let mut current = prs.get(&key.namespace, &key.name).await?;
                    current.spec.state = PullRequestState::Merged;
                    prs.update(current).await?;
                    Ok(())
                }
            })
            .await?;
        } else if first.status.state == Some(PullRequestState::Open) {
            info!(
                namespace = %first.metadata.namespace,
                name = %first.metadata.name,
                "pull request not ready to merge yet"
            );
        }
        Ok(())
    }
}

fn insert_copy_labels(
    labels: &mut BTreeMap<String, String>,
    from_name: &str,
    from_sha: &str,
    from_branch: &str,
) {
    labels.insert(LABEL_COMMIT_STATUS_COPY.to_string(), "true".to_string());
    labels.insert(
        LABEL_COMMIT_STATUS_COPY_FROM.to_string(),
        kube_safe_label(from_name),
    );
    labels.insert(
        LABEL_COMMIT_STATUS_COPY_FROM_SHA.to_string(),
        kube_safe_label(from_sha),
    );
    labels.insert(
        LABEL_COMMIT_STATUS_COPY_FROM_BRANCH.to_string(),
        kube_safe_label(from_branch),
    );
}

fn commit_url(spec: &CommitStatusSpec, sha: &str) -> String {
    format!(
        "https://github.com/{}/{}/commit/{}",
        spec.repository.owner, spec.repository.name, sha
    )
}

#[async_trait]
impl Reconciler for PromotionStrategyReconciler {
    fn kind(&self) -> &'static str {
        PromotionStrategy::KIND
    }

    async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> ControllerResult<Action> {
        debug!(namespace = %key.namespace, name = %key.name, "reconciling PromotionStrategy");
        let mut ps = match self
            .stores
            .promotion_strategies
            .get(&key.namespace, &key.name)
            .await
        {
            Ok(ps) => ps,
            Err(err) if err.is_not_found() => {
                info!(namespace = %key.namespace, name = %key.name, "PromotionStrategy not found");
                return Ok(Action::Done);
            }
            Err(err) => return Err(err.into()),
        };

        if ps.metadata.is_deleting() {
            return Ok(Action::Done);
        }

        let mut pcs: HashMap<String, ProposedCommit> = HashMap::new();
        for environment in &ps.spec.environments {
            let pc = self
                .create_or_get_proposed_commit(&ps, environment, cancel)
                .await?;
            pcs.insert(environment.branch.clone(), pc);
        }

        self.calculate_status(&mut ps, &pcs).await?;

        let environments = ps.spec.environments.clone();
        for environment in &environments {
            let Some(pc) = pcs.get(&environment.branch) else {
                continue;
            };
            let previous = ps
                .previous_environment_status_by_branch(&environment.branch)
                .cloned();
            let Some((environment_index, environment_status)) = ps
                .environment_status_by_branch(&environment.branch)
                .map(|(i, status)| (i, status.clone()))
            else {
                continue;
            };

            if let Some(prev) = &previous {
                // The proposed change matches what the previous stage runs:
                // surface its gate results on this stage's proposed sha.
                if prev.active.dry.sha == pc.status.proposed.dry.sha {
                    let selectors = effective_selectors(
                        &environment.active_commit_statuses,
                        &ps.spec.active_commit_statuses,
                    );
                    self.copy_commit_statuses(
                        &ps.metadata.namespace,
                        &selectors,
                        &prev.active.hydrated.sha,
                        &pc.status.proposed.hydrated.sha,
                        &prev.branch,
                    )
                    .await?;
                }
            }

            let active_checks_passed = previous.as_ref().is_some_and(|prev| {
                prev.active.commit_status.state == RollupState::Success
                    && prev.active.dry.sha == pc.status.proposed.dry.sha
                    && prev.active.dry.commit_time > environment_status.active.dry.commit_time
            });
            let proposed_checks_passed =
                environment_status.proposed.commit_status.state == RollupState::Success;

            if (environment_index == 0 || (active_checks_passed && proposed_checks_passed))
                && environment.auto_merge_enabled()
            {
                self.merge_environment_pull_request(
                    &ps,
                    environment,
                    pc,
                    previous.as_ref(),
                    &environment_status,
                )
                .await?;
            }
        }

        self.stores.promotion_strategies.update_status(ps).await?;

        Ok(Action::RequeueAfter(self.config.requeue_duration))
    }
}

#[cfg(test)]
mod tests {
    use promoter_model::scm_provider::RepositoryReference;

    use super::*;

    fn status(name: &str, state: CommitStatusState, sha: &str) -> CommitStatus {
        CommitStatus {
            metadata: ObjectMeta::new("default", name),
            spec: CommitStatusSpec {
                repository: RepositoryReference::default(),
                sha: sha.to_string(),
                name: name.to_string(),
                description: String::new(),
                state,
                url: String::new(),
            },
            status: Default::default(),
        }
    }

    #[test]
    fn rollup_defaults_to_success_with_no_checks() {
        let mut rollup = RollupStatus::unknown();
        let keyed = KeyedStatuses {
            collected: Vec::new(),
            sentinel: None,
        };
        apply_rollup(&mut rollup, &keyed, &[], "hydrated-sha");
        assert_eq!(rollup.state, RollupState::Success);
        assert_eq!(rollup.sha, "hydrated-sha");
    }

    #[test]
    fn rollup_keeps_sentinel_when_nothing_collected() {
        let mut rollup = RollupStatus::unknown();
        let keyed = KeyedStatuses {
            collected: Vec::new(),
            sentinel: Some(RollupState::NoCommitStatusFound),
        };
        apply_rollup(&mut rollup, &keyed, &[], "hydrated-sha");
        assert_eq!(rollup.state, RollupState::NoCommitStatusFound);
        assert_eq!(rollup.sha, "no-commit-status-found");
    }

    #[test]
    fn rollup_too_many_matches_wins() {
        let mut rollup = RollupStatus::unknown();
        let keyed = KeyedStatuses {
            collected: Vec::new(),
            sentinel: Some(RollupState::TooManyMatchingSha),
        };
        apply_rollup(&mut rollup, &keyed, &[], "hydrated-sha");
        assert_eq!(rollup.state, RollupState::TooManyMatchingSha);
        assert_eq!(rollup.sha, "to-many-matching-sha");
    }

    #[test]
    fn rollup_first_non_success_overrides() {
        let mut rollup = RollupStatus::unknown();
        let collected = vec![
            status("a", CommitStatusState::Pending, "sha-a"),
            status("b", CommitStatusState::Failure, "sha-b"),
        ];
        let keyed = KeyedStatuses {
            collected: collected.clone(),
            sentinel: None,
        };
        apply_rollup(&mut rollup, &keyed, &collected, "hydrated-sha");
        assert_eq!(rollup.state, RollupState::Pending);
        assert_eq!(rollup.sha, "sha-a");
    }

    #[test]
    fn rollup_collected_entries_clear_sentinel() {
        let mut rollup = RollupStatus::unknown();
        let collected = vec![status("a", CommitStatusState::Success, "sha-a")];
        let keyed = KeyedStatuses {
            collected: collected.clone(),
            sentinel: Some(RollupState::NoCommitStatusFound),
        };
        apply_rollup(&mut rollup, &keyed, &collected, "hydrated-sha");
        // Unpublished records override with their spec state, which here is
        // success anyway.
        assert_eq!(rollup.state, RollupState::Success);
        assert_eq!(rollup.sha, "sha-a");
    }

    #[test]
    fn effective_selectors_preserve_order_and_duplicates() {
        let env = vec![CommitStatusSelector::new("health")];
        let strategy = vec![
            CommitStatusSelector::new("health"),
            CommitStatusSelector::new("smoke"),
        ];
        let combined = effective_selectors(&env, &strategy);
        let keys: Vec<_> = combined.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["health", "health", "smoke"]);
    }
}
