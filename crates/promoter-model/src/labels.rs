//! Reserved label keys used for cross-referencing between resources.
//!
//! The orchestrator locates pull requests and commit statuses by label
//! selector rather than by pointer, so these keys are part of the contract.
//! All label values are passed through [`crate::names::kube_safe_label`].

/// API group for all resource kinds in this system.
pub const API_GROUP: &str = "promoter.argoproj.io";

/// Names the owning promotion strategy.
pub const LABEL_PROMOTION_STRATEGY: &str = "promoter.argoproj.io/promotion-strategy";

/// Names the proposed commit an object belongs to.
pub const LABEL_PROPOSED_COMMIT: &str = "promoter.argoproj.io/proposed-commit";

/// Names the environment branch an object belongs to.
pub const LABEL_ENVIRONMENT: &str = "promoter.argoproj.io/environment";

/// Carries the status-check key of a commit status record.
pub const LABEL_COMMIT_STATUS: &str = "promoter.argoproj.io/commit-status";

/// Set to `"true"` on copied commit statuses; copies are excluded from
/// gating evaluation.
pub const LABEL_COMMIT_STATUS_COPY: &str = "promoter.argoproj.io/commit-status-copy";

/// Provenance of a copy: the original status name.
pub const LABEL_COMMIT_STATUS_COPY_FROM: &str = "promoter.argoproj.io/commit-status-copy-from";

/// Provenance of a copy: the sha the original annotated.
pub const LABEL_COMMIT_STATUS_COPY_FROM_SHA: &str =
    "promoter.argoproj.io/commit-status-copy-from-sha";

/// Provenance of a copy: the branch the original came from.
pub const LABEL_COMMIT_STATUS_COPY_FROM_BRANCH: &str =
    "promoter.argoproj.io/commit-status-copy-from-branch";
