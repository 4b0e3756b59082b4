//! Error taxonomy for reconciliation.
//!
//! Errors returned from a reconciler surface to the runtime, which logs and
//! requeues; sentinel status values are not errors and never appear here.

use thiserror::Error;

use promoter_scm::ScmError;
use promoter_store::StoreError;

use crate::git::GitError;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Transient store failure; the runtime retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Provider failure; propagated for retry, no circuit breaker here.
    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Git(#[from] GitError),

    /// The user must fix the spec.
    #[error("misconfiguration: {0}")]
    Misconfigured(String),

    /// The invocation context was cancelled (shutdown or timeout).
    #[error("reconciliation cancelled")]
    Cancelled,
}

/// Result type for reconciler operations.
pub type ControllerResult<T> = std::result::Result<T, ControllerError>;
