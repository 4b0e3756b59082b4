//! Error types for the declarative store.

use thiserror::Error;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed object does not exist. On a watched root object this
    /// means deletion; on a dependent lookup it means "not yet observed".
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Compare-and-swap failure: another writer got there first. Recover
    /// with [`crate::retry_on_conflict`].
    #[error("conflict writing {kind} {namespace}/{name}: resource version {given} is stale (current {current})")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
        given: u64,
        current: u64,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
