//! Declarative store for the promotion controller.
//!
//! Captures the contract the reconcilers rely on — typed get/list/create/
//! update with compare-and-swap, a status subresource, label and indexed
//! field selection, finalizer-aware cascading deletion, and mutation events
//! — plus the in-memory implementation used by tests and the single-process
//! daemon.

mod error;
mod memory;
mod retry;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use retry::{retry_on_conflict, DEFAULT_CONFLICT_RETRIES};
pub use store::{ListParams, ObjectStore, StoreEvent, StoreOp, Stores};
