//! Bounded retry for compare-and-swap conflicts.

use std::future::Future;
use std::time::Duration;

use crate::error::StoreResult;

/// How many times a conflicted write is retried before giving up.
pub const DEFAULT_CONFLICT_RETRIES: usize = 5;

const CONFLICT_RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Run `op` until it succeeds, fails with a non-conflict error, or the retry
/// budget is exhausted. `op` must re-read the object on every call so each
/// attempt writes against the latest resource version.
pub async fn retry_on_conflict<T, F, Fut>(mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_conflict() => {
                attempt += 1;
                if attempt >= DEFAULT_CONFLICT_RETRIES {
                    return Err(err);
                }
                tokio::time::sleep(CONFLICT_RETRY_PAUSE).await;
            }
            other => return other,
        }
    }
}
