//! Work queue with per-instance serialization.
//!
//! The same key is never handed to two workers at once: a key added while
//! it is being processed is marked dirty and re-queued when the worker calls
//! [`WorkQueue::done`]. Duplicate adds of a queued key collapse into one.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use promoter_model::meta::ObjectKey;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `key`. No-op if the key is already queued; if the key is
    /// being processed it is re-queued after the current run finishes.
    pub fn add(&self, key: ObjectKey) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.dirty.insert(key.clone()) {
                return;
            }
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Next key to process, or `None` once `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<ObjectKey> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Mark `key` finished. If it went dirty while processing, re-queue it.
    pub fn done(&self, key: &ObjectKey) {
        let requeued = {
            let mut state = self.state.lock().unwrap();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        queue.add(key("a"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn key_added_while_processing_requeues_on_done() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();

        queue.add(key("a"));
        let got = queue.next(&cancel).await.unwrap();
        assert_eq!(got, key("a"));

        // Re-added mid-processing: not handed out again yet.
        queue.add(key("a"));
        assert!(queue.is_empty());

        queue.done(&got);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next(&cancel).await.unwrap(), key("a"));
    }

    #[tokio::test]
    async fn distinct_keys_hand_out_concurrently() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();

        queue.add(key("a"));
        queue.add(key("b"));
        let first = queue.next(&cancel).await.unwrap();
        let second = queue.next(&cancel).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn next_returns_none_on_cancel() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.next(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_wakes_a_waiting_worker() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.next(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add(key("late"));
        assert_eq!(waiter.await.unwrap(), Some(key("late")));
    }
}
