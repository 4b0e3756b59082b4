//! In-memory store backing tests and the single-process daemon.
//!
//! Holds one typed collection per resource kind behind a single mutex, so
//! every operation observes a consistent snapshot. Mutations are announced
//! on a broadcast channel after the lock is released.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use promoter_model::commit_status::CommitStatus;
use promoter_model::meta::{ObjectKey, Resource};
use promoter_model::promotion_strategy::PromotionStrategy;
use promoter_model::proposed_commit::ProposedCommit;
use promoter_model::pull_request::PullRequest;
use promoter_model::scm_provider::{GitRepository, ScmProvider, Secret};

use crate::error::{StoreError, StoreResult};
use crate::store::{ListParams, ObjectStore, StoreEvent, StoreOp};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct Collection<T> {
    items: BTreeMap<ObjectKey, T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    promotion_strategies: Collection<PromotionStrategy>,
    proposed_commits: Collection<ProposedCommit>,
    pull_requests: Collection<PullRequest>,
    commit_statuses: Collection<CommitStatus>,
    scm_providers: Collection<ScmProvider>,
    git_repositories: Collection<GitRepository>,
    secrets: Collection<Secret>,
}

/// Maps a resource kind to its collection in [`ClusterState`].
trait StoredKind: Resource {
    fn collection(state: &mut ClusterState) -> &mut Collection<Self>;
    fn collection_ref(state: &ClusterState) -> &Collection<Self>;
}

macro_rules! stored_kind {
    ($ty:ty, $field:ident) => {
        impl StoredKind for $ty {
            fn collection(state: &mut ClusterState) -> &mut Collection<Self> {
                &mut state.$field
            }

            fn collection_ref(state: &ClusterState) -> &Collection<Self> {
                &state.$field
            }
        }
    };
}

stored_kind!(PromotionStrategy, promotion_strategies);
stored_kind!(ProposedCommit, proposed_commits);
stored_kind!(PullRequest, pull_requests);
stored_kind!(CommitStatus, commit_statuses);
stored_kind!(ScmProvider, scm_providers);
stored_kind!(GitRepository, git_repositories);
stored_kind!(Secret, secrets);

/// In-memory implementation of [`ObjectStore`] for every kind.
pub struct MemoryStore {
    state: Mutex<ClusterState>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(ClusterState::default()),
            events,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to mutation events. Slow subscribers may observe lag; the
    /// periodic resync covers any dropped notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, events: Vec<StoreEvent>) {
        for event in events {
            // Send only fails when nobody is subscribed.
            let _ = self.events.send(event);
        }
    }
}

fn not_found<T: Resource>(namespace: &str, name: &str) -> StoreError {
    StoreError::NotFound {
        kind: T::KIND,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Remove everything owned (transitively) by the given UIDs. Dependents
/// holding finalizers are marked for deletion instead of being removed.
fn cascade_from(state: &mut ClusterState, namespace: &str, uid: Uuid, events: &mut Vec<StoreEvent>) {
    let mut pending = vec![uid];
    while let Some(owner_uid) = pending.pop() {
        delete_owned::<PromotionStrategy>(state, namespace, owner_uid, &mut pending, events);
        delete_owned::<ProposedCommit>(state, namespace, owner_uid, &mut pending, events);
        delete_owned::<PullRequest>(state, namespace, owner_uid, &mut pending, events);
        delete_owned::<CommitStatus>(state, namespace, owner_uid, &mut pending, events);
        delete_owned::<ScmProvider>(state, namespace, owner_uid, &mut pending, events);
        delete_owned::<GitRepository>(state, namespace, owner_uid, &mut pending, events);
        delete_owned::<Secret>(state, namespace, owner_uid, &mut pending, events);
    }
}

fn delete_owned<T: StoredKind>(
    state: &mut ClusterState,
    namespace: &str,
    owner_uid: Uuid,
    pending: &mut Vec<Uuid>,
    events: &mut Vec<StoreEvent>,
) {
    let keys: Vec<ObjectKey> = T::collection_ref(state)
        .items
        .values()
        .filter(|obj| {
            obj.metadata().namespace == namespace
                && obj
                    .metadata()
                    .owner_references
                    .iter()
                    .any(|r| r.uid == owner_uid)
        })
        .map(|obj| obj.metadata().key())
        .collect();

    for key in keys {
        let col = T::collection(state);
        let Some(obj) = col.items.get_mut(&key) else {
            continue;
        };
        if obj.metadata().finalizers.is_empty() {
            if let Some(removed) = col.items.remove(&key) {
                events.push(StoreEvent {
                    kind: T::KIND,
                    key,
                    op: StoreOp::Deleted,
                });
                pending.push(removed.metadata().uid);
            }
        } else if obj.metadata().deletion_timestamp.is_none() {
            let meta = obj.metadata_mut();
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version += 1;
            events.push(StoreEvent {
                kind: T::KIND,
                key,
                op: StoreOp::SpecUpdated,
            });
        }
    }
}

#[async_trait]
impl<T: StoredKind> ObjectStore<T> for MemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<T> {
        let state = self.state.lock().unwrap();
        T::collection_ref(&state)
            .items
            .get(&ObjectKey::new(namespace, name))
            .cloned()
            .ok_or_else(|| not_found::<T>(namespace, name))
    }

    async fn list(&self, namespace: &str, params: &ListParams) -> StoreResult<Vec<T>> {
        let state = self.state.lock().unwrap();
        Ok(T::collection_ref(&state)
            .items
            .values()
            .filter(|obj| obj.metadata().namespace == namespace && params.matches(*obj))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<T>> {
        let state = self.state.lock().unwrap();
        Ok(T::collection_ref(&state).items.values().cloned().collect())
    }

    async fn create(&self, mut obj: T) -> StoreResult<T> {
        let key = obj.metadata().key();
        let mut events = Vec::new();
        let created = {
            let mut state = self.state.lock().unwrap();
            let col = T::collection(&mut state);
            if col.items.contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    kind: T::KIND,
                    namespace: key.namespace,
                    name: key.name,
                });
            }
            let meta = obj.metadata_mut();
            meta.uid = Uuid::new_v4();
            meta.resource_version = 1;
            meta.generation = 1;
            meta.creation_timestamp = Some(Utc::now());
            meta.deletion_timestamp = None;
            col.items.insert(key.clone(), obj.clone());
            events.push(StoreEvent {
                kind: T::KIND,
                key,
                op: StoreOp::Created,
            });
            obj
        };
        self.emit(events);
        Ok(created)
    }

    async fn update(&self, mut obj: T) -> StoreResult<T> {
        let key = obj.metadata().key();
        let mut events = Vec::new();
        let updated = {
            let mut state = self.state.lock().unwrap();
            let current_version;
            let deleting;
            {
                let col = T::collection(&mut state);
                let current = col
                    .items
                    .get(&key)
                    .ok_or_else(|| not_found::<T>(&key.namespace, &key.name))?;
                current_version = current.metadata().resource_version;
                deleting = current.metadata().deletion_timestamp.is_some();
            }
            if current_version != obj.metadata().resource_version {
                return Err(StoreError::Conflict {
                    kind: T::KIND,
                    namespace: key.namespace,
                    name: key.name,
                    given: obj.metadata().resource_version,
                    current: current_version,
                });
            }

            // A finalizer removal on a terminating object completes the delete.
            if deleting && obj.metadata().finalizers.is_empty() {
                let uid = obj.metadata().uid;
                T::collection(&mut state).items.remove(&key);
                events.push(StoreEvent {
                    kind: T::KIND,
                    key: key.clone(),
                    op: StoreOp::Deleted,
                });
                cascade_from(&mut state, &key.namespace, uid, &mut events);
                obj
            } else {
                let meta = obj.metadata_mut();
                meta.resource_version += 1;
                meta.generation += 1;
                T::collection(&mut state).items.insert(key.clone(), obj.clone());
                events.push(StoreEvent {
                    kind: T::KIND,
                    key,
                    op: StoreOp::SpecUpdated,
                });
                obj
            }
        };
        self.emit(events);
        Ok(updated)
    }

    async fn update_status(&self, mut obj: T) -> StoreResult<T> {
        let key = obj.metadata().key();
        let mut events = Vec::new();
        let updated = {
            let mut state = self.state.lock().unwrap();
            let col = T::collection(&mut state);
            let current = col
                .items
                .get(&key)
                .ok_or_else(|| not_found::<T>(&key.namespace, &key.name))?;
            let current_version = current.metadata().resource_version;
            if current_version != obj.metadata().resource_version {
                return Err(StoreError::Conflict {
                    kind: T::KIND,
                    namespace: key.namespace,
                    name: key.name,
                    given: obj.metadata().resource_version,
                    current: current_version,
                });
            }
            // Status subresource: the generation is left untouched.
            obj.metadata_mut().resource_version += 1;
            col.items.insert(key.clone(), obj.clone());
            events.push(StoreEvent {
                kind: T::KIND,
                key,
                op: StoreOp::StatusUpdated,
            });
            obj
        };
        self.emit(events);
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let key = ObjectKey::new(namespace, name);
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let removed_uid = {
                let col = T::collection(&mut state);
                let Some(obj) = col.items.get_mut(&key) else {
                    return Err(not_found::<T>(namespace, name));
                };
                if obj.metadata().finalizers.is_empty() {
                    let uid = obj.metadata().uid;
                    col.items.remove(&key);
                    events.push(StoreEvent {
                        kind: T::KIND,
                        key: key.clone(),
                        op: StoreOp::Deleted,
                    });
                    Some(uid)
                } else {
                    // Finalizers pending: mark for deletion and wait for the
                    // finalizer owner to clear them.
                    if obj.metadata().deletion_timestamp.is_none() {
                        let meta = obj.metadata_mut();
                        meta.deletion_timestamp = Some(Utc::now());
                        meta.resource_version += 1;
                        events.push(StoreEvent {
                            kind: T::KIND,
                            key: key.clone(),
                            op: StoreOp::SpecUpdated,
                        });
                    }
                    None
                }
            };
            if let Some(uid) = removed_uid {
                cascade_from(&mut state, namespace, uid, &mut events);
            }
        }
        self.emit(events);
        Ok(())
    }
}
