//! Process-wide registry of temporary git clone directories.
//!
//! The daemon drains this on shutdown and removes every path so interrupted
//! reconciliations do not leak workdirs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct PathLookup {
    inner: Arc<Mutex<HashMap<String, PathBuf>>>,
}

impl PathLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<PathBuf> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, path: PathBuf) {
        self.inner.lock().unwrap().insert(key.into(), path);
    }

    pub fn all(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    /// Remove and return every tracked path.
    pub fn drain(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().drain().map(|(_, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_drain() {
        let lookup = PathLookup::new();
        lookup.set("repo-a", PathBuf::from("/tmp/clone-a"));
        lookup.set("repo-b", PathBuf::from("/tmp/clone-b"));

        assert_eq!(lookup.get("repo-a"), Some(PathBuf::from("/tmp/clone-a")));
        assert_eq!(lookup.all().len(), 2);

        let drained = lookup.drain();
        assert_eq!(drained.len(), 2);
        assert!(lookup.all().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let lookup = PathLookup::new();
        let other = lookup.clone();
        other.set("repo", PathBuf::from("/tmp/clone"));
        assert!(lookup.get("repo").is_some());
    }
}
