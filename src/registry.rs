//! Per-client runtime state keyed by client name.
//!
//! Breakers, token buckets, and bulkheads are created lazily on a client's first call and live
//! until the client is re-registered or the runtime is reinitialized or closed.
//!
//! Every entry remembers the configuration epoch it was built under. An execution that loaded
//! an older snapshot may reuse newer state but never replaces it, and the first execution of a
//! newer epoch replaces state built under an older one.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Lazily populated map from client name to shared state.
#[derive(Debug)]
pub struct StateRegistry<T> {
    inner: RwLock<HashMap<String, Slot<T>>>,
}

#[derive(Debug)]
struct Slot<T> {
    epoch: u64,
    state: Arc<T>,
}

impl<T> Default for StateRegistry<T> {
    fn default() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }
}

impl<T> StateRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.inner.read().get(name).map(|slot| Arc::clone(&slot.state))
    }

    /// State for `name` built under `epoch` or later, or the one built by `init`.
    ///
    /// `init` runs at most once per name and epoch.
    pub fn get_or_insert_with(&self, name: &str, epoch: u64, init: impl FnOnce() -> T) -> Arc<T> {
        if let Some(slot) = self.inner.read().get(name) {
            if slot.epoch >= epoch {
                return Arc::clone(&slot.state);
            }
        }
        let mut map = self.inner.write();
        if let Some(slot) = map.get(name) {
            if slot.epoch >= epoch {
                return Arc::clone(&slot.state);
            }
        }
        let state = Arc::new(init());
        map.insert(name.to_string(), Slot { epoch, state: Arc::clone(&state) });
        state
    }

    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.inner.write().remove(name).map(|slot| slot.state)
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Arc<T>)> {
        let map = self.inner.read();
        let mut entries: Vec<(String, Arc<T>)> =
            map.iter().map(|(k, slot)| (k.clone(), Arc::clone(&slot.state))).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_builds_once_per_name() {
        let registry: StateRegistry<usize> = StateRegistry::new();
        let built = AtomicUsize::new(0);
        let a = registry.get_or_insert_with("a", 0, || built.fetch_add(1, Ordering::SeqCst));
        let again = registry.get_or_insert_with("a", 0, || built.fetch_add(1, Ordering::SeqCst));
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        registry.get_or_insert_with("b", 0, || 9);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_sorted_and_remove() {
        let registry = StateRegistry::new();
        registry.get_or_insert_with("zeta", 0, || 1);
        registry.get_or_insert_with("alpha", 0, || 2);
        let names: Vec<_> = registry.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        assert!(registry.remove("alpha").is_some());
        assert!(registry.get("alpha").is_none());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_newer_epoch_replaces_older_state() {
        let registry = StateRegistry::new();
        let old = registry.get_or_insert_with("svc", 1, || "old");
        let new = registry.get_or_insert_with("svc", 2, || "new");
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(*registry.get("svc").unwrap(), "new");
    }

    #[test]
    fn test_older_epoch_never_replaces_newer_state() {
        let registry = StateRegistry::new();
        registry.get_or_insert_with("svc", 3, || "current");
        let seen = registry.get_or_insert_with("svc", 2, || "stale");
        assert_eq!(*seen, "current");

        // A stale caller that finds nothing fills the gap, and the next current caller heals it.
        registry.remove("svc");
        assert_eq!(*registry.get_or_insert_with("svc", 2, || "stale"), "stale");
        assert_eq!(*registry.get_or_insert_with("svc", 3, || "current"), "current");
    }

    #[test]
    fn test_concurrent_first_use_shares_state() {
        let registry = Arc::new(StateRegistry::<AtomicUsize>::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.get_or_insert_with("svc", 0, || AtomicUsize::new(0)).fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get("svc").unwrap().load(Ordering::SeqCst), 8);
    }
}
