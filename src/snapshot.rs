//! Published configuration snapshots.
//!
//! Administrative operations build a new [`RuntimeConfig`] and swap it in whole. Executions
//! load one `Arc` at the start of a call and use it throughout, so they observe either the old
//! or the new configuration, never a mix.

use crate::config::{ClientConfig, GlobalConfig};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an execution needs to know about configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub global: GlobalConfig,
    pub clients: HashMap<String, Arc<ClientConfig>>,
    pub initialized: bool,
    /// Bumped by every administrative operation; never goes backwards.
    pub epoch: u64,
    /// Epoch of the last `init`, `reinit`, or `close`.
    pub reset_epoch: u64,
    /// Epoch at which each name was last registered or unregistered.
    pub client_epochs: HashMap<String, u64>,
}

impl RuntimeConfig {
    pub fn client(&self, name: &str) -> Option<&ClientConfig> {
        self.clients.get(name).map(Arc::as_ref)
    }

    /// Oldest epoch whose per-client state is still valid for `name`.
    pub fn state_epoch(&self, name: &str) -> u64 {
        self.client_epochs.get(name).copied().unwrap_or(0).max(self.reset_epoch)
    }

    /// Copy with new global settings; all per-client state becomes stale.
    pub(crate) fn with_global(&self, global: GlobalConfig) -> Self {
        let epoch = self.epoch + 1;
        Self { global, epoch, reset_epoch: epoch, initialized: true, ..self.clone() }
    }

    /// Copy with `name` bound to `client` (or removed); only that name's state becomes stale.
    pub(crate) fn with_client(&self, name: &str, client: Option<ClientConfig>) -> Self {
        let epoch = self.epoch + 1;
        let mut next = Self { epoch, ..self.clone() };
        match client {
            Some(config) => next.clients.insert(name.to_string(), Arc::new(config)),
            None => next.clients.remove(name),
        };
        next.client_epochs.insert(name.to_string(), epoch);
        next
    }

    /// Defaults with every earlier state invalidated.
    pub(crate) fn closed(&self) -> Self {
        let epoch = self.epoch + 1;
        Self { epoch, reset_epoch: epoch, ..Self::default() }
    }
}

/// `SnapshotCell<T>` gives cheap reads and whole-value replacement for shared config.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    inner: ArcSwap<T>,
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self { inner: ArcSwap::from_pointee(value) }
    }

    /// Snapshot the current value (cheap clone of Arc).
    pub fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely.
    pub fn store(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Replace the value with one derived from the current snapshot.
    ///
    /// Not atomic against concurrent writers; callers serialize writes.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.inner.load_full();
        self.inner.store(Arc::new(f(&current)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_store_update() {
        let cell = SnapshotCell::new(1);
        let before = cell.load();
        cell.store(2);
        assert_eq!(*before, 1);
        assert_eq!(*cell.load(), 2);
        cell.update(|v| v + 3);
        assert_eq!(*cell.load(), 5);
    }

    #[test]
    fn admin_copies_advance_state_epochs() {
        let base = RuntimeConfig::default().with_global(GlobalConfig::default());
        assert_eq!(base.state_epoch("svc"), 1);

        let registered = base.with_client("svc", Some(ClientConfig::default()));
        assert_eq!(registered.state_epoch("svc"), 2);
        assert_eq!(registered.state_epoch("other"), 1);

        let removed = registered.with_client("svc", None);
        assert!(removed.client("svc").is_none());
        assert_eq!(removed.state_epoch("svc"), 3);

        let closed = removed.closed();
        assert!(!closed.initialized);
        assert!(closed.client_epochs.is_empty());
        assert_eq!(closed.state_epoch("svc"), 4);
    }

    #[test]
    fn runtime_config_looks_up_clients() {
        let mut config = RuntimeConfig::default();
        config.clients.insert("svc".into(), Arc::new(ClientConfig::default()));
        assert!(config.client("svc").is_some());
        assert!(config.client("other").is_none());
        assert!(!config.initialized);
    }
}
