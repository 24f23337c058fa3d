//! Transport-handle cache.
//!
//! Handles are keyed by a structural fingerprint of the settings that shape a connection
//! ([`HandleKey`]). Logically identical configurations map to the same key and so reuse one
//! handle; `build_count` lets tests verify that. Idle entries are removed by a sweep the
//! engine runs every [`SWEEP_INTERVAL`]th execution rather than on each call.

use crate::config::TlsMaterial;
use crate::error::HttpError;
use crate::policy::EffectivePolicy;
use crate::transport::Transport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Executions between idle sweeps.
pub const SWEEP_INTERVAL: u64 = 64;

/// Connection-relevant fingerprint of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleKey {
    pub client: String,
    pub connect_timeout: Duration,
    pub follow_redirects: bool,
    /// [`TlsMaterial::identity`] of the client's TLS material.
    pub tls_identity: Option<u64>,
}

impl HandleKey {
    pub fn for_policy(policy: &EffectivePolicy, tls: Option<&TlsMaterial>) -> Self {
        Self {
            client: policy.client.clone(),
            connect_timeout: policy.connect_timeout,
            follow_redirects: policy.follow_redirects,
            tls_identity: tls.map(TlsMaterial::identity),
        }
    }
}

struct Entry {
    handle: Arc<dyn Transport>,
    last_used_ms: AtomicU64,
}

/// Concurrent map of cached transport handles.
#[derive(Default)]
pub struct HandleCache {
    entries: RwLock<HashMap<HandleKey, Arc<Entry>>>,
    builds: AtomicU64,
    executions: AtomicU64,
}

impl fmt::Debug for HandleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCache")
            .field("len", &self.len())
            .field("builds", &self.build_count())
            .finish()
    }
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handle for `key`, or one built by `build` and stored.
    ///
    /// Hits refresh the entry's last-used time. Misses build under the write lock after a
    /// second lookup, so concurrent first calls for one key build once.
    pub fn get_or_create<F>(&self, key: &HandleKey, now_ms: u64, build: F) -> Result<Arc<dyn Transport>, HttpError>
    where
        F: FnOnce(&HandleKey) -> Result<Arc<dyn Transport>, HttpError>,
    {
        if let Some(entry) = self.entries.read().get(key) {
            entry.last_used_ms.store(now_ms, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.handle));
        }

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key) {
            entry.last_used_ms.store(now_ms, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.handle));
        }
        let handle = build(key)?;
        entries.insert(
            key.clone(),
            Arc::new(Entry { handle: Arc::clone(&handle), last_used_ms: AtomicU64::new(now_ms) }),
        );
        let builds = self.builds.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(client = %key.client, builds, "built transport handle");
        Ok(handle)
    }

    /// Count one execution; true on every [`SWEEP_INTERVAL`]th.
    pub fn tick(&self) -> bool {
        (self.executions.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0
    }

    /// Drop entries unused for longer than `idle`. Returns how many were removed.
    pub fn evict_idle(&self, now_ms: u64, idle: Duration) -> usize {
        let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now_ms.saturating_sub(entry.last_used_ms.load(Ordering::Relaxed)) <= idle_ms);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "evicted idle transport handles");
        }
        evicted
    }

    /// Handles built since creation (not reset by eviction or `clear`).
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Remove every handle belonging to `client`.
    pub fn remove_client(&self, client: &str) {
        self.entries.write().retain(|key, _| key.client != client);
    }
}
