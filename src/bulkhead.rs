//! Bulkhead implementation for concurrency limiting
//!
//! A per-client counting semaphore of `max_concurrent` permits. When every permit is held, up
//! to `queue_size` callers may wait, each for at most `acquire_timeout`. Anything beyond that
//! is rejected immediately. The returned [`BulkheadPermit`] releases on drop, so release runs
//! exactly once on success, error, and future cancellation alike.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Resolved bulkhead settings for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadConfig {
    pub max_concurrent: usize,
    pub queue_size: usize,
    pub acquire_timeout: Duration,
}

/// Why a caller was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadRejection {
    pub active: usize,
    pub max: usize,
    /// The caller waited in the queue and timed out.
    pub timed_out: bool,
}

/// Per-client concurrency gate.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    config: BulkheadConfig,
    waiters: AtomicUsize,
}

/// Held for the duration of a call; dropping it frees the slot.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Queue slot reservation, released when the waiting caller leaves the queue.
struct WaitSlot<'a>(&'a AtomicUsize);

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        let permits = config.max_concurrent.min(Semaphore::MAX_PERMITS);
        Self { semaphore: Arc::new(Semaphore::new(permits)), config, waiters: AtomicUsize::new(0) }
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Permits currently held.
    pub fn active(&self) -> usize {
        self.config.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Callers currently queued.
    pub fn waiting(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadRejection> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(BulkheadPermit { _permit: permit });
        }

        let queue_size = self.config.queue_size;
        let reserved = self
            .waiters
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| (w < queue_size).then_some(w + 1))
            .is_ok();
        if !reserved {
            return Err(self.rejection(false));
        }
        let _slot = WaitSlot(&self.waiters);

        match tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(BulkheadPermit { _permit: permit }),
            // Closed semaphore or elapsed timer both reject.
            Ok(Err(_)) => Err(self.rejection(false)),
            Err(_) => Err(self.rejection(true)),
        }
    }

    fn rejection(&self, timed_out: bool) -> BulkheadRejection {
        BulkheadRejection { active: self.active(), max: self.config.max_concurrent, timed_out }
    }
}
