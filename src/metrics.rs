//! Call metrics.
//!
//! Counters are atomics behind a read-write lock: recording paths take the shared side and
//! bump atomics, while [`MetricsRegistry::snapshot`] and [`MetricsRegistry::reset`] take the
//! exclusive side, so a reader never observes a half-reset registry.
//!
//! Recording contract, per logical call:
//! - `record_response` once for a terminal outcome that produced a status;
//! - `record_failure` once for a terminal error without a status;
//! - `record_retry` once per retry decision;
//! - `record_rejection` once for an admission rejection (rate limit, breaker, bulkhead), which
//!   touches only the matching rejection counter.

use crate::error::{ErrorCode, HttpError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub success_calls: u64,
    pub failed_calls: u64,
    pub retried_calls: u64,
    pub timeout_calls: u64,
    pub network_error_calls: u64,
    pub rate_limited_calls: u64,
    pub circuit_open_calls: u64,
    pub bulkhead_rejected_calls: u64,
    pub total_cost_ms: u64,
    pub status_counts: BTreeMap<u16, u64>,
}

impl MetricsSnapshot {
    /// Mean cost of completed calls, in milliseconds.
    pub fn average_cost_ms(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_cost_ms as f64 / self.total_calls as f64
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    timeout: AtomicU64,
    network_error: AtomicU64,
    rate_limited: AtomicU64,
    circuit_open: AtomicU64,
    bulkhead_rejected: AtomicU64,
    cost_ms: AtomicU64,
    statuses: Mutex<BTreeMap<u16, u64>>,
}

/// Aggregated counters for one runtime.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<Counters>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal outcome carrying a status. 2xx counts as success, anything else as failed.
    pub fn record_response(&self, status: u16, cost_ms: u64) {
        let c = self.counters.read();
        c.total.fetch_add(1, Ordering::Relaxed);
        if (200..300).contains(&status) {
            c.success.fetch_add(1, Ordering::Relaxed);
        } else {
            c.failed.fetch_add(1, Ordering::Relaxed);
        }
        c.cost_ms.fetch_add(cost_ms, Ordering::Relaxed);
        *c.statuses.lock().entry(status).or_insert(0) += 1;
    }

    /// Terminal error without a status.
    pub fn record_failure(&self, err: &HttpError, cost_ms: u64) {
        let c = self.counters.read();
        c.total.fetch_add(1, Ordering::Relaxed);
        c.failed.fetch_add(1, Ordering::Relaxed);
        c.cost_ms.fetch_add(cost_ms, Ordering::Relaxed);
        if err.is_timeout() {
            c.timeout.fetch_add(1, Ordering::Relaxed);
        } else if err.code() == ErrorCode::NetworkError {
            c.network_error.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retry(&self) {
        self.counters.read().retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Admission rejection. Codes other than the three rejection codes are ignored.
    pub fn record_rejection(&self, code: ErrorCode) {
        let c = self.counters.read();
        let counter = match code {
            ErrorCode::RateLimited => &c.rate_limited,
            ErrorCode::CircuitOpen => &c.circuit_open,
            ErrorCode::BulkheadRejected => &c.bulkhead_rejected,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.counters.write();
        let snapshot = MetricsSnapshot {
            total_calls: c.total.load(Ordering::Relaxed),
            success_calls: c.success.load(Ordering::Relaxed),
            failed_calls: c.failed.load(Ordering::Relaxed),
            retried_calls: c.retried.load(Ordering::Relaxed),
            timeout_calls: c.timeout.load(Ordering::Relaxed),
            network_error_calls: c.network_error.load(Ordering::Relaxed),
            rate_limited_calls: c.rate_limited.load(Ordering::Relaxed),
            circuit_open_calls: c.circuit_open.load(Ordering::Relaxed),
            bulkhead_rejected_calls: c.bulkhead_rejected.load(Ordering::Relaxed),
            total_cost_ms: c.cost_ms.load(Ordering::Relaxed),
            status_counts: c.statuses.lock().clone(),
        };
        snapshot
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.counters.write() = Counters::default();
    }
}
