//! Sliding-window circuit breaker.
//!
//! Each client gets one breaker holding the last `window_size` outcomes. While CLOSED, once at
//! least `min_calls` outcomes are present and the failure rate reaches the threshold, the
//! breaker opens. OPEN rejects until `open_wait` elapses, then the next caller moves it to
//! HALF_OPEN, where at most `half_open_max_calls` trials are admitted. Any failed trial reopens
//! the breaker; `half_open_max_calls` successful trials close it with an empty window.
//!
//! The failure rate is compared in integer arithmetic (`failures * 100 >= threshold * len`),
//! so there is no rounding.
//!
//! State lives behind one short-held lock per client since a transition touches several
//! fields at once (state, window, timestamps, trial counters).

use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the open wait elapses.
    Open,
    /// Trial mode allowing a limited number of calls to test recovery.
    HalfOpen,
}

/// Resolved breaker settings for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub window_size: usize,
    pub min_calls: usize,
    /// Percentage in `1..=100`.
    pub failure_rate_threshold: u8,
    pub open_wait: Duration,
    pub half_open_max_calls: usize,
    /// Statuses that count as failures.
    pub record_statuses: BTreeSet<u16>,
}

impl CircuitBreakerConfig {
    pub fn is_failure_status(&self, status: u16) -> bool {
        self.record_statuses.contains(&status)
    }
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitRejection {
    pub state: CircuitState,
    /// Time since the breaker last opened.
    pub open_for: Duration,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: VecDeque<bool>,
    failures: usize,
    opened_at_ms: u64,
    half_open_issued: usize,
    half_open_successes: usize,
    // Bumped on every transition so permits from an earlier phase cannot touch a newer one.
    generation: u64,
}

impl BreakerState {
    fn closed(generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            failures: 0,
            opened_at_ms: 0,
            half_open_issued: 0,
            half_open_successes: 0,
            generation,
        }
    }

    fn open(&mut self, now_ms: u64) {
        self.state = CircuitState::Open;
        self.opened_at_ms = now_ms;
        self.half_open_issued = 0;
        self.half_open_successes = 0;
        self.generation += 1;
    }

    fn push(&mut self, failure: bool, window_size: usize) {
        self.window.push_back(failure);
        if failure {
            self.failures += 1;
        }
        while self.window.len() > window_size {
            if self.window.pop_front() == Some(true) {
                self.failures -= 1;
            }
        }
    }
}

/// Per-client circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

/// Admission ticket from [`CircuitBreaker::check_admit`].
///
/// Record the call outcome with [`CircuitPermit::record`]. A half-open trial permit dropped
/// without a recorded outcome gives its trial slot back.
#[derive(Debug)]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    transition: Option<CircuitState>,
    recorded: bool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self { name: name.into(), config, inner: Mutex::new(BreakerState::closed(0)) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Outcomes currently held in the window.
    pub fn window_len(&self) -> usize {
        self.inner.lock().window.len()
    }

    /// Decide whether a call may proceed at `now_ms`.
    pub fn check_admit(self: &Arc<Self>, now_ms: u64) -> Result<CircuitPermit, CircuitRejection> {
        let mut inner = self.inner.lock();
        let mut transition = None;

        if inner.state == CircuitState::Open {
            let elapsed = now_ms.saturating_sub(inner.opened_at_ms);
            if u128::from(elapsed) < self.config.open_wait.as_millis() {
                return Err(CircuitRejection {
                    state: CircuitState::Open,
                    open_for: Duration::from_millis(elapsed),
                });
            }
            inner.state = CircuitState::HalfOpen;
            inner.half_open_issued = 0;
            inner.half_open_successes = 0;
            inner.generation += 1;
            transition = Some(CircuitState::HalfOpen);
            tracing::info!(client = %self.name, "circuit breaker half-open");
        }

        match inner.state {
            CircuitState::Closed => Ok(self.permit(inner.generation, false, transition)),
            CircuitState::HalfOpen => {
                if inner.half_open_issued >= self.config.half_open_max_calls {
                    let open_for = Duration::from_millis(now_ms.saturating_sub(inner.opened_at_ms));
                    return Err(CircuitRejection { state: CircuitState::HalfOpen, open_for });
                }
                inner.half_open_issued += 1;
                Ok(self.permit(inner.generation, true, transition))
            }
            CircuitState::Open => Err(CircuitRejection {
                state: CircuitState::Open,
                open_for: Duration::from_millis(now_ms.saturating_sub(inner.opened_at_ms)),
            }),
        }
    }

    /// Force the breaker back to CLOSED with an empty window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let generation = inner.generation + 1;
        *inner = BreakerState::closed(generation);
    }

    fn permit(
        self: &Arc<Self>,
        generation: u64,
        trial: bool,
        transition: Option<CircuitState>,
    ) -> CircuitPermit {
        CircuitPermit { breaker: Arc::clone(self), generation, trial, transition, recorded: false }
    }

    fn record(&self, generation: u64, trial: bool, now_ms: u64, failure: bool) -> Option<CircuitState> {
        let mut inner = self.inner.lock();
        // Outcomes of calls admitted in an earlier phase are dropped.
        if generation != inner.generation {
            return None;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.push(failure, self.config.window_size);
                let len = inner.window.len();
                let tripped = len >= self.config.min_calls
                    && inner.failures * 100 >= usize::from(self.config.failure_rate_threshold) * len;
                if tripped {
                    let failures = inner.failures;
                    inner.open(now_ms);
                    tracing::warn!(
                        client = %self.name,
                        failures,
                        window = len,
                        "circuit breaker opened"
                    );
                    return Some(CircuitState::Open);
                }
                None
            }
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if !trial {
                    return None;
                }
                if failure {
                    inner.open(now_ms);
                    tracing::warn!(client = %self.name, "circuit breaker re-opened by failed trial");
                    return Some(CircuitState::Open);
                }
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    let generation = inner.generation + 1;
                    *inner = BreakerState::closed(generation);
                    tracing::info!(client = %self.name, "circuit breaker closed");
                    return Some(CircuitState::Closed);
                }
                None
            }
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == generation {
            inner.half_open_issued = inner.half_open_issued.saturating_sub(1);
        }
    }
}

impl CircuitPermit {
    /// Transition caused by this admission (OPEN to HALF_OPEN), if any.
    pub fn transition(&self) -> Option<CircuitState> {
        self.transition
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record the terminal outcome of the admitted call. Returns the new state on a transition.
    pub fn record(mut self, now_ms: u64, failure: bool) -> Option<CircuitState> {
        self.recorded = true;
        self.breaker.record(self.generation, self.trial, now_ms, failure)
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        if self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(window: usize, min_calls: usize, threshold: u8, half_open: usize) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                window_size: window,
                min_calls,
                failure_rate_threshold: threshold,
                open_wait: Duration::from_millis(1_000),
                half_open_max_calls: half_open,
                record_statuses: [500, 503].into_iter().collect(),
            },
        ))
    }

    fn record(breaker: &Arc<CircuitBreaker>, now: u64, failure: bool) -> Option<CircuitState> {
        breaker.check_admit(now).expect("admitted").record(now, failure)
    }

    #[test]
    fn test_does_not_open_before_min_calls() {
        let breaker = breaker(10, 4, 50, 1);
        for _ in 0..3 {
            assert_eq!(record(&breaker, 0, true), None);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(record(&breaker, 0, true), Some(CircuitState::Open));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_threshold_is_inclusive_integer_rate() {
        // 2 of 4 = exactly 50%.
        let breaker = breaker(4, 4, 50, 1);
        record(&breaker, 0, false);
        record(&breaker, 0, true);
        record(&breaker, 0, false);
        assert_eq!(record(&breaker, 0, true), Some(CircuitState::Open));

        // 1 of 3 = 33.3% stays below 34%.
        let breaker = breaker_with_threshold(34);
        record(&breaker, 0, true);
        record(&breaker, 0, false);
        assert_eq!(record(&breaker, 0, false), None);
    }

    fn breaker_with_threshold(threshold: u8) -> Arc<CircuitBreaker> {
        breaker(3, 3, threshold, 1)
    }

    #[test]
    fn test_window_keeps_most_recent_outcomes() {
        let breaker = breaker(3, 3, 100, 1);
        record(&breaker, 0, true);
        record(&breaker, 0, true);
        record(&breaker, 0, false);
        // Oldest failure slides out; window is [true, false, true] = 66%.
        assert_eq!(record(&breaker, 0, true), None);
        assert_eq!(breaker.window_len(), 3);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_rejects_until_wait_elapses() {
        let breaker = breaker(2, 2, 50, 1);
        record(&breaker, 0, true);
        record(&breaker, 0, true);

        let rejection = breaker.check_admit(400).unwrap_err();
        assert_eq!(rejection.state, CircuitState::Open);
        assert_eq!(rejection.open_for, Duration::from_millis(400));

        let trial = breaker.check_admit(1_000).expect("half-open trial");
        assert!(trial.is_trial());
        assert_eq!(trial.transition(), Some(CircuitState::HalfOpen));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_limits_trials_and_closes() {
        let breaker = breaker(2, 2, 50, 2);
        record(&breaker, 0, true);
        record(&breaker, 0, true);

        let p1 = breaker.check_admit(1_000).unwrap();
        let p2 = breaker.check_admit(1_000).unwrap();
        let rejection = breaker.check_admit(1_000).unwrap_err();
        assert_eq!(rejection.state, CircuitState::HalfOpen);

        assert_eq!(p1.record(1_001, false), None);
        assert_eq!(p2.record(1_002, false), Some(CircuitState::Closed));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.window_len(), 0);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let breaker = breaker(2, 2, 50, 2);
        record(&breaker, 0, true);
        record(&breaker, 0, true);

        let trial = breaker.check_admit(1_000).unwrap();
        assert_eq!(trial.record(1_500, true), Some(CircuitState::Open));
        // Reopened at 1_500, so still open at 2_000.
        assert!(breaker.check_admit(2_000).is_err());
        assert!(breaker.check_admit(2_500).is_ok());
    }

    #[test]
    fn test_unrecorded_trial_returns_its_slot() {
        let breaker = breaker(2, 2, 50, 1);
        record(&breaker, 0, true);
        record(&breaker, 0, true);

        let trial = breaker.check_admit(1_000).unwrap();
        assert!(breaker.check_admit(1_000).is_err());
        drop(trial);
        assert!(breaker.check_admit(1_000).is_ok());
    }

    #[test]
    fn test_outcomes_ignored_while_open() {
        let breaker = breaker(2, 2, 50, 1);
        let late = breaker.check_admit(0).unwrap();
        record(&breaker, 0, true);
        record(&breaker, 0, true);
        assert_eq!(late.record(10, false), None);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_outcomes_from_before_recovery_do_not_reach_new_window() {
        let breaker = breaker(2, 2, 50, 1);
        let late = breaker.check_admit(0).unwrap();
        record(&breaker, 0, true);
        record(&breaker, 0, true);
        assert_eq!(record(&breaker, 1_000, false), Some(CircuitState::Closed));
        assert_eq!(breaker.window_len(), 0);

        assert_eq!(late.record(1_001, true), None);
        assert_eq!(breaker.window_len(), 0);

        // One real failure after recovery is below min_calls.
        assert_eq!(record(&breaker, 1_002, true), None);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset_discards_in_flight_outcomes() {
        let breaker = breaker(2, 2, 50, 1);
        let in_flight = breaker.check_admit(0).unwrap();
        record(&breaker, 0, true);
        breaker.reset();
        assert_eq!(in_flight.record(5, true), None);
        assert_eq!(breaker.window_len(), 0);
    }

    #[test]
    fn test_reset_closes() {
        let breaker = breaker(2, 2, 50, 1);
        record(&breaker, 0, true);
        record(&breaker, 0, true);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check_admit(0).is_ok());
    }

    #[test]
    fn test_record_statuses() {
        let breaker = breaker(2, 2, 50, 1);
        assert!(breaker.config().is_failure_status(503));
        assert!(!breaker.config().is_failure_status(404));
    }
}
