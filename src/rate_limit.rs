//! Token-bucket rate limiting.
//!
//! One bucket per client. Refill is `elapsed_ms * qps / 1000` tokens, capped at `burst`; each
//! admitted call consumes one whole token. Tokens are kept as `f64`, so partial refills
//! accumulate across calls until a whole token is available. The gate never blocks: a caller
//! either gets a token now or is told how long until the next one.

use parking_lot::Mutex;
use std::time::Duration;

/// Resolved rate limit settings for one client. `qps == 0` disables the gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub qps: f64,
    pub burst: u32,
}

impl RateLimitConfig {
    pub fn is_enabled(&self) -> bool {
        self.qps > 0.0
    }
}

/// The decision returned by the rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The call may proceed.
    Allowed {
        /// Whole tokens left after this acquisition.
        remaining: u32,
    },
    /// The call is rejected.
    Denied {
        /// Time until the next whole token accrues.
        wait: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill_ms: u64,
}

/// Per-client token bucket. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig, now_ms: u64) -> Self {
        Self {
            config,
            state: Mutex::new(BucketState { tokens: f64::from(config.burst), last_refill_ms: now_ms }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Refill for the time since the last call, then try to take one token.
    pub fn try_acquire(&self, now_ms: u64) -> Decision {
        if !self.config.is_enabled() {
            return Decision::Allowed { remaining: self.config.burst };
        }

        let capacity = f64::from(self.config.burst);
        let mut state = self.state.lock();
        // Saturate if readings go backwards.
        let elapsed_ms = now_ms.saturating_sub(state.last_refill_ms);
        if elapsed_ms > 0 {
            let refill = elapsed_ms as f64 * self.config.qps / 1000.0;
            state.tokens = (state.tokens + refill).min(capacity);
            state.last_refill_ms = now_ms;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Decision::Allowed { remaining: state.tokens as u32 }
        } else {
            let missing = 1.0 - state.tokens;
            let wait_ms = (missing * 1000.0 / self.config.qps).ceil();
            Decision::Denied { wait: Duration::from_millis(wait_ms as u64) }
        }
    }

    /// Current token count, refilled to `now_ms` without consuming.
    pub fn available(&self, now_ms: u64) -> f64 {
        let state = self.state.lock();
        if !self.config.is_enabled() {
            return f64::from(self.config.burst);
        }
        let elapsed_ms = now_ms.saturating_sub(state.last_refill_ms);
        (state.tokens + elapsed_ms as f64 * self.config.qps / 1000.0).min(f64::from(self.config.burst))
    }
}
