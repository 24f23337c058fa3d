//! Exponential backoff used between retry attempts.
//!
//! Attempt semantics: `attempt` is the 0-based index of the attempt that just failed, so the
//! first retry waits `base`, the second `2 * base`, and so on. The shift is clamped at
//! [`MAX_SHIFT`] and the result is capped at `max`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use ninelives_http::Backoff;
//!
//! let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1)).unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(400));
//! assert_eq!(backoff.delay(9), Duration::from_secs(1)); // capped
//! ```

use std::fmt;
use std::time::Duration;

/// Largest left shift applied to the base delay.
pub const MAX_SHIFT: u32 = 20;

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "backoff max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a backoff; errors if `max < base`.
    pub fn new(base: Duration, max: Duration) -> Result<Self, BackoffError> {
        if max < base {
            return Err(BackoffError::MaxLessThanBase { base, max });
        }
        Ok(Self { base, max })
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// `min(base << min(MAX_SHIFT, attempt), max)`, computed in whole milliseconds.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.min(MAX_SHIFT);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let scaled = base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(scaled.min(max_ms))
    }
}
