//! Jitter applied on top of computed backoff.
//!
//! - `None`: deterministic delays for tests or tightly controlled workflows.
//! - `Additive`: adds a uniform value in `[0, delay / 3)` so synchronized callers spread out
//!   while never waiting less than the backoff floor.
//!
//! RNG: `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! [`Jitter::apply_with_rng`].

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter - use exact backoff delay
    #[default]
    None,
    /// Add up to one third of the delay
    Additive,
}

impl Jitter {
    /// `Additive` when `enabled`, otherwise `None`.
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Jitter::Additive
        } else {
            Jitter::None
        }
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Additive => {
                let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                let third = millis / 3;
                if third == 0 {
                    return delay;
                }
                let extra = rng.random_range(0..third);
                Duration::from_millis(millis.saturating_add(extra))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_is_identity() {
        let delay = Duration::from_millis(300);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    #[test]
    fn additive_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let delay = Duration::from_millis(300);
        for _ in 0..1_000 {
            let jittered = Jitter::Additive.apply_with_rng(delay, &mut rng);
            assert!(jittered >= delay);
            assert!(jittered < Duration::from_millis(400));
        }
    }

    #[test]
    fn additive_is_deterministic_with_seed() {
        let delay = Duration::from_millis(900);
        let a = Jitter::Additive.apply_with_rng(delay, &mut StdRng::seed_from_u64(7));
        let b = Jitter::Additive.apply_with_rng(delay, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn tiny_delays_are_left_alone() {
        let delay = Duration::from_millis(2);
        assert_eq!(Jitter::Additive.apply(delay), delay);
        assert_eq!(Jitter::Additive.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn from_enabled_maps_flag() {
        assert_eq!(Jitter::from_enabled(true), Jitter::Additive);
        assert_eq!(Jitter::from_enabled(false), Jitter::None);
    }
}
