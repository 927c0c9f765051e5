//! Jitter for CAS retry delays.
//!
//! Gateway instances that collide on one hot key tend to retry in lockstep; randomizing the
//! delay spreads them out.
//! - `None`: exact backoff delay (deterministic tests).
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy applied to each retry delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Use the backoff delay as-is.
    None,
    /// Random between 0 and delay.
    #[default]
    Full,
    /// Random between delay/2 and delay.
    Equal,
}

impl Jitter {
    /// Apply jitter to a delay using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let micros: u64 = delay.as_micros().try_into().unwrap_or(u64::MAX);
        if micros == 0 {
            return Duration::ZERO;
        }
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_micros(rng.random_range(0..=micros)),
            Jitter::Equal => Duration::from_micros(rng.random_range(micros / 2..=micros)),
        }
    }
}
