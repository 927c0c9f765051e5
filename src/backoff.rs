//! Backoff between compare-and-swap attempts.
//!
//! Attempt index `0` is the first try (no delay); retries start at `attempt = 1`. Delays
//! saturate at [`MAX_BACKOFF`]. Retry delays on the admission path are meant to be a few
//! milliseconds: the whole store call is still bounded by the limiter's deadline.
//!
//! ```rust
//! use std::time::Duration;
//! use tokengate::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(2))
//!     .with_max(Duration::from_millis(10))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(2));
//! assert_eq!(backoff.delay(3), Duration::from_millis(8));
//! assert_eq!(backoff.delay(4), Duration::from_millis(10)); // capped
//! ```

use std::time::Duration;
use thiserror::Error;

/// Ceiling applied when calculations overflow (1 second).
pub const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackoffError {
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackoffKind {
    Constant { delay: Duration },
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule for CAS retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// Doubling delay starting at `base`.
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, max: None } }
    }

    /// Cap an exponential schedule.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay before `attempt` (0 = first try, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self.kind {
            BackoffKind::Constant { delay } => delay,
            BackoffKind::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier);
                let exp = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                max.map(|m| exp.min(m)).unwrap_or(exp)
            }
        };
        delay.min(MAX_BACKOFF)
    }
}

impl Default for Backoff {
    /// 1ms, 2ms, 4ms, ... capped at 20ms.
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential {
                base: Duration::from_millis(1),
                max: Some(Duration::from_millis(20)),
            },
        }
    }
}
