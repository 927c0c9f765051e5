//! Events emitted by the rate limiter.

use std::fmt;

/// Something worth observing happened during an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A token was consumed and the request let through.
    Admitted {
        /// Client key the bucket belongs to.
        key: String,
        /// Tokens left after this call.
        remaining: u64,
    },
    /// The bucket was empty; the request is rejected with 429.
    Throttled {
        key: String,
        remaining: u64,
        capacity: u64,
        /// When the next whole token accrues (unix millis).
        next_refill_ms: u64,
    },
    /// The store failed or timed out; the request was let through unchecked.
    FailOpen {
        key: String,
        /// Rendered store error.
        cause: String,
    },
    /// A stored record could not be parsed and was replaced by a full bucket.
    StateReset { key: String },
}

impl LimiterEvent {
    /// Client key this event concerns.
    pub fn key(&self) -> &str {
        match self {
            LimiterEvent::Admitted { key, .. }
            | LimiterEvent::Throttled { key, .. }
            | LimiterEvent::FailOpen { key, .. }
            | LimiterEvent::StateReset { key } => key,
        }
    }

    /// Short stable name, suitable as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            LimiterEvent::Admitted { .. } => "admitted",
            LimiterEvent::Throttled { .. } => "throttled",
            LimiterEvent::FailOpen { .. } => "fail_open",
            LimiterEvent::StateReset { .. } => "state_reset",
        }
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admitted { key, remaining } => {
                write!(f, "Admitted({}, remaining={})", key, remaining)
            }
            LimiterEvent::Throttled { key, remaining, capacity, next_refill_ms } => write!(
                f,
                "Throttled({}, remaining={}/{}, next_refill_ms={})",
                key, remaining, capacity, next_refill_ms
            ),
            LimiterEvent::FailOpen { key, cause } => write!(f, "FailOpen({}, cause={})", key, cause),
            LimiterEvent::StateReset { key } => write!(f, "StateReset({})", key),
        }
    }
}
