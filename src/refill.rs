//! Token refill arithmetic.
//!
//! Pure functions shared by every bucket store. Timestamps are unix epoch milliseconds.
//! Accrual is whole-token: fractional progress is never rounded up, and the refill timestamp
//! only advances by the time actually "spent" on whole tokens, so leftover time carries into
//! the next call.
//!
//! ```rust
//! use tokengate::refill::refill;
//!
//! // capacity 5, 1 token/s, empty bucket last refilled at t=0, observed at t=2.5s
//! let r = refill(0, 0, 2_500, 5, 1.0);
//! assert_eq!(r.tokens, 2);
//! assert_eq!(r.refilled_at_ms, 2_000); // the spare 500ms stays on the clock
//! ```

/// Result of a refill step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refill {
    /// Token count after topping up, clamped to capacity.
    pub tokens: u64,
    /// Effective refill timestamp after the step.
    pub refilled_at_ms: u64,
}

/// Top up a bucket for the time elapsed since `last_refill_ms`.
///
/// `rate_per_sec` must be finite and positive; configuration validation guarantees this
/// before any bucket is touched. Clock skew (`now_ms < last_refill_ms`) counts as zero
/// elapsed time.
pub fn refill(tokens: u64, last_refill_ms: u64, now_ms: u64, capacity: u64, rate_per_sec: f64) -> Refill {
    debug_assert!(rate_per_sec.is_finite() && rate_per_sec > 0.0);

    let elapsed_ms = now_ms.saturating_sub(last_refill_ms);
    let to_add = tokens_for(elapsed_ms, rate_per_sec);
    let topped = tokens.saturating_add(to_add).min(capacity);

    let refilled_at_ms = if to_add > 0 {
        let spent_ms = ((to_add as f64) * 1000.0 / rate_per_sec).floor() as u64;
        last_refill_ms.saturating_add(spent_ms.min(elapsed_ms))
    } else {
        last_refill_ms
    };

    Refill { tokens: topped, refilled_at_ms }
}

/// Whole tokens accrued over `elapsed_ms`.
pub fn tokens_for(elapsed_ms: u64, rate_per_sec: f64) -> u64 {
    let accrued = (rate_per_sec * elapsed_ms as f64 / 1000.0).floor();
    if accrued.is_finite() && accrued > 0.0 {
        // float -> int casts saturate
        accrued as u64
    } else {
        0
    }
}

/// Milliseconds needed to accrue one whole token, rounded up.
pub fn refill_period_ms(rate_per_sec: f64) -> u64 {
    (1000.0 / rate_per_sec).ceil().max(1.0) as u64
}

/// Instant at which the next whole token accrues after `refilled_at_ms`.
pub fn next_refill_ms(refilled_at_ms: u64, rate_per_sec: f64) -> u64 {
    refilled_at_ms.saturating_add(refill_period_ms(rate_per_sec))
}

/// Longest TTL ever put on a record: 365 days. Backends reject expiries that overflow
/// their own clock arithmetic.
pub const MAX_BUCKET_TTL_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Record time-to-live: long enough for an idle bucket to refill completely, times a safety
/// factor, clamped to `1s..=`[`MAX_BUCKET_TTL_MS`]. An expired record is indistinguishable
/// from a full bucket.
pub fn bucket_ttl_ms(capacity: u64, rate_per_sec: f64, safety_factor: f64) -> u64 {
    let ms = (capacity as f64 / rate_per_sec * safety_factor * 1000.0).ceil();
    if ms.is_finite() {
        (ms as u64).clamp(1000, MAX_BUCKET_TTL_MS)
    } else {
        MAX_BUCKET_TTL_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_fractional_time_forward() {
        let r = refill(0, 10_000, 12_500, 5, 1.0);
        assert_eq!(r, Refill { tokens: 2, refilled_at_ms: 12_000 });

        // the carried 500ms completes a token after another 500ms
        let r2 = refill(r.tokens, r.refilled_at_ms, 13_000, 5, 1.0);
        assert_eq!(r2, Refill { tokens: 3, refilled_at_ms: 13_000 });
    }

    #[test]
    fn no_accrual_leaves_timestamp_untouched() {
        let r = refill(3, 1_000, 1_999, 5, 1.0);
        assert_eq!(r, Refill { tokens: 3, refilled_at_ms: 1_000 });
    }

    #[test]
    fn clamps_to_capacity() {
        let r = refill(4, 0, 60_000, 5, 1.0);
        assert_eq!(r.tokens, 5);
        assert_eq!(r.refilled_at_ms, 60_000);
    }

    #[test]
    fn clamps_stored_count_above_capacity() {
        // capacity was lowered after the record was written
        let r = refill(50, 1_000, 1_000, 10, 1.0);
        assert_eq!(r.tokens, 10);
    }

    #[test]
    fn clock_skew_counts_as_zero_elapsed() {
        let r = refill(1, 5_000, 4_000, 5, 1.0);
        assert_eq!(r, Refill { tokens: 1, refilled_at_ms: 5_000 });
    }

    #[test]
    fn fractional_rates() {
        // 1.67/s: 1s yields one token and spends 598ms of the second
        let r = refill(0, 0, 1_000, 100, 1.67);
        assert_eq!(r.tokens, 1);
        assert_eq!(r.refilled_at_ms, 598);

        // 0.5/s: nothing after 1.9s, one token at 2s
        assert_eq!(refill(0, 0, 1_900, 10, 0.5).tokens, 0);
        assert_eq!(refill(0, 0, 2_000, 10, 0.5), Refill { tokens: 1, refilled_at_ms: 2_000 });
    }

    #[test]
    fn high_rates_accrue_many_tokens() {
        let r = refill(0, 0, 10, 1_000, 1_000.0);
        assert_eq!(r.tokens, 10);
        assert_eq!(r.refilled_at_ms, 10);
    }

    #[test]
    fn huge_elapsed_saturates() {
        let r = refill(0, 0, u64::MAX, 5, 1e12);
        assert_eq!(r.tokens, 5);
        assert!(r.refilled_at_ms <= u64::MAX);
    }

    #[test]
    fn next_refill_is_one_period_later() {
        assert_eq!(next_refill_ms(1_000, 1.0), 2_000);
        assert_eq!(next_refill_ms(0, 3.0), 334);
        assert_eq!(refill_period_ms(10_000.0), 1);
    }

    #[test]
    fn ttl_scales_with_refill_time() {
        assert_eq!(bucket_ttl_ms(100, 1.0, 2.0), 200_000);
        assert_eq!(bucket_ttl_ms(1, 1_000.0, 1.0), 1_000);
    }

    #[test]
    fn ttl_is_capped_for_tiny_rates() {
        assert_eq!(bucket_ttl_ms(100, 1e-300, 2.0), MAX_BUCKET_TTL_MS);
        assert_eq!(bucket_ttl_ms(u64::MAX, 1e-9, 1e9), MAX_BUCKET_TTL_MS);
    }
}
