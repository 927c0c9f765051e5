//! Persisted bucket record and its wire form.
//!
//! Records are stored as `"<tokens>:<last_refill_ms>"`. Anything else decodes to
//! [`CorruptState`], which stores answer by resetting the bucket to full.

use crate::error::CorruptState;
use crate::refill;
use std::fmt;
use std::str::FromStr;

/// One client's persisted bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRecord {
    /// Tokens left after the last admission check.
    pub tokens: u64,
    /// Effective refill timestamp (unix millis).
    pub last_refill_ms: u64,
}

impl BucketRecord {
    /// A logically full bucket created at `now_ms`.
    pub fn full(capacity: u64, now_ms: u64) -> Self {
        Self { tokens: capacity, last_refill_ms: now_ms }
    }

    /// Refill this record up to `now_ms` and try to take one token.
    ///
    /// Returns the record to persist and whether a token was consumed. The refill is
    /// persisted on both paths so allowed and denied calls account for time identically.
    pub fn consume_one(self, now_ms: u64, capacity: u64, rate_per_sec: f64) -> (Self, bool) {
        let topped = refill::refill(self.tokens, self.last_refill_ms, now_ms, capacity, rate_per_sec);
        let consumed = topped.tokens >= 1;
        let tokens = if consumed { topped.tokens - 1 } else { topped.tokens };
        (Self { tokens, last_refill_ms: topped.refilled_at_ms }, consumed)
    }

    /// Encode to the stored string form.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode the stored string form.
    pub fn decode(raw: &str) -> Result<Self, CorruptState> {
        raw.parse()
    }
}

impl fmt::Display for BucketRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tokens, self.last_refill_ms)
    }
}

impl FromStr for BucketRecord {
    type Err = CorruptState;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let corrupt = |reason| CorruptState { raw: raw.to_string(), reason };
        let (tokens, last) = raw.split_once(':').ok_or_else(|| corrupt("missing separator"))?;
        let tokens = tokens.trim().parse().map_err(|_| corrupt("tokens is not an unsigned integer"))?;
        let last_refill_ms =
            last.trim().parse().map_err(|_| corrupt("last_refill is not an unsigned integer"))?;
        Ok(Self { tokens, last_refill_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_stored_form() {
        let rec = BucketRecord::decode("7:1700000000123").unwrap();
        assert_eq!(rec, BucketRecord { tokens: 7, last_refill_ms: 1_700_000_000_123 });
        assert_eq!(rec.encode(), "7:1700000000123");
    }

    #[test]
    fn rejects_garbage() {
        for raw in ["", "7", "x:1", "7:y", "-1:5", "1.5:5"] {
            let err = BucketRecord::decode(raw).unwrap_err();
            assert_eq!(err.raw, raw);
        }
    }

    #[test]
    fn consume_from_full_bucket() {
        let (rec, consumed) = BucketRecord::full(5, 1_000).consume_one(1_000, 5, 1.0);
        assert!(consumed);
        assert_eq!(rec, BucketRecord { tokens: 4, last_refill_ms: 1_000 });
    }

    #[test]
    fn empty_bucket_denies_but_persists_refill_progress() {
        let empty = BucketRecord { tokens: 0, last_refill_ms: 1_000 };
        let (rec, consumed) = empty.consume_one(1_500, 5, 1.0);
        assert!(!consumed);
        assert_eq!(rec, empty);

        let (rec, consumed) = empty.consume_one(3_700, 5, 1.0);
        assert!(consumed);
        // two tokens accrued, one taken, 700ms carried
        assert_eq!(rec, BucketRecord { tokens: 1, last_refill_ms: 3_000 });
    }
}
