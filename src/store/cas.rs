//! Optimistic compare-and-swap backends.
//!
//! For key-value stores without server-side scripting, [`CasBucketStore`] builds the atomic
//! consume from two primitives: a versioned read and a conditional write that only lands if
//! the version is unchanged. A lost race re-reads and retries, up to `max_attempts` times
//! with backoff, so no two callers can both spend the same token.

use super::{BucketParams, BucketStore, ConsumeOutcome};
use crate::backoff::Backoff;
use crate::error::StoreError;
use crate::jitter::Jitter;
use crate::record::BucketRecord;
use crate::refill;
use crate::sleeper::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::Arc;

/// A stored value with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub raw: String,
    pub version: u64,
}

/// Versioned key-value primitives.
#[async_trait]
pub trait CasStore: Send + Sync {
    /// Current value of `key`, or `None` if absent or expired at `now_ms`.
    async fn load(&self, key: &str, now_ms: u64) -> Result<Option<Versioned>, StoreError>;

    /// Write `raw` with a TTL only if the current version is `expected` (`None` = must not
    /// exist). Returns `Ok(false)` when another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        raw: String,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError>;
}

/// Turns a [`CasStore`] into a [`BucketStore`] with a bounded optimistic retry loop.
#[derive(Debug, Clone)]
pub struct CasBucketStore<S> {
    inner: S,
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl<S> CasBucketStore<S>
where
    S: CasStore,
{
    /// Three attempts, 1ms exponential backoff with full jitter.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter: Jitter::Full,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Total attempts (first try + retries). Clamped to at least 1.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<Z>(mut self, sleeper: Z) -> Self
    where
        Z: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Borrow the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S> BucketStore for CasBucketStore<S>
where
    S: CasStore,
{
    async fn atomic_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.jitter.apply(self.backoff.delay(attempt));
                self.sleeper.sleep(delay).await;
            }

            let loaded = self.inner.load(key, now_ms).await?;
            let (current, expected, state_reset) = match &loaded {
                Some(v) => match BucketRecord::decode(&v.raw) {
                    Ok(rec) => (rec, Some(v.version), false),
                    Err(err) => {
                        tracing::warn!(target: "tokengate::cas", key, error = %err, "resetting corrupt bucket");
                        (BucketRecord::full(params.capacity, now_ms), Some(v.version), true)
                    }
                },
                None => (BucketRecord::full(params.capacity, now_ms), None, false),
            };

            let (next, consumed) = current.consume_one(now_ms, params.capacity, params.refill_rate);
            if self.inner.compare_and_swap(key, expected, next.encode(), params.ttl_ms, now_ms).await? {
                return Ok(ConsumeOutcome {
                    tokens_after: next.tokens,
                    next_refill_ms: refill::next_refill_ms(next.last_refill_ms, params.refill_rate),
                    consumed,
                    state_reset,
                });
            }
            tracing::trace!(target: "tokengate::cas", key, attempt, "compare-and-swap lost, retrying");
        }

        Err(StoreError::Contention { attempts: self.max_attempts })
    }
}
