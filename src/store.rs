//! Shared bucket state.
//!
//! A [`BucketStore`] owns every persisted bucket and exposes exactly one operation,
//! [`BucketStore::atomic_consume`]: load the record (or a full default), refill it, take a
//! token if one is available and persist the result, all as one indivisible step per key.
//! Two concurrent callers on the same key must never both spend the same token.
//!
//! Backends get there one of two ways:
//! - a server-side script or transaction (the Redis backend, [`InMemoryStore`]), or
//! - optimistic versioned writes through [`cas::CasBucketStore`], which retries a bounded
//!   number of times with backoff and then gives up with [`StoreError::Contention`].
//!
//! Records carry a time-to-live ([`BucketParams::ttl_ms`]) so abandoned clients expire.

use crate::error::StoreError;
use crate::refill;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod cas;
pub mod memory;

pub use cas::{CasBucketStore, CasStore, Versioned};
pub use memory::InMemoryStore;

/// Bucket shape applied on every consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    /// Maximum tokens (burst size).
    pub capacity: u64,
    /// Tokens restored per second.
    pub refill_rate: f64,
    /// Record time-to-live in milliseconds.
    pub ttl_ms: u64,
}

impl BucketParams {
    /// Params with a TTL derived from capacity and rate.
    pub fn new(capacity: u64, refill_rate: f64, ttl_safety_factor: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            ttl_ms: refill::bucket_ttl_ms(capacity, refill_rate, ttl_safety_factor),
        }
    }
}

/// What a consume did to a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// Tokens left in the bucket after the call.
    pub tokens_after: u64,
    /// When the next whole token accrues (unix millis).
    pub next_refill_ms: u64,
    /// Whether a token was taken.
    pub consumed: bool,
    /// The stored record was unreadable and was replaced by a full bucket.
    pub state_reset: bool,
}

/// Durable bucket storage shared by every gateway instance.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Load-refill-consume-store for `key`, indivisible with respect to other callers on the
    /// same key. A missing (or expired) record is a full bucket created at `now_ms`.
    async fn atomic_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError>;
}

#[async_trait]
impl<S> BucketStore for Arc<S>
where
    S: BucketStore + ?Sized,
{
    async fn atomic_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        (**self).atomic_consume(key, params, now_ms).await
    }
}

/// Store used when rate limiting storage is disabled: every call is admitted against a
/// permanently full bucket and nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct NoopStore {
    next_refill_after: Option<Duration>,
}

impl NoopStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `now + interval` as the next refill instead of one refill period.
    pub fn with_refill_interval(interval: Duration) -> Self {
        Self { next_refill_after: Some(interval) }
    }
}

#[async_trait]
impl BucketStore for NoopStore {
    async fn atomic_consume(
        &self,
        _key: &str,
        params: &BucketParams,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let next_refill_ms = match self.next_refill_after {
            Some(interval) => {
                now_ms.saturating_add(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX))
            }
            None => refill::next_refill_ms(now_ms, params.refill_rate),
        };
        Ok(ConsumeOutcome {
            tokens_after: params.capacity,
            next_refill_ms,
            consumed: true,
            state_reset: false,
        })
    }
}
