//! In-process bucket store.
//!
//! Useful for single-instance deployments and tests. Consumes run under one mutex, which
//! linearizes every call. The store also implements [`CasStore`] so the optimistic adapter
//! can be exercised against it.
//!
//! Expired records stop counting as soon as their TTL passes and are swept out of the map
//! every [`SWEEP_EVERY`] writes.

use super::cas::{CasStore, Versioned};
use super::{BucketParams, BucketStore, ConsumeOutcome};
use crate::error::StoreError;
use crate::record::BucketRecord;
use crate::refill;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Writes between sweeps of expired records.
pub const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct Entry {
    raw: String,
    version: u64,
    expires_at_ms: u64,
}

/// Simple in-memory bucket store. Clones share the same map.
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
    // store-wide so a key recreated after a sweep never reuses an old version
    versions: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.data.lock().map_err(|_| StoreError::unavailable("in-memory bucket map poisoned"))
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn put(&self, map: &mut HashMap<String, Entry>, key: &str, raw: String, ttl_ms: u64, now_ms: u64) {
        let version = self.next_version();
        map.insert(
            key.to_string(),
            Entry { raw, version, expires_at_ms: now_ms.saturating_add(ttl_ms) },
        );
        if version % SWEEP_EVERY == 0 {
            let before = map.len();
            map.retain(|_, e| e.expires_at_ms > now_ms);
            tracing::trace!(target: "tokengate::memory", removed = before - map.len(), "swept expired buckets");
        }
    }

    /// Decoded record for `key`, ignoring expiry. `None` if absent or corrupt.
    pub fn get(&self, key: &str) -> Option<BucketRecord> {
        let guard = self.data.lock().ok()?;
        guard.get(key).and_then(|e| BucketRecord::decode(&e.raw).ok())
    }

    /// Store a raw value verbatim, bypassing the codec. No expiry.
    pub fn insert_raw(&self, key: impl Into<String>, raw: impl Into<String>) {
        if let Ok(mut guard) = self.data.lock() {
            let version = self.next_version();
            guard.insert(key.into(), Entry { raw: raw.into(), version, expires_at_ms: u64::MAX });
        }
    }

    /// Store a record with no expiry.
    pub fn insert(&self, key: impl Into<String>, record: BucketRecord) {
        self.insert_raw(key, record.encode());
    }

    /// Number of stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.data.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop records whose TTL has passed at `now_ms`. Returns how many were removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        match self.data.lock() {
            Ok(mut guard) => {
                let before = guard.len();
                guard.retain(|_, e| e.expires_at_ms > now_ms);
                before - guard.len()
            }
            Err(_) => 0,
        }
    }
}

fn live<'a>(guard: &'a HashMap<String, Entry>, key: &str, now_ms: u64) -> Option<&'a Entry> {
    guard.get(key).filter(|e| e.expires_at_ms > now_ms)
}

#[async_trait]
impl BucketStore for InMemoryStore {
    async fn atomic_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut guard = self.lock()?;

        let (current, state_reset) = match live(&guard, key, now_ms) {
            Some(entry) => match BucketRecord::decode(&entry.raw) {
                Ok(rec) => (rec, false),
                Err(err) => {
                    tracing::warn!(target: "tokengate::memory", key, error = %err, "resetting corrupt bucket");
                    (BucketRecord::full(params.capacity, now_ms), true)
                }
            },
            None => (BucketRecord::full(params.capacity, now_ms), false),
        };

        let (next, consumed) = current.consume_one(now_ms, params.capacity, params.refill_rate);
        self.put(&mut guard, key, next.encode(), params.ttl_ms, now_ms);

        Ok(ConsumeOutcome {
            tokens_after: next.tokens,
            next_refill_ms: refill::next_refill_ms(next.last_refill_ms, params.refill_rate),
            consumed,
            state_reset,
        })
    }
}

#[async_trait]
impl CasStore for InMemoryStore {
    async fn load(&self, key: &str, now_ms: u64) -> Result<Option<Versioned>, StoreError> {
        let guard = self.lock()?;
        Ok(live(&guard, key, now_ms).map(|e| Versioned { raw: e.raw.clone(), version: e.version }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        raw: String,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        let current = live(&guard, key, now_ms).map(|e| e.version);
        if current != expected {
            return Ok(false);
        }
        self.put(&mut guard, key, raw, ttl_ms, now_ms);
        Ok(true)
    }
}
