//! Error types for admission control.
//!
//! Only [`ConfigError`] is fatal. [`StoreError`] is raised by bucket stores and absorbed by
//! the limiter's fail-open path; [`CorruptState`] never leaves a store, it turns into a reset
//! bucket instead.

use std::time::Duration;
use thiserror::Error;

/// Boxed transport error carried by [`StoreError::Unavailable`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid limiter configuration. Refuses to build a limiter in an undefined state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Bucket capacity must be at least one token.
    #[error("capacity must be > 0 (got {0})")]
    InvalidCapacity(i64),
    /// Refill rate must be finite and positive.
    #[error("refill_rate must be a finite number > 0 (got {0})")]
    InvalidRefillRate(f64),
    /// The store round trip needs a non-zero deadline.
    #[error("store_timeout_ms must be > 0")]
    InvalidStoreTimeout,
    /// TTL multiplier must be finite and at least 1.
    #[error("ttl_safety_factor must be a finite number >= 1 (got {0})")]
    InvalidSafetyFactor(f64),
    /// An environment override could not be parsed.
    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Failure of a bucket store round trip.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("bucket store unavailable: {0}")]
    Unavailable(#[source] BoxError),
    /// The round trip did not finish within the configured deadline.
    #[error("bucket store call timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    /// Optimistic updates kept losing the race for the same key.
    #[error("bucket store contention: gave up after {attempts} compare-and-swap attempts")]
    Contention { attempts: usize },
}

impl StoreError {
    /// Wrap any transport error as [`StoreError::Unavailable`].
    pub fn unavailable<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        StoreError::Unavailable(err.into())
    }

    /// Check if this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }

    /// Check if this error is CAS contention.
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention { .. })
    }
}

/// A stored bucket record that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("corrupt bucket record {raw:?}: {reason}")]
pub struct CorruptState {
    /// The raw stored value.
    pub raw: String,
    /// What was wrong with it.
    pub reason: &'static str,
}
