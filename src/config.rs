//! Limiter configuration.
//!
//! `RateLimitConfig` is plain data (serde-friendly, so it can live in whatever config file
//! the gateway loads) plus a builder and [`RateLimitConfig::validate`]. A limiter is only
//! ever built from a validated config; invalid capacity or rate is fatal at startup.
//!
//! ```rust
//! use tokengate::RateLimitConfig;
//!
//! let cfg = RateLimitConfig::builder().capacity(5).refill_rate(1.0).build().unwrap();
//! assert_eq!(cfg.capacity, 5);
//!
//! assert!(RateLimitConfig::builder().capacity(0).build().is_err());
//! ```

use crate::error::ConfigError;
use crate::store::BucketParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variables read by [`RateLimitConfig::from_env`].
pub const ENV_CAPACITY: &str = "TOKEN_BUCKET_CAPACITY";
pub const ENV_REFILL_RATE: &str = "TOKEN_BUCKET_REFILL_RATE";
pub const ENV_REFILL_INTERVAL_SECS: &str = "TOKEN_BUCKET_REFILL_INTERVAL_SECS";
pub const ENV_STORE_TIMEOUT_MS: &str = "TOKEN_BUCKET_STORE_TIMEOUT_MS";

/// Token bucket and store-call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum tokens per bucket (burst size).
    pub capacity: i64,
    /// Tokens restored per second.
    pub refill_rate: f64,
    /// Informational refill cadence; refill itself follows elapsed wall-clock time. Used as
    /// the advertised next refill when the store is disabled.
    pub refill_interval_secs: Option<u64>,
    /// Deadline for one store round trip before failing open.
    pub store_timeout_ms: u64,
    /// Record TTL = capacity / refill_rate * this factor.
    pub ttl_safety_factor: f64,
    /// Prepended to every client key in the store.
    pub key_prefix: String,
    /// Honor `X-Forwarded-For` / `X-Real-IP` when identifying clients.
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitConfig {
    /// 100 tokens, refilled at 100 per minute.
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_rate: 1.67,
            refill_interval_secs: Some(60),
            store_timeout_ms: 500,
            ttl_safety_factor: 2.0,
            key_prefix: "token_bucket:".to_string(),
            trust_forwarded_headers: false,
        }
    }
}

impl RateLimitConfig {
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Defaults overlaid with `TOKEN_BUCKET_*` environment variables, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(
            var: &'static str,
            lookup: &dyn Fn(&'static str) -> Option<String>,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidEnv { var, value }),
            }
        }

        let mut cfg = Self::default();
        if let Some(v) = parse(ENV_CAPACITY, &lookup)? {
            cfg.capacity = v;
        }
        if let Some(v) = parse(ENV_REFILL_RATE, &lookup)? {
            cfg.refill_rate = v;
        }
        if let Some(v) = parse(ENV_REFILL_INTERVAL_SECS, &lookup)? {
            cfg.refill_interval_secs = Some(v);
        }
        if let Some(v) = parse(ENV_STORE_TIMEOUT_MS, &lookup)? {
            cfg.store_timeout_ms = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that would leave the limiter in an undefined state.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity <= 0 {
            return Err(ConfigError::InvalidCapacity(self.capacity));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(ConfigError::InvalidRefillRate(self.refill_rate));
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::InvalidStoreTimeout);
        }
        if !self.ttl_safety_factor.is_finite() || self.ttl_safety_factor < 1.0 {
            return Err(ConfigError::InvalidSafetyFactor(self.ttl_safety_factor));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn refill_interval(&self) -> Option<Duration> {
        self.refill_interval_secs.map(Duration::from_secs)
    }

    /// Bucket shape for stores. Assumes the config has been validated.
    pub fn bucket_params(&self) -> BucketParams {
        BucketParams::new(self.capacity.max(1) as u64, self.refill_rate, self.ttl_safety_factor)
    }
}

/// Builder for [`RateLimitConfig`]; `build` validates.
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(mut self, capacity: i64) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn refill_rate(mut self, tokens_per_sec: f64) -> Self {
        self.config.refill_rate = tokens_per_sec;
        self
    }

    pub fn refill_interval(mut self, interval: Duration) -> Self {
        self.config.refill_interval_secs = Some(interval.as_secs());
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn ttl_safety_factor(mut self, factor: f64) -> Self {
        self.config.ttl_safety_factor = factor;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.config.trust_forwarded_headers = trust;
        self
    }

    pub fn build(self) -> Result<RateLimitConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
