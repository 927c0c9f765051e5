//! Admission control.
//!
//! [`RateLimiter`] turns a client key into a [`Decision`]: one timeout-bounded round trip
//! to the [`BucketStore`], then allow or deny on whether a token was consumed. When the
//! store errors or misses its deadline the limiter fails open, allowing the request and
//! reporting a full bucket, and emits [`LimiterEvent::FailOpen`] to its sink.
//!
//! The limiter holds no bucket state; clones share the store, sink and live parameters.
//!
//! ```rust
//! use tokengate::{ClientKey, InMemoryStore, RateLimitConfig, RateLimiter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tokengate::ConfigError> {
//! let cfg = RateLimitConfig::builder().capacity(2).refill_rate(1.0).build()?;
//! let limiter = RateLimiter::new(cfg, InMemoryStore::new())?;
//!
//! let key = ClientKey::user("42");
//! assert!(limiter.admit(&key).await.allowed);
//! assert!(limiter.admit(&key).await.allowed);
//! assert!(!limiter.admit(&key).await.allowed);
//! # Ok(())
//! # }
//! ```

use crate::adaptive::DynamicConfig;
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::decision::Decision;
use crate::error::{ConfigError, StoreError};
use crate::identity::{ClientIdentifier, ClientKey};
use crate::refill;
use crate::store::{BucketStore, ConsumeOutcome};
use crate::telemetry::{emit_best_effort, LimiterEvent, NullSink, TelemetrySink};
use chrono::{DateTime, Utc};
use http::Request;
use std::fmt;
use std::sync::Arc;

/// Token-bucket admission over a shared [`BucketStore`].
pub struct RateLimiter<S: ?Sized, K = NullSink> {
    store: Arc<S>,
    config: DynamicConfig<RateLimitConfig>,
    clock: Arc<dyn Clock>,
    sink: K,
}

impl<S: ?Sized, K: Clone> Clone for RateLimiter<S, K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<S: ?Sized, K> fmt::Debug for RateLimiter<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config.get())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<S> RateLimiter<S, NullSink>
where
    S: BucketStore,
{
    /// Build a limiter on the wall clock with events discarded.
    ///
    /// Fails if `config` does not validate; a limiter never runs with undefined parameters.
    pub fn new(config: RateLimitConfig, store: S) -> Result<Self, ConfigError> {
        Self::from_shared(config, Arc::new(store))
    }
}

impl<S> RateLimiter<S, NullSink>
where
    S: BucketStore + ?Sized,
{
    /// Like [`new`](Self::new) for a store that is already shared, e.g. `Arc<dyn BucketStore>`.
    pub fn from_shared(config: RateLimitConfig, store: Arc<S>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            config: DynamicConfig::new(config),
            clock: Arc::new(SystemClock),
            sink: NullSink,
        })
    }
}

impl<S, K> RateLimiter<S, K>
where
    S: BucketStore + ?Sized,
    K: TelemetrySink,
    K::Future: Send + 'static,
{
    /// Route limiter events to `sink`.
    pub fn with_sink<K2>(self, sink: K2) -> RateLimiter<S, K2>
    where
        K2: TelemetrySink,
    {
        RateLimiter { store: self.store, config: self.config, clock: self.clock, sink }
    }

    /// Take bucket timestamps from `clock`.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Current parameters.
    pub fn config(&self) -> Arc<RateLimitConfig> {
        self.config.get()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current time on the limiter's clock.
    pub fn now(&self) -> DateTime<Utc> {
        Decision::timestamp_from_millis(self.clock.now_millis())
    }

    /// Retune capacity and refill rate for every clone of this limiter. Invalid values are
    /// rejected and the running parameters are kept.
    pub fn update_params(
        &self,
        capacity: i64,
        refill_rate: f64,
    ) -> Result<Arc<RateLimitConfig>, ConfigError> {
        self.config.try_update(|cur| {
            let next = RateLimitConfig { capacity, refill_rate, ..cur.clone() };
            next.validate()?;
            Ok(next)
        })
    }

    /// Replace the whole configuration after validating it.
    pub fn reconfigure(&self, config: RateLimitConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config.set(config);
        Ok(())
    }

    /// Client key for an HTTP request under the current forwarding policy.
    pub fn identify<B>(&self, req: &Request<B>) -> ClientKey {
        ClientIdentifier::new()
            .trust_forwarded_headers(self.config.get().trust_forwarded_headers)
            .identify_request(req)
    }

    /// Identify the caller of `req` and run an admission check for it.
    pub async fn admit_request<B>(&self, req: &Request<B>) -> Decision {
        let key = self.identify(req);
        self.admit(&key).await
    }

    /// Spend one token from `key`'s bucket if one is available.
    ///
    /// Never fails: store errors and timeouts resolve to an allowed, fail-open decision.
    pub async fn admit(&self, key: &ClientKey) -> Decision {
        let cfg = self.config.get();
        let params = cfg.bucket_params();
        let now_ms = self.clock.now_millis();
        let store_key = format!("{}{}", cfg.key_prefix, key);
        let timeout = cfg.store_timeout();

        let consumed =
            tokio::time::timeout(timeout, self.store.atomic_consume(&store_key, &params, now_ms))
                .await
                .unwrap_or(Err(StoreError::Timeout { timeout }));

        match consumed {
            Ok(outcome) => self.decide(key, &cfg, outcome).await,
            Err(err) => self.fail_open(key, &cfg, now_ms, err).await,
        }
    }

    async fn decide(&self, key: &ClientKey, cfg: &RateLimitConfig, outcome: ConsumeOutcome) -> Decision {
        let capacity = cfg.bucket_params().capacity;
        if outcome.state_reset {
            self.emit(LimiterEvent::StateReset { key: key.to_string() }).await;
        }

        let remaining = outcome.tokens_after.min(capacity);
        let event = if outcome.consumed {
            LimiterEvent::Admitted { key: key.to_string(), remaining }
        } else {
            LimiterEvent::Throttled {
                key: key.to_string(),
                remaining,
                capacity,
                next_refill_ms: outcome.next_refill_ms,
            }
        };
        self.emit(event).await;

        Decision {
            allowed: outcome.consumed,
            remaining,
            capacity,
            refill_rate: cfg.refill_rate,
            next_refill_at: Decision::timestamp_from_millis(outcome.next_refill_ms),
            fail_open: false,
        }
    }

    async fn fail_open(
        &self,
        key: &ClientKey,
        cfg: &RateLimitConfig,
        now_ms: u64,
        err: StoreError,
    ) -> Decision {
        tracing::warn!(target: "tokengate", client_id = %key, error = %err, "bucket store unavailable, failing open");
        self.emit(LimiterEvent::FailOpen { key: key.to_string(), cause: err.to_string() }).await;

        let next_refill_ms = match cfg.refill_interval() {
            Some(interval) => {
                now_ms.saturating_add(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX))
            }
            None => refill::next_refill_ms(now_ms, cfg.refill_rate),
        };
        let capacity = cfg.bucket_params().capacity;
        Decision {
            allowed: true,
            remaining: capacity,
            capacity,
            refill_rate: cfg.refill_rate,
            next_refill_at: Decision::timestamp_from_millis(next_refill_ms),
            fail_open: true,
        }
    }

    async fn emit(&self, event: LimiterEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{BucketParams, InMemoryStore};
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug)]
    struct Down;

    #[async_trait]
    impl BucketStore for Down {
        async fn atomic_consume(
            &self,
            _key: &str,
            _params: &BucketParams,
            _now_ms: u64,
        ) -> Result<ConsumeOutcome, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    #[derive(Debug)]
    struct Stalled;

    #[async_trait]
    impl BucketStore for Stalled {
        async fn atomic_consume(
            &self,
            _key: &str,
            _params: &BucketParams,
            _now_ms: u64,
        ) -> Result<ConsumeOutcome, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(StoreError::unavailable("unreachable"))
        }
    }

    fn config(capacity: i64) -> RateLimitConfig {
        RateLimitConfig::builder().capacity(capacity).refill_rate(1.0).build().unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = RateLimitConfig { capacity: 0, ..RateLimitConfig::default() };
        let err = RateLimiter::new(cfg, InMemoryStore::new()).unwrap_err();
        assert_eq!(err, ConfigError::InvalidCapacity(0));
    }

    #[tokio::test]
    async fn store_key_carries_prefix() {
        let store = InMemoryStore::new();
        let limiter = RateLimiter::new(config(5), store.clone()).unwrap();
        limiter.admit(&ClientKey::user("a")).await;
        assert_eq!(store.get("token_bucket:user:a").unwrap().tokens, 4);
        assert!(store.get("user:a").is_none());
    }

    #[tokio::test]
    async fn fail_open_reports_full_bucket() {
        let sink = MemorySink::new();
        let clock = ManualClock::new(10_000);
        let limiter = RateLimiter::new(config(5), Down).unwrap().with_clock(clock).with_sink(sink.clone());

        let d = limiter.admit(&ClientKey::unknown()).await;
        assert!(d.allowed);
        assert!(d.fail_open);
        assert_eq!(d.remaining, 5);
        assert_eq!(d.next_refill_at, Decision::timestamp_from_millis(70_000));

        let events = sink.events_of("fail_open");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key(), "ip:unknown");
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fail_open_is_logged_without_a_sink() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let limiter = RateLimiter::new(config(5), Down).unwrap();
        let d = limiter.admit(&ClientKey::user("carol")).await;
        assert!(d.allowed && d.fail_open);

        let out = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("WARN"), "{out}");
        assert!(out.contains("failing open"), "{out}");
        assert!(out.contains("client_id=user:carol"), "{out}");
        assert!(out.contains("connection refused"), "{out}");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out_and_fails_open() {
        let sink = MemorySink::new();
        let cfg = RateLimitConfig { store_timeout_ms: 50, ..config(3) };
        let limiter = RateLimiter::new(cfg, Stalled).unwrap().with_sink(sink.clone());

        let d = limiter.admit(&ClientKey::user("slow")).await;
        assert!(d.allowed && d.fail_open);
        match &sink.events()[0] {
            LimiterEvent::FailOpen { cause, .. } => assert!(cause.contains("timed out")),
            other => panic!("unexpected event {other}"),
        }
    }

    #[tokio::test]
    async fn emits_admitted_then_throttled() {
        let sink = MemorySink::new();
        let limiter = RateLimiter::new(config(1), InMemoryStore::new())
            .unwrap()
            .with_clock(ManualClock::new(0))
            .with_sink(sink.clone());

        let key = ClientKey::user("a");
        assert!(limiter.admit(&key).await.allowed);
        let d = limiter.admit(&key).await;
        assert!(d.is_denied());
        assert_eq!(d.next_refill_at, Decision::timestamp_from_millis(1_000));

        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["admitted", "throttled"]);
    }

    #[tokio::test]
    async fn corrupt_record_emits_state_reset() {
        let sink = MemorySink::new();
        let store = InMemoryStore::new();
        store.insert_raw("token_bucket:ip:10.0.0.1", "???");
        let limiter = RateLimiter::new(config(5), store).unwrap().with_sink(sink.clone());

        let d = limiter.admit(&ClientKey::ip("10.0.0.1".parse().unwrap())).await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
        assert_eq!(sink.events_of("state_reset").len(), 1);
    }

    #[tokio::test]
    async fn update_params_validates_and_applies_to_clones() {
        let limiter = RateLimiter::new(config(5), InMemoryStore::new()).unwrap();
        let other = limiter.clone();

        assert_eq!(limiter.update_params(-1, 1.0).unwrap_err(), ConfigError::InvalidCapacity(-1));
        assert_eq!(other.config().capacity, 5);

        limiter.update_params(2, 4.0).unwrap();
        assert_eq!(other.config().capacity, 2);
        assert_eq!(other.config().refill_rate, 4.0);

        let d = other.admit(&ClientKey::user("z")).await;
        assert_eq!(d.capacity, 2);
        assert_eq!(d.remaining, 1);
    }

    #[tokio::test]
    async fn admit_request_uses_identity_extension() {
        use crate::identity::AuthenticatedUser;

        let store = InMemoryStore::new();
        let limiter = RateLimiter::new(config(5), store.clone()).unwrap();
        let mut req = Request::new(());
        req.extensions_mut().insert(AuthenticatedUser("7".into()));

        limiter.admit_request(&req).await;
        assert!(store.get("token_bucket:user:7").is_some());
    }
}
