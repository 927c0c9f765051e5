#![forbid(unsafe_code)]

//! # tokengate
//!
//! Distributed token-bucket admission control for HTTP gateways.
//!
//! Every gateway instance shares bucket state through a [`BucketStore`]; each admission
//! check is one atomic load-refill-consume-store round trip, so concurrent requests against
//! the same client never spend the same token twice. When the store is unreachable the
//! limiter fails open and keeps the gateway serving.
//!
//! ## Features
//!
//! - **Whole-token refill** with fractional time carried forward ([`refill`])
//! - **Pluggable stores**: [`InMemoryStore`], optimistic [`CasBucketStore`], [`NoopStore`],
//!   and Redis through the `tokengate-redis` crate
//! - **Fail-open** on store errors and timeouts, reported through a [`TelemetrySink`]
//! - **Tower middleware** setting `X-RateLimit-*` headers and answering 429 with JSON
//! - **Runtime retuning** of capacity and refill rate
//!
//! ## Quick Start
//!
//! ```rust
//! use tokengate::{InMemoryStore, LogSink, RateLimitConfig, RateLimitLayer, RateLimiter};
//! use tower::ServiceBuilder;
//!
//! # fn main() -> Result<(), tokengate::ConfigError> {
//! let config = RateLimitConfig::builder().capacity(100).refill_rate(1.67).build()?;
//! let limiter = RateLimiter::new(config, InMemoryStore::new())?.with_sink(LogSink);
//!
//! let _svc = ServiceBuilder::new()
//!     .layer(RateLimitLayer::new(limiter))
//!     .service_fn(|_req: http::Request<String>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(String::from("hello")))
//!     });
//! # Ok(())
//! # }
//! ```

pub mod adaptive;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod identity;
pub mod jitter;
pub mod limiter;
pub mod middleware;
pub mod record;
pub mod refill;
pub mod sleeper;
pub mod store;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RateLimitConfig, RateLimitConfigBuilder};
pub use decision::{Decision, Rejection, RejectionDetails};
pub use error::{BoxError, ConfigError, CorruptState, StoreError};
pub use identity::{AuthenticatedUser, ClientIdentifier, ClientKey, RemoteAddr};
pub use jitter::Jitter;
pub use limiter::RateLimiter;
pub use middleware::{RateLimitLayer, RateLimitService};
pub use record::BucketRecord;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{
    BucketParams, BucketStore, CasBucketStore, CasStore, ConsumeOutcome, InMemoryStore, NoopStore,
    Versioned,
};
pub use telemetry::{LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink};
