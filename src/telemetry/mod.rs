//! Telemetry for admission control.
//!
//! The limiter reports what it decided through a [`TelemetrySink`] handed to it at
//! construction, never through process-global logging state. Sinks are
//! `tower::Service<LimiterEvent>` implementations:
//!
//! - [`NullSink`] discards everything (default).
//! - [`LogSink`] forwards to `tracing` with structured fields.
//! - [`MemorySink`] records events for tests.
//!
//! ```rust
//! use tokengate::telemetry::{LimiterEvent, MemorySink};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(LimiterEvent::StateReset { key: "ip:10.0.0.7".into() }).await.unwrap();
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

pub mod events;
pub mod sinks;

pub use events::LimiterEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
