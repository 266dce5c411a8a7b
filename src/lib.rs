#![forbid(unsafe_code)]

//! # write-coordinator
//!
//! A bounded-queue write coordinator for market-data sinks: a worker pool batches
//! submitted items and drains them to a [`Sink`] under a retry policy and circuit
//! breaker, spilling to a dead-letter queue on exhaustion, and publishing backpressure
//! state to a process-wide [`FeedbackBus`].
//!
//! ## Features
//!
//! - **Bounded queue** with watermark-based backpressure and pluggable overflow handling
//! - **Worker pool** batching by size or flush interval, whichever comes first
//! - **Retry policies** with backoff strategies, interleaved with a circuit breaker
//! - **Circuit breaker** with half-open state recovery
//! - **Dead-letter queue** capturing batches that exhaust retry, as NDJSON
//! - **Feedback bus** publishing backpressure-level transitions to any subscriber
//! - **Prometheus metrics** under the fixed `coord_*` names
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use write_coordinator::{CoordinatorConfig, Sink};
//!
//! #[derive(Debug, Clone)]
//! struct PostgresError(String);
//!
//! impl std::fmt::Display for PostgresError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{}", self.0)
//!     }
//! }
//!
//! struct PostgresSink;
//!
//! #[async_trait::async_trait]
//! impl Sink<serde_json::Value> for PostgresSink {
//!     type Error = PostgresError;
//!
//!     async fn write(&self, _batch: &[serde_json::Value]) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CoordinatorConfig::new("bars-coordinator", PostgresSink);
//!     let mut handle = write_coordinator::start(config).await.expect("valid config");
//!
//!     handle.submit(serde_json::json!({"symbol": "AAPL"})).await.expect("queue accepts item");
//!
//!     handle.stop(true, Duration::from_secs(5)).await;
//! }
//! ```

mod bounded_queue;
mod circuit_breaker;
mod clock;
mod config;
mod coordinator;
mod dlq;
mod error;
mod feedback_bus;
mod metrics;
mod retry;
mod sink;
mod sleeper;
mod worker;

// Re-exports
pub use bounded_queue::{BoundedQueue, BoundedQueueConfig, OverflowStrategy};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, MonotonicClock};
pub use config::CoordinatorRuntimeSettings;
pub use coordinator::{start, CoordinatorConfig, CoordinatorHandle, CoordinatorHealth};
pub use dlq::{DLQRecord, DeadLetterQueue};
pub use error::{
    CircuitOpenError, ConfigError, QueueFullError, RetryExhausted, StartError, MAX_RETRY_FAILURES,
};
pub use feedback_bus::{
    BackpressureLevel, FeedbackBus, FeedbackEvent, FeedbackSubscriber, SubscriptionId,
};
pub use metrics::{CoordinatorMetrics, WriteOutcome};
pub use retry::{default_retry_classifier, BuildError, RetryPolicy, RetryPolicyBuilder};
pub use sink::Sink;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};

pub mod prelude;
