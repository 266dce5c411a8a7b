//! Error types for the coordinator and its component policies.

use std::time::Duration;

/// Cap the number of stored failures inside `RetryExhausted` to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Raised by [`crate::circuit_breaker::CircuitBreaker::allow`] while the breaker is open.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit breaker open ({failure_count} failures, open for {open_duration:?})")]
pub struct CircuitOpenError {
    pub failure_count: usize,
    pub open_duration: Duration,
}

/// Raised by [`crate::bounded_queue::BoundedQueue::put`] under `overflow = error` when the
/// queue is at capacity.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("queue full ({size}/{capacity})")]
pub struct QueueFullError {
    pub size: usize,
    pub capacity: usize,
}

/// Fatal configuration/invariant errors caught at `WriteCoordinator::start()`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StartError {
    #[error("capacity must be > 0")]
    ZeroCapacity,
    #[error("low_watermark ({low}) must be <= high_watermark ({high})")]
    WatermarkOrder { low: usize, high: usize },
    #[error("high_watermark ({high}) must be <= capacity ({capacity})")]
    HighWatermarkExceedsCapacity { high: usize, capacity: usize },
    #[error("workers must be >= 1")]
    ZeroWorkers,
    #[error("batch_size must be >= 1")]
    ZeroBatchSize,
}

/// Errors parsing a [`crate::config::CoordinatorRuntimeSettings`] from the environment.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown overflow strategy {0:?} (expected block|drop_oldest|error)")]
    UnknownOverflowStrategy(String),
}

/// Result of an exhausted [`crate::retry::RetryPolicy`] execution, carrying every absorbed
/// failure up to [`MAX_RETRY_FAILURES`].
#[derive(Debug, Clone)]
pub struct RetryExhausted<E> {
    pub attempts: usize,
    pub failures: Vec<E>,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = self.failures.last().map(|e| e.to_string()).unwrap_or_default();
        write!(
            f,
            "retry exhausted after {} attempts ({} recorded failures), last error: {}",
            self.attempts,
            self.failures.len(),
            last
        )
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryExhausted<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_error_display() {
        let err =
            CircuitOpenError { failure_count: 10, open_duration: Duration::from_secs(30) };
        let msg = format!("{err}");
        assert!(msg.contains("circuit breaker"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn queue_full_error_display() {
        let err = QueueFullError { size: 10, capacity: 10 };
        assert_eq!(err.to_string(), "queue full (10/10)");
    }

    #[test]
    fn retry_exhausted_display_includes_last_error() {
        let err = RetryExhausted { attempts: 3, failures: vec!["first", "last"] };
        let msg = format!("{err}");
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("last error: last"));
    }

    #[test]
    fn start_error_variants_display() {
        assert_eq!(StartError::ZeroCapacity.to_string(), "capacity must be > 0");
        assert_eq!(
            StartError::WatermarkOrder { low: 10, high: 5 }.to_string(),
            "low_watermark (10) must be <= high_watermark (5)"
        );
    }
}
