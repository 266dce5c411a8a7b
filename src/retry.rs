//! Retry policy: backoff schedule, jitter, and retryable-error classification.
//!
//! The policy is a pure value — stateless and safely shared across workers via `Clone`
//! (the `should_retry` predicate and `sleeper` are held behind `Arc`). It does not drive
//! an operation itself; `SinkWorker` interleaves `next_backoff_ms`/`is_retryable` with its
//! own circuit-breaker checks per `spec.md` §4.4.

use crate::sleeper::{Sleeper, TokioSleeper};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Substrings recognized by [`default_retry_classifier`], matched case-insensitively
/// against the error's `Display` output.
const DEFAULT_RETRYABLE_SIGNATURES: &[&str] = &[
    "timeout",
    "temporarily unavailable",
    "busy",
    "serialization failure",
    "deadlock detected",
    "connection reset",
    "socket timeout",
    "please retry",
];

/// Default retryable-error classifier: case-insensitive substring match against a
/// fixed list of transient-failure signatures.
pub fn default_retry_classifier<E: std::fmt::Display>(error: &E) -> bool {
    let text = error.to_string().to_lowercase();
    DEFAULT_RETRYABLE_SIGNATURES.iter().any(|sig| text.contains(sig))
}

#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: usize,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter: bool,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Whether `error` should be retried, per the configured classifier.
    pub fn is_retryable(&self, error: &E) -> bool {
        (self.should_retry)(error)
    }

    /// `min(initial * multiplier^(attempt-1), max)`, 1-indexed. With jitter enabled, the
    /// result is multiplied by a uniform random factor in `[0.5, 1.0]` (spec.md §4.1);
    /// deterministic and monotonic non-decreasing without jitter.
    pub fn next_backoff_ms(&self, attempt: usize) -> u64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = (self.initial_backoff_ms as f64) * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            (capped * factor).round() as u64
        } else {
            capped.round() as u64
        }
    }

    /// Sleep the computed backoff for `attempt` using the configured sleeper.
    pub async fn sleep_backoff(&self, attempt: usize) {
        self.sleeper.sleep(Duration::from_millis(self.next_backoff_ms(attempt))).await;
    }
}

pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter: bool,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("backoff_multiplier must be > 1.0 (got {0})")]
    InvalidMultiplier(String),
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::fmt::Display + 'static,
{
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            should_retry: Arc::new(default_retry_classifier),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Result<Self, BuildError> {
        if multiplier <= 1.0 {
            return Err(BuildError::InvalidMultiplier(multiplier.to_string()));
        }
        self.backoff_multiplier = multiplier;
        Ok(self)
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::fmt::Display + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
