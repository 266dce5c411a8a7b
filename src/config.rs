//! Runtime configuration loaded from the environment (spec.md §6's `COORDINATOR_*` keys).
//! Parse failures produce a [`ConfigError`], never a panic.

use crate::bounded_queue::OverflowStrategy;
use crate::error::ConfigError;
use std::time::Duration;

/// Mirrors `WriteCoordinator`'s named configuration, sourced from `COORDINATOR_*`
/// environment variables. Values left unset fall back to the same defaults as
/// constructing the coordinator programmatically.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorRuntimeSettings {
    pub capacity: usize,
    pub workers: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub overflow: OverflowStrategy,
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub cb_failure_threshold: usize,
    pub cb_half_open_after: Duration,
    pub dlq_path: Option<String>,
}

impl Default for CoordinatorRuntimeSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            workers: 4,
            batch_size: 100,
            flush_interval: Duration::from_millis(500),
            high_watermark: 8_000,
            low_watermark: 4_000,
            overflow: OverflowStrategy::Block,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            cb_failure_threshold: 5,
            cb_half_open_after: Duration::from_secs(30),
            dlq_path: None,
        }
    }
}

impl CoordinatorRuntimeSettings {
    /// Load from `std::env`, defaulting every key that is unset. A key that is set but
    /// fails to parse is a [`ConfigError`], not a panic.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_source(|key| std::env::var(key).ok())
    }

    /// Testable variant taking an explicit lookup function instead of `std::env::var`.
    pub fn from_env_source(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let capacity = parse_opt(&lookup, "COORDINATOR_CAPACITY", defaults.capacity)?;
        let workers = parse_opt(&lookup, "COORDINATOR_WORKERS", defaults.workers)?;
        let batch_size = parse_opt(&lookup, "COORDINATOR_BATCH_SIZE", defaults.batch_size)?;
        let flush_interval_ms =
            parse_opt(&lookup, "COORDINATOR_FLUSH_INTERVAL_MS", defaults.flush_interval.as_millis() as u64)?;
        let high_watermark = parse_opt(&lookup, "COORDINATOR_HIGH_WATERMARK", defaults.high_watermark)?;
        let low_watermark = parse_opt(&lookup, "COORDINATOR_LOW_WATERMARK", defaults.low_watermark)?;
        let overflow = match lookup("COORDINATOR_OVERFLOW") {
            None => defaults.overflow,
            Some(value) => match value.as_str() {
                "block" => OverflowStrategy::Block,
                "drop_oldest" => OverflowStrategy::DropOldest,
                "error" => OverflowStrategy::Error,
                _ => return Err(ConfigError::UnknownOverflowStrategy(value)),
            },
        };
        let max_attempts = parse_opt(&lookup, "COORDINATOR_MAX_ATTEMPTS", defaults.max_attempts)?;
        let initial_backoff_ms =
            parse_opt(&lookup, "COORDINATOR_INITIAL_BACKOFF_MS", defaults.initial_backoff_ms)?;
        let max_backoff_ms = parse_opt(&lookup, "COORDINATOR_MAX_BACKOFF_MS", defaults.max_backoff_ms)?;
        let backoff_multiplier =
            parse_opt(&lookup, "COORDINATOR_BACKOFF_MULTIPLIER", defaults.backoff_multiplier)?;
        let cb_failure_threshold =
            parse_opt(&lookup, "COORDINATOR_CB_FAILURE_THRESHOLD", defaults.cb_failure_threshold)?;
        let cb_half_open_after_sec = parse_opt(
            &lookup,
            "COORDINATOR_CB_HALF_OPEN_AFTER_SEC",
            defaults.cb_half_open_after.as_secs(),
        )?;
        let dlq_path = lookup("COORDINATOR_DLQ_PATH");

        Ok(Self {
            capacity,
            workers,
            batch_size,
            flush_interval: Duration::from_millis(flush_interval_ms),
            high_watermark,
            low_watermark,
            overflow,
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
            cb_failure_threshold,
            cb_half_open_after: Duration::from_secs(cb_half_open_after_sec),
            dlq_path,
        })
    }
}

fn parse_opt<F, V>(lookup: F, key: &'static str, default: V) -> Result<V, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    V: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => {
            value.parse().map_err(|_| ConfigError::InvalidValue { key, value })
        }
    }
}
