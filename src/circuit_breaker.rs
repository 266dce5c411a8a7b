//! Circuit breaker: closed/open/half-open guard around sink writes, lock-free via atomics.

use crate::clock::{Clock, MonotonicClock};
use crate::error::CircuitOpenError;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// `{closed, open, half_open}` with the auxiliary fields from `spec.md` §3 exposed via
/// [`CircuitBreaker::consecutive_failures`]/[`CircuitBreaker::opened_at_millis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Metrics encoding for `coord_circuit_state` (spec.md §6: 0=closed, 1=half_open, 2=open).
    pub fn as_metric_value(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub half_open_after: Duration,
    pub half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            half_open_after: Duration::from_secs(0),
            half_open_max_calls: usize::MAX,
        }
    }
}

struct State {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

/// Tracks consecutive failures and blocks writes while open; admits exactly one probe per
/// `half_open_after` window while half-open (spec.md §4.2). Operations are atomic under
/// concurrent worker access — no mutex, no blocking.
#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<State>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, half_open_after: Duration) -> Self {
        Self::with_config(CircuitBreakerConfig {
            failure_threshold,
            half_open_after,
            half_open_max_calls: 1,
        })
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(State {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_half_open_limit(mut self, limit: usize) -> Self {
        self.config.half_open_max_calls = limit;
        self
    }

    /// Current state snapshot, for [`crate::coordinator::CoordinatorHealth`].
    pub fn current_state(&self) -> CircuitState {
        match self.state.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.state.failure_count.load(Ordering::Acquire)
    }

    /// Whether a write may proceed. Lazily transitions `open` → `half_open` once
    /// `half_open_after` has elapsed, admitting exactly one probe caller through (the
    /// caller that wins the CAS); others are rejected with [`CircuitOpenError`] until the
    /// probe resolves.
    pub fn allow(&self) -> Result<(), CircuitOpenError> {
        loop {
            let current = self.state.state.load(Ordering::Acquire);
            match current {
                STATE_CLOSED => return Ok(()),
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.now_millis().saturating_sub(opened_at);
                    if elapsed < self.config.half_open_after.as_millis() as u64 {
                        return Err(CircuitOpenError {
                            failure_count: self.consecutive_failures(),
                            open_duration: Duration::from_millis(elapsed),
                        });
                    }
                    match self.state.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            tracing::info!("circuit breaker: open -> half_open");
                            self.state.half_open_calls.store(0, Ordering::Release);
                            continue;
                        }
                        Err(_) => continue,
                    }
                }
                STATE_HALF_OPEN => {
                    let admitted = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if admitted >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(CircuitOpenError {
                            failure_count: self.consecutive_failures(),
                            open_duration: Duration::from_millis(0),
                        });
                    }
                    return Ok(());
                }
                _ => unreachable!("invalid circuit breaker state"),
            }
        }
    }

    /// `closed` resets the failure counter to 0; `half_open` closes the breaker and resets
    /// the counter (spec.md §4.2).
    pub fn on_success(&self) {
        match self.state.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("circuit breaker: half_open -> closed");
                }
            }
            STATE_CLOSED => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    /// `closed` increments the counter, opening once it reaches `failure_threshold`;
    /// `half_open` reopens immediately with a fresh `opened_at` (spec.md §4.2).
    pub fn on_failure(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "circuit breaker: probe failed, half_open -> open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold
                    && self
                        .state
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::error!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker: closed -> open"
                    );
                }
            }
            _ => {}
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}
