//! Convenient re-exports for common write-coordinator types.
pub use crate::{
    default_retry_classifier, BackpressureLevel, BoundedQueue, BoundedQueueConfig, CircuitBreaker,
    CircuitBreakerConfig, CircuitOpenError, CircuitState, ConfigError, CoordinatorConfig,
    CoordinatorHandle, CoordinatorHealth, CoordinatorMetrics, CoordinatorRuntimeSettings,
    DLQRecord, DeadLetterQueue, FeedbackBus, FeedbackEvent, FeedbackSubscriber, OverflowStrategy,
    QueueFullError, RetryExhausted, RetryPolicy, RetryPolicyBuilder, Sink, StartError,
    SubscriptionId, WriteOutcome,
};
