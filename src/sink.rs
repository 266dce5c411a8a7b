//! The write destination consumed by the core (spec.md §6).

use async_trait::async_trait;

/// Single operation: write a batch. On `Ok`, the batch is considered durable; on `Err`, not
/// written. Sinks MUST be safe to call concurrently from N workers; idempotence is not
/// required, since the core owns retries.
#[async_trait]
pub trait Sink<T>: Send + Sync {
    type Error: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static;

    async fn write(&self, batch: &[T]) -> Result<(), Self::Error>;
}
