//! SinkWorker: the batch-assembly-then-commit loop run by each of the coordinator's
//! concurrent worker tasks (spec.md §4.4).

use crate::bounded_queue::BoundedQueue;
use crate::circuit_breaker::CircuitBreaker;
use crate::dlq::DeadLetterQueue;
use crate::error::{RetryExhausted, MAX_RETRY_FAILURES};
use crate::metrics::{CoordinatorMetrics, WriteOutcome};
use crate::retry::RetryPolicy;
use crate::sink::Sink;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep_until;

/// Requested stop behavior, observed by the worker via `tokio::sync::watch` (spec.md §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Running,
    /// Keep assembling/committing batches until the queue is empty, then exit.
    Drain,
    /// Finish whatever batch is currently assembled (if any) and exit without pulling more.
    Immediate,
}

pub struct SinkWorker<T, S: Sink<T>> {
    pub worker_id: usize,
    pub coordinator_id: String,
    pub queue: Arc<BoundedQueue<T>>,
    pub sink: Arc<S>,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_policy: Arc<RetryPolicy<S::Error>>,
    pub circuit_breaker: Option<CircuitBreaker>,
    pub dlq: Option<Arc<DeadLetterQueue<T>>>,
    pub metrics: Arc<CoordinatorMetrics>,
}

impl<T, S> SinkWorker<T, S>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Sink<T> + 'static,
{
    pub(crate) async fn run(self, mut stop_rx: watch::Receiver<StopSignal>) {
        tracing::debug!(worker_id = self.worker_id, "sink worker started");
        loop {
            match self.assemble_batch(&mut stop_rx).await {
                Some(batch) => self.commit(batch).await,
                None => break,
            }
        }
        tracing::info!(worker_id = self.worker_id, "sink worker stopped");
    }

    /// Step 1-4 of spec.md §4.4: pull items until `batch_size` is reached or
    /// `flush_interval` elapses since the first item of this batch was appended. Returns
    /// `None` only once a stop signal is observed and there is truly nothing left to commit.
    async fn assemble_batch(&self, stop_rx: &mut watch::Receiver<StopSignal>) -> Option<Vec<T>> {
        let mut batch: Vec<T> = Vec::with_capacity(self.batch_size);
        let mut deadline: Option<Instant> = None;

        loop {
            match *stop_rx.borrow() {
                StopSignal::Immediate => {
                    return if batch.is_empty() { None } else { Some(batch) };
                }
                StopSignal::Drain => match self.queue.try_pop() {
                    Some(item) => {
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + self.flush_interval);
                        }
                        batch.push(item);
                        if batch.len() >= self.batch_size {
                            return Some(batch);
                        }
                        continue;
                    }
                    None => {
                        return if batch.is_empty() { None } else { Some(batch) };
                    }
                },
                StopSignal::Running => {
                    let sleeping = async {
                        match deadline {
                            Some(d) => sleep_until(d.into()).await,
                            None => std::future::pending::<()>().await,
                        }
                    };

                    tokio::select! {
                        item = self.queue.get() => {
                            if deadline.is_none() {
                                deadline = Some(Instant::now() + self.flush_interval);
                            }
                            batch.push(item);
                            if batch.len() >= self.batch_size {
                                return Some(batch);
                            }
                        }
                        _ = sleeping => {
                            if !batch.is_empty() {
                                return Some(batch);
                            }
                            deadline = None;
                        }
                        _ = stop_rx.changed() => {
                            // re-check the new state at the top of the loop
                        }
                    }
                }
            }
        }
    }

    /// Step 5 of spec.md §4.4: circuit-interleaved retry loop, then terminal handling.
    async fn commit(&self, batch: Vec<T>) {
        if let Some(cb) = &self.circuit_breaker {
            if cb.allow().is_err() {
                self.metrics.record_batch_write(WriteOutcome::CircuitOpen, Duration::ZERO);
                self.terminal_failure(batch, "circuit breaker open".to_string()).await;
                return;
            }
        }

        let max_attempts = self.retry_policy.max_attempts();
        let mut failures: Vec<S::Error> = Vec::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                if let Some(cb) = &self.circuit_breaker {
                    if let Err(e) = cb.allow() {
                        self.metrics.record_batch_write(WriteOutcome::CircuitOpen, Duration::ZERO);
                        self.terminal_failure(batch, e.to_string()).await;
                        return;
                    }
                }
            }

            let start = Instant::now();
            match self.sink.write(&batch).await {
                Ok(()) => {
                    if let Some(cb) = &self.circuit_breaker {
                        cb.on_success();
                    }
                    self.metrics.record_batch_write(WriteOutcome::Success, start.elapsed());
                    return;
                }
                Err(error) => {
                    if let Some(cb) = &self.circuit_breaker {
                        cb.on_failure();
                    }
                    let retryable = self.retry_policy.is_retryable(&error);
                    if failures.len() < MAX_RETRY_FAILURES {
                        failures.push(error);
                    }

                    if retryable && attempt < max_attempts {
                        self.metrics.record_batch_write(WriteOutcome::Retry, start.elapsed());
                        self.retry_policy.sleep_backoff(attempt).await;
                        continue;
                    }
                    self.metrics.record_batch_write(WriteOutcome::Failure, start.elapsed());
                    break;
                }
            }
        }

        let exhausted = RetryExhausted { attempts: max_attempts, failures };
        self.terminal_failure(batch, exhausted.to_string()).await;
    }

    /// 5d: persist to the DLQ without raising; the worker loop always continues.
    async fn terminal_failure(&self, batch: Vec<T>, error: String) {
        let Some(dlq) = &self.dlq else {
            tracing::warn!(worker_id = self.worker_id, %error, "batch dropped: no dlq configured");
            return;
        };

        let mut metadata = HashMap::new();
        metadata.insert("worker_id".to_string(), self.worker_id.to_string());
        metadata.insert("coordinator_id".to_string(), self.coordinator_id.clone());

        match dlq.save(batch, error, metadata).await {
            Ok(()) => self.metrics.record_dlq_write(),
            Err(e) => tracing::error!(worker_id = self.worker_id, error = %e, "dlq write failed"),
        }
    }
}
