//! WriteCoordinator: the composition root (spec.md §4.5). Owns the queue, spawns N
//! `SinkWorker`s, runs the metrics sampler, and wires watermark crossings onto the
//! `FeedbackBus`.

use crate::bounded_queue::{BoundedQueue, BoundedQueueConfig, OverflowStrategy};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::dlq::DeadLetterQueue;
use crate::error::{QueueFullError, StartError};
use crate::feedback_bus::{BackpressureLevel, FeedbackBus, FeedbackEvent};
use crate::metrics::CoordinatorMetrics;
use crate::retry::RetryPolicy;
use crate::sink::Sink;
use crate::worker::{SinkWorker, StopSignal};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Named configuration accepted by [`WriteCoordinator::start`] (spec.md §4.5).
pub struct CoordinatorConfig<T, S: Sink<T>> {
    pub coordinator_id: String,
    pub sink: Arc<S>,
    pub sink_name: String,
    pub capacity: usize,
    pub workers: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub overflow: OverflowStrategy,
    pub retry_policy: RetryPolicy<S::Error>,
    pub circuit_breaker: Option<CircuitBreaker>,
    pub dlq_path: Option<String>,
    pub metrics_poll_interval: Duration,
    pub feedback_bus: Option<&'static FeedbackBus>,
    pub _marker: std::marker::PhantomData<T>,
}

impl<T, S: Sink<T>> CoordinatorConfig<T, S> {
    pub fn new(coordinator_id: impl Into<String>, sink: S) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            sink: Arc::new(sink),
            sink_name: "sink".to_string(),
            capacity: 10_000,
            workers: 4,
            batch_size: 100,
            flush_interval: Duration::from_millis(500),
            high_watermark: 8_000,
            low_watermark: 4_000,
            overflow: OverflowStrategy::Block,
            retry_policy: RetryPolicy::builder().build(),
            circuit_breaker: None,
            dlq_path: None,
            metrics_poll_interval: Duration::from_secs(5),
            feedback_bus: None,
            _marker: std::marker::PhantomData,
        }
    }
}

/// Point-in-time snapshot exposed to operators (spec.md §3, wire format in §6).
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorHealth {
    pub workers_alive: usize,
    pub queue_size: usize,
    pub capacity: usize,
    pub circuit_state: CircuitState,
}

/// Handle returned by [`WriteCoordinator::start`]. Scoped-resource lifecycle: drop performs
/// a best-effort fire-and-forget stop; prefer the explicit async [`CoordinatorHandle::stop`]
/// for a guaranteed drain.
pub struct CoordinatorHandle<T, S: Sink<T>> {
    coordinator_id: String,
    queue: Arc<BoundedQueue<T>>,
    _sink: Arc<S>,
    dlq: Option<Arc<DeadLetterQueue<T>>>,
    circuit_breaker: Option<CircuitBreaker>,
    metrics: Arc<CoordinatorMetrics>,
    workers_alive: Arc<AtomicUsize>,
    stop_tx: watch::Sender<StopSignal>,
    worker_handles: Vec<JoinHandle<()>>,
    sampler_handle: Option<JoinHandle<()>>,
    stopped: bool,
}

impl<T, S> CoordinatorHandle<T, S>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Sink<T> + 'static,
{
    /// Enqueue `item`. Only `QueueFullError` (error-mode overflow) is producer-visible
    /// (spec.md §7).
    pub async fn submit(&self, item: T) -> Result<(), QueueFullError> {
        self.queue.put(item).await
    }

    pub async fn submit_many(&self, items: impl IntoIterator<Item = T>) -> Result<(), QueueFullError> {
        for item in items {
            self.submit(item).await?;
        }
        Ok(())
    }

    pub fn health(&self) -> CoordinatorHealth {
        CoordinatorHealth {
            workers_alive: self.workers_alive.load(Ordering::SeqCst),
            queue_size: self.queue.len(),
            capacity: self.queue.capacity(),
            circuit_state: self.circuit_breaker.as_ref().map(|cb| cb.current_state()).unwrap_or(
                CircuitState::Closed,
            ),
        }
    }

    /// `drain=true`: workers finish draining the queue, bounded by `timeout`; any batch
    /// still in flight when the timeout elapses is abandoned to the DLQ as
    /// `"shutdown_timeout"`. `drain=false`: workers finish only their current batch;
    /// whatever remains queued is DLQ'd in a single record as `"shutdown_nodrain"`
    /// (spec.md §5).
    pub async fn stop(&mut self, drain: bool, timeout: Duration) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if !drain {
            let leftover = self.drain_remaining_items();
            let _ = self.stop_tx.send(StopSignal::Immediate);
            self.await_workers(timeout, "shutdown_timeout").await;
            if !leftover.is_empty() {
                self.dlq_bulk(leftover, "shutdown_nodrain").await;
            }
        } else {
            let _ = self.stop_tx.send(StopSignal::Drain);
            self.await_workers(timeout, "shutdown_timeout").await;
        }

        self.workers_alive.store(0, Ordering::SeqCst);
        self.metrics.set_workers_alive(0);
        if let Some(sampler) = self.sampler_handle.take() {
            sampler.abort();
        }
    }

    fn drain_remaining_items(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.queue.try_pop() {
            items.push(item);
        }
        items
    }

    async fn await_workers(&mut self, timeout: Duration, timeout_reason: &'static str) {
        let handles = std::mem::take(&mut self.worker_handles);
        let join_all = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, join_all).await.is_err() {
            tracing::warn!(coordinator_id = %self.coordinator_id, "worker shutdown timed out, abandoning in-flight work");
            let leftover = self.drain_remaining_items();
            if !leftover.is_empty() {
                self.dlq_bulk(leftover, timeout_reason).await;
            }
        }
    }

    async fn dlq_bulk(&self, items: Vec<T>, reason: &'static str) {
        let Some(dlq) = &self.dlq else { return };
        let mut metadata = HashMap::new();
        metadata.insert("coordinator_id".to_string(), self.coordinator_id.clone());
        metadata.insert("reason".to_string(), reason.to_string());
        match dlq.save(items, reason, metadata).await {
            Ok(()) => self.metrics.record_dlq_write(),
            Err(e) => tracing::error!(coordinator_id = %self.coordinator_id, error = %e, "dlq bulk write failed"),
        }
    }

    /// Expose the underlying Prometheus registry for HTTP scraping.
    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }
}

impl<T, S: Sink<T>> Drop for CoordinatorHandle<T, S> {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.stop_tx.send(StopSignal::Drain);
            for handle in &self.worker_handles {
                handle.abort();
            }
            if let Some(sampler) = self.sampler_handle.take() {
                sampler.abort();
            }
        }
    }
}

/// Entry point: validates configuration, wires the queue/workers/sampler, and returns a
/// [`CoordinatorHandle`].
pub async fn start<T, S>(
    config: CoordinatorConfig<T, S>,
) -> Result<CoordinatorHandle<T, S>, StartError>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Sink<T> + 'static,
{
    if config.workers == 0 {
        return Err(StartError::ZeroWorkers);
    }
    if config.batch_size == 0 {
        return Err(StartError::ZeroBatchSize);
    }

    let metrics = Arc::new(
        CoordinatorMetrics::new(
            Arc::new(prometheus::Registry::new()),
            config.coordinator_id.clone(),
            config.sink_name.clone(),
        )
        .expect("metric family names are fixed and registered exactly once per coordinator"),
    );

    let feedback_bus = config.feedback_bus.unwrap_or_else(FeedbackBus::global);
    let coordinator_id = config.coordinator_id.clone();
    let coordinator_id_high = coordinator_id.clone();
    let coordinator_id_low = coordinator_id.clone();

    let capacity = config.capacity;
    let dlq = config.dlq_path.clone().map(|path| Arc::new(DeadLetterQueue::<T>::new(path)));
    let dlq_for_drop = dlq.clone();
    let coordinator_id_drop = coordinator_id.clone();

    let mut queue_builder = BoundedQueue::new(BoundedQueueConfig {
        capacity,
        high_watermark: config.high_watermark,
        low_watermark: config.low_watermark,
        overflow: config.overflow,
    })?
    .on_high(move |size, cap| {
        let bus = feedback_bus;
        let event = FeedbackEvent::new(
            coordinator_id_high.clone(),
            size,
            cap,
            BackpressureLevel::Hard,
            Some("high_watermark".to_string()),
        );
        tokio::spawn(async move { bus.publish(event).await });
    })
    .on_low(move |size, cap| {
        let bus = feedback_bus;
        let event = FeedbackEvent::new(
            coordinator_id_low.clone(),
            size,
            cap,
            BackpressureLevel::Ok,
            Some("queue_recovered".to_string()),
        );
        tokio::spawn(async move { bus.publish(event).await });
    });

    if let Some(dlq) = dlq_for_drop {
        queue_builder = queue_builder.on_drop(move |item| {
            let dlq = dlq.clone();
            let coordinator_id = coordinator_id_drop.clone();
            tokio::spawn(async move {
                let mut metadata = HashMap::new();
                metadata.insert("coordinator_id".to_string(), coordinator_id);
                metadata.insert("reason".to_string(), "queue_overflow_drop".to_string());
                if let Err(e) = dlq.save(vec![item], "queue_overflow_drop", metadata).await {
                    tracing::error!(error = %e, "dlq write for dropped item failed");
                }
            });
        });
    }

    let queue = Arc::new(queue_builder);

    let retry_policy = Arc::new(config.retry_policy);
    let workers_alive = Arc::new(AtomicUsize::new(config.workers));
    let (stop_tx, stop_rx) = watch::channel(StopSignal::Running);

    let mut worker_handles = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        let worker = SinkWorker {
            worker_id,
            coordinator_id: config.coordinator_id.clone(),
            queue: queue.clone(),
            sink: config.sink.clone(),
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
            retry_policy: retry_policy.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
            dlq: dlq.clone(),
            metrics: metrics.clone(),
        };
        let workers_alive = workers_alive.clone();
        let rx = stop_rx.clone();
        let handle = tokio::spawn(async move {
            worker.run(rx).await;
            workers_alive.fetch_sub(1, Ordering::SeqCst);
        });
        worker_handles.push(handle);
    }

    let sampler_handle = spawn_metrics_sampler(
        coordinator_id.clone(),
        queue.clone(),
        config.circuit_breaker.clone(),
        metrics.clone(),
        workers_alive.clone(),
        config.metrics_poll_interval,
        feedback_bus,
    );

    Ok(CoordinatorHandle {
        coordinator_id,
        queue,
        _sink: config.sink,
        dlq,
        circuit_breaker: config.circuit_breaker,
        metrics,
        workers_alive,
        stop_tx,
        worker_handles,
        sampler_handle: Some(sampler_handle),
        stopped: false,
    })
}

/// Samples queue depth/worker liveness/circuit state on a fixed cadence, and republishes
/// `FeedbackEvent`s on `ok/soft/hard` level *transitions* (spec.md §4.5).
fn spawn_metrics_sampler<T>(
    coordinator_id: String,
    queue: Arc<BoundedQueue<T>>,
    circuit_breaker: Option<CircuitBreaker>,
    metrics: Arc<CoordinatorMetrics>,
    workers_alive: Arc<AtomicUsize>,
    poll_interval: Duration,
    feedback_bus: &'static FeedbackBus,
) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
{
    tokio::spawn(async move {
        // Seeded to `Ok` so the interval's immediate first tick never emits a spurious
        // startup event on a healthy, empty queue (spec.md §7: steady state is silent).
        let mut last_level = Some(BackpressureLevel::Ok);
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;

            let size = queue.len();
            let capacity = queue.capacity();
            metrics.set_queue_size(size);
            metrics.set_queue_capacity(capacity);
            metrics.set_workers_alive(workers_alive.load(Ordering::SeqCst));
            if let Some(cb) = &circuit_breaker {
                metrics.set_circuit_state(cb.current_state());
            }

            let level = classify(size, capacity);
            if last_level != Some(level) {
                last_level = Some(level);
                let event = FeedbackEvent::new(coordinator_id.clone(), size, capacity, level, None);
                feedback_bus.publish(event).await;
            }
        }
    })
}

fn classify(size: usize, capacity: usize) -> BackpressureLevel {
    if capacity == 0 {
        return BackpressureLevel::Ok;
    }
    let ratio = size as f64 / capacity as f64;
    if ratio >= 0.8 {
        BackpressureLevel::Hard
    } else if ratio >= 0.4 {
        BackpressureLevel::Soft
    } else {
        BackpressureLevel::Ok
    }
}
