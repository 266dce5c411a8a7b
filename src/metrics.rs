//! Prometheus metrics matching the fixed names in spec.md §6, registered directly by the
//! core crate since the contract treats them as mandatory, not an optional sink plugin.
//! Grounded in the teacher's `ninelives-prometheus` registration style (`IntCounterVec`
//! family registered once, labelled per call).

use crate::circuit_breaker::CircuitState;
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;

/// Outcome label for `coord_batch_write_total` / `coord_batch_write_duration_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    Failure,
    CircuitOpen,
    Retry,
}

impl WriteOutcome {
    fn as_str(self) -> &'static str {
        match self {
            WriteOutcome::Success => "success",
            WriteOutcome::Failure => "failure",
            WriteOutcome::CircuitOpen => "circuit_open",
            WriteOutcome::Retry => "retry",
        }
    }
}

/// Registers and updates the coordinator's Prometheus metric family. One instance per
/// `WriteCoordinator`; bring your own `Registry` (falls back to a fresh one).
#[derive(Clone)]
pub struct CoordinatorMetrics {
    coordinator_id: String,
    sink_name: String,
    registry: Arc<Registry>,
    queue_size: IntGaugeVec,
    queue_capacity: IntGaugeVec,
    workers_alive: IntGaugeVec,
    circuit_state: IntGaugeVec,
    batch_write_duration: HistogramVec,
    batch_write_total: IntCounterVec,
    dlq_records_total: IntCounterVec,
}

impl CoordinatorMetrics {
    pub fn new(
        registry: Arc<Registry>,
        coordinator_id: impl Into<String>,
        sink_name: impl Into<String>,
    ) -> Result<Self, prometheus::Error> {
        let queue_size =
            IntGaugeVec::new(Opts::new("coord_queue_size", "Current queue depth"), &["coordinator_id"])?;
        let queue_capacity = IntGaugeVec::new(
            Opts::new("coord_queue_capacity", "Configured queue capacity"),
            &["coordinator_id"],
        )?;
        let workers_alive = IntGaugeVec::new(
            Opts::new("coord_workers_alive", "Number of live worker tasks"),
            &["coordinator_id"],
        )?;
        let circuit_state = IntGaugeVec::new(
            Opts::new("coord_circuit_state", "0=closed, 1=half_open, 2=open"),
            &["coordinator_id"],
        )?;
        let batch_write_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "coord_batch_write_duration_seconds",
                "Sink write latency per batch",
            ),
            &["sink", "outcome"],
        )?;
        let batch_write_total = IntCounterVec::new(
            Opts::new("coord_batch_write_total", "Batch write attempts by outcome"),
            &["sink", "outcome"],
        )?;
        let dlq_records_total = IntCounterVec::new(
            Opts::new("coord_dlq_records_total", "Records persisted to the dead letter queue"),
            &["coordinator_id"],
        )?;

        registry.register(Box::new(queue_size.clone()))?;
        registry.register(Box::new(queue_capacity.clone()))?;
        registry.register(Box::new(workers_alive.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;
        registry.register(Box::new(batch_write_duration.clone()))?;
        registry.register(Box::new(batch_write_total.clone()))?;
        registry.register(Box::new(dlq_records_total.clone()))?;

        Ok(Self {
            coordinator_id: coordinator_id.into(),
            sink_name: sink_name.into(),
            registry,
            queue_size,
            queue_capacity,
            workers_alive,
            circuit_state,
            batch_write_duration,
            batch_write_total,
            dlq_records_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.with_label_values(&[&self.coordinator_id]).set(size as i64);
    }

    pub fn set_queue_capacity(&self, capacity: usize) {
        self.queue_capacity.with_label_values(&[&self.coordinator_id]).set(capacity as i64);
    }

    pub fn set_workers_alive(&self, count: usize) {
        self.workers_alive.with_label_values(&[&self.coordinator_id]).set(count as i64);
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        self.circuit_state.with_label_values(&[&self.coordinator_id]).set(state.as_metric_value());
    }

    pub fn record_batch_write(&self, outcome: WriteOutcome, duration: Duration) {
        let labels = &[self.sink_name.as_str(), outcome.as_str()];
        self.batch_write_duration.with_label_values(labels).observe(duration.as_secs_f64());
        self.batch_write_total.with_label_values(labels).inc();
    }

    pub fn record_dlq_write(&self) {
        self.dlq_records_total.with_label_values(&[&self.coordinator_id]).inc();
    }
}
