//! Prometheus `FeedbackSubscriber` for `write-coordinator` backpressure events.
//! Bring your own `prometheus::Registry`; metrics are registered once and updated per event.

use async_trait::async_trait;
use prometheus::{GaugeVec, IntCounterVec, Registry};
use std::sync::Arc;
use write_coordinator::{FeedbackEvent, FeedbackSubscriber};

#[derive(Clone, Debug)]
pub struct PrometheusFeedbackSink {
    registry: Arc<Registry>,
    events_total: IntCounterVec,
    utilization: GaugeVec,
}

impl PrometheusFeedbackSink {
    /// Create a sink and register its metric families into `registry`.
    ///
    /// # Errors
    /// Returns an error if a metric name collides with one already registered.
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let events_total = IntCounterVec::new(
            prometheus::Opts::new(
                "coord_feedback_events_total",
                "FeedbackBus events observed, by coordinator and level",
            ),
            &["coordinator_id", "level"],
        )?;
        let utilization = GaugeVec::new(
            prometheus::Opts::new(
                "coord_feedback_utilization",
                "queue_size / capacity at the last observed feedback event",
            ),
            &["coordinator_id"],
        )?;
        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(utilization.clone()))?;
        Ok(Self { registry, events_total, utilization })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[async_trait]
impl FeedbackSubscriber for PrometheusFeedbackSink {
    async fn on_event(&self, event: &FeedbackEvent) {
        self.events_total.with_label_values(&[&event.coordinator_id, event.level.as_str()]).inc();
        self.utilization.with_label_values(&[&event.coordinator_id]).set(event.utilization());
    }
}
