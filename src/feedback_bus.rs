//! Process-wide pub/sub of backpressure events (spec.md §4.6).
//!
//! Grounded in the fan-out/error-isolation shape of the teacher's `telemetry::sinks`
//! multicast sink, adapted from a `tower::Service<PolicyEvent>` bound to a plain
//! `FeedbackSubscriber` trait — the core crate carries no `tower` dependency.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// `{ok, soft, hard}`. Wire values are the lowercase strings; this contract MUST NOT change
/// (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureLevel {
    Ok,
    Soft,
    Hard,
}

impl BackpressureLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            BackpressureLevel::Ok => "ok",
            BackpressureLevel::Soft => "soft",
            BackpressureLevel::Hard => "hard",
        }
    }
}

/// Immutable backpressure notification (spec.md §3, wire format in §6).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeedbackEvent {
    pub coordinator_id: String,
    pub queue_size: usize,
    pub capacity: usize,
    pub level: BackpressureLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub source: String,
    pub ts: f64,
}

impl FeedbackEvent {
    pub fn new(
        coordinator_id: impl Into<String>,
        queue_size: usize,
        capacity: usize,
        level: BackpressureLevel,
        reason: Option<String>,
    ) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            queue_size,
            capacity,
            level,
            reason,
            source: "store".to_string(),
            ts: now_seconds(),
        }
    }

    /// `queue_size / capacity`, `0.0` if capacity is somehow zero.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.queue_size as f64 / self.capacity as f64
        }
    }
}

fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Implemented by anything that wants `FeedbackEvent`s. Invoked from whichever task calls
/// `FeedbackBus::publish` (producer or metrics sampler) — must not block indefinitely.
#[async_trait]
pub trait FeedbackSubscriber: Send + Sync {
    async fn on_event(&self, event: &FeedbackEvent);
}

/// Opaque subscription handle returned by [`FeedbackBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    subscriber: Arc<dyn FeedbackSubscriber>,
}

/// In-process fan-out of [`FeedbackEvent`]s with per-subscriber error isolation
/// (spec.md §4.6). `subscribe`/`unsubscribe` are idempotent by identity of the returned
/// handle; `publish` takes a snapshot under the lock, then invokes subscribers with the
/// lock released.
pub struct FeedbackBus {
    subscribers: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Default for FeedbackBus {
    fn default() -> Self {
        Self { subscribers: Mutex::new(Vec::new()), next_id: AtomicU64::new(1) }
    }
}

impl FeedbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide default bus (spec.md §3: "FeedbackBus outlives any single
    /// coordinator"). Lazily initialised on first access; there is no teardown.
    pub fn global() -> &'static FeedbackBus {
        static INSTANCE: OnceLock<FeedbackBus> = OnceLock::new();
        INSTANCE.get_or_init(FeedbackBus::default)
    }

    /// Register `subscriber`, returning a handle for later `unsubscribe`. Always adds a new
    /// entry — idempotence is keyed on the returned handle, not on subscriber identity,
    /// since subscribers are type-erased trait objects with no natural equality.
    pub fn subscribe(&self, subscriber: Arc<dyn FeedbackSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner()).push(Subscription { id, subscriber });
        id
    }

    /// Remove a subscription. A no-op if `id` is not currently subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner()).retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Deliver `event` to every current subscriber. Best-effort fire-and-forget: no
    /// buffering, no retry, no ordering guarantee relative to other publishers. A panicking
    /// subscriber is isolated and logged; it does not stop delivery to the rest.
    pub async fn publish(&self, event: FeedbackEvent) {
        let snapshot: Vec<Arc<dyn FeedbackSubscriber>> = {
            let guard = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
            guard.iter().map(|s| s.subscriber.clone()).collect()
        };

        for subscriber in snapshot {
            let event_ref = &event;
            let result = AssertUnwindSafe(subscriber.on_event(event_ref)).catch_unwind().await;
            if result.is_err() {
                tracing::warn!("feedback_bus: subscriber panicked while handling event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        events: Mutex<Vec<FeedbackEvent>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self { events: Mutex::new(Vec::new()) })
        }

        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FeedbackSubscriber for Recorder {
        async fn on_event(&self, event: &FeedbackEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct Panicker;

    #[async_trait]
    impl FeedbackSubscriber for Panicker {
        async fn on_event(&self, _event: &FeedbackEvent) {
            panic!("boom");
        }
    }

    fn sample_event(level: BackpressureLevel) -> FeedbackEvent {
        FeedbackEvent::new("bars-coord", 850, 1000, level, Some("high_watermark".into()))
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = FeedbackBus::new();
        let r1 = Recorder::new();
        let r2 = Recorder::new();
        bus.subscribe(r1.clone());
        bus.subscribe(r2.clone());

        bus.publish(sample_event(BackpressureLevel::Hard)).await;

        assert_eq!(r1.count(), 1);
        assert_eq!(r2.count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = FeedbackBus::new();
        let r1 = Recorder::new();
        let id = bus.subscribe(r1.clone());
        bus.unsubscribe(id);

        bus.publish(sample_event(BackpressureLevel::Ok)).await;
        assert_eq!(r1.count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_is_noop() {
        let bus = FeedbackBus::new();
        bus.unsubscribe(SubscriptionId(9999));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn one_panicking_subscriber_does_not_starve_others() {
        let bus = FeedbackBus::new();
        let ok_subscriber = Recorder::new();
        bus.subscribe(Arc::new(Panicker));
        bus.subscribe(ok_subscriber.clone());

        bus.publish(sample_event(BackpressureLevel::Soft)).await;

        assert_eq!(ok_subscriber.count(), 1);
    }

    #[tokio::test]
    async fn publish_is_a_noop_with_no_subscribers() {
        let bus = FeedbackBus::new();
        bus.publish(sample_event(BackpressureLevel::Ok)).await;
    }

    #[test]
    fn utilization_is_zero_when_capacity_is_zero() {
        let event = FeedbackEvent { capacity: 0, ..sample_event(BackpressureLevel::Ok) };
        assert_eq!(event.utilization(), 0.0);
    }

    #[test]
    fn utilization_matches_ratio() {
        let event = sample_event(BackpressureLevel::Hard);
        assert!((event.utilization() - 0.85).abs() < 1e-9);
    }

    #[test]
    fn level_wire_values_are_lowercase() {
        assert_eq!(serde_json::to_string(&BackpressureLevel::Hard).unwrap(), "\"hard\"");
        assert_eq!(serde_json::to_string(&BackpressureLevel::Soft).unwrap(), "\"soft\"");
        assert_eq!(serde_json::to_string(&BackpressureLevel::Ok).unwrap(), "\"ok\"");
    }

    #[tokio::test]
    async fn global_bus_is_a_shared_singleton() {
        let recorder = Recorder::new();
        FeedbackBus::global().subscribe(recorder.clone());
        FeedbackBus::global().publish(sample_event(BackpressureLevel::Ok)).await;
        assert!(recorder.count() >= 1);
    }
}
