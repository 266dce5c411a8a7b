use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use write_coordinator::{CircuitState, CoordinatorConfig, RetryPolicy, Sink};

/// Fails its first `fail_next` calls with a retryable error, then succeeds.
struct FlakySink {
    fail_next: AtomicUsize,
    calls: AtomicUsize,
    batches: Mutex<Vec<Vec<u32>>>,
}

#[async_trait]
impl Sink<u32> for FlakySink {
    type Error = String;

    async fn write(&self, batch: &[u32]) -> Result<(), Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err("socket timeout".to_string());
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

#[tokio::test]
async fn two_transient_failures_recover_on_the_third_attempt() {
    let mut config = CoordinatorConfig::new(
        "retry-coord",
        FlakySink { fail_next: AtomicUsize::new(2), calls: AtomicUsize::new(0), batches: Mutex::new(Vec::new()) },
    );
    config.capacity = 100;
    config.workers = 1;
    config.batch_size = 5;
    config.flush_interval = Duration::from_millis(20);
    config.retry_policy = RetryPolicy::builder()
        .max_attempts(5)
        .unwrap()
        .initial_backoff_ms(1)
        .max_backoff_ms(5)
        .jitter(false)
        .build();

    let sink = config.sink.clone();
    let mut handle = write_coordinator::start(config).await.unwrap();
    for v in 0..10u32 {
        handle.submit(v).await.unwrap();
    }

    handle.stop(true, Duration::from_secs(5)).await;

    let batches = sink.batches.lock().unwrap();
    assert_eq!(batches.len(), 2, "the two batches of 5 items each should both land");
    let total: usize = batches.iter().map(|b| b.len()).sum();
    assert_eq!(total, 10);

    let families = handle.metrics().registry().gather();
    let dlq_total: f64 = families
        .iter()
        .find(|f| f.name() == "coord_dlq_records_total")
        .map(|f| f.get_metric().iter().map(|m| m.get_counter().value()).sum())
        .unwrap_or(0.0);
    assert_eq!(dlq_total, 0.0);
    assert_eq!(handle.health().circuit_state, CircuitState::Closed);
}
