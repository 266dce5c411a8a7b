//! Bounded FIFO queue with high/low watermark hysteresis and a pluggable overflow strategy.
//!
//! Internal state (the item deque and the high-watermark latch) lives behind a single
//! mutex per spec.md §5; waiters are woken via `tokio::sync::Notify` rather than a channel,
//! since `drop_oldest` needs head removal that `mpsc` cannot offer.

use crate::error::QueueFullError;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Suspend the producer until space is available.
    Block,
    /// Evict the head, invoke `on_drop(head)`, then enqueue.
    DropOldest,
    /// Fail immediately with `QueueFullError`.
    Error,
}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;
type EdgeCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

pub struct BoundedQueueConfig {
    pub capacity: usize,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub overflow: OverflowStrategy,
}

impl BoundedQueueConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            high_watermark: (capacity * 4 / 5).max(1),
            low_watermark: (capacity / 2).max(1),
            overflow: OverflowStrategy::Block,
        }
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    high_latched: bool,
}

/// Ordered FIFO of items with capacity, high/low watermarks, overflow strategy, and
/// watermark-crossing callbacks (spec.md §4.3).
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
    high_watermark: usize,
    low_watermark: usize,
    overflow: OverflowStrategy,
    on_high: Option<EdgeCallback>,
    on_low: Option<EdgeCallback>,
    on_drop: Option<Callback<T>>,
}

impl<T: Send + 'static> BoundedQueue<T> {
    pub fn new(config: BoundedQueueConfig) -> Result<Self, crate::error::StartError> {
        use crate::error::StartError;
        if config.capacity == 0 {
            return Err(StartError::ZeroCapacity);
        }
        if config.low_watermark > config.high_watermark {
            return Err(StartError::WatermarkOrder {
                low: config.low_watermark,
                high: config.high_watermark,
            });
        }
        if config.high_watermark > config.capacity {
            return Err(StartError::HighWatermarkExceedsCapacity {
                high: config.high_watermark,
                capacity: config.capacity,
            });
        }
        Ok(Self {
            inner: Mutex::new(Inner { items: VecDeque::with_capacity(config.capacity), high_latched: false }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity: config.capacity,
            high_watermark: config.high_watermark,
            low_watermark: config.low_watermark,
            overflow: config.overflow,
            on_high: None,
            on_low: None,
            on_drop: None,
        })
    }

    pub fn on_high<F: Fn(usize, usize) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_high = Some(Arc::new(f));
        self
    }

    pub fn on_low<F: Fn(usize, usize) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_low = Some(Arc::new(f));
        self
    }

    pub fn on_drop<F: Fn(T) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_drop = Some(Arc::new(f));
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue `item` per the configured overflow strategy (spec.md §4.3).
    pub async fn put(&self, item: T) -> Result<(), QueueFullError> {
        match self.overflow {
            OverflowStrategy::Error => {
                let new_len = {
                    let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
                    if guard.items.len() >= self.capacity {
                        return Err(QueueFullError { size: guard.items.len(), capacity: self.capacity });
                    }
                    guard.items.push_back(item);
                    guard.items.len()
                };
                self.not_empty.notify_one();
                self.maybe_signal_high(new_len);
                Ok(())
            }
            OverflowStrategy::DropOldest => {
                let (dropped, new_len) = {
                    let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
                    let dropped = if guard.items.len() >= self.capacity { guard.items.pop_front() } else { None };
                    guard.items.push_back(item);
                    (dropped, guard.items.len())
                };
                self.not_empty.notify_one();
                self.maybe_signal_high(new_len);
                if let Some(dropped) = dropped {
                    self.invoke_on_drop(dropped);
                }
                Ok(())
            }
            OverflowStrategy::Block => {
                let item = item;
                loop {
                    let notified = self.not_full.notified();
                    let new_len = {
                        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
                        if guard.items.len() >= self.capacity {
                            None
                        } else {
                            guard.items.push_back(item);
                            Some(guard.items.len())
                        }
                    };
                    match new_len {
                        Some(new_len) => {
                            self.not_empty.notify_one();
                            self.maybe_signal_high(new_len);
                            return Ok(());
                        }
                        None => notified.await,
                    }
                }
            }
        }
    }

    /// Dequeue the head, waiting for an item if the queue is currently empty.
    pub async fn get(&self) -> T {
        loop {
            let notified = self.not_empty.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Non-blocking dequeue: `None` if the queue is currently empty.
    pub fn try_pop(&self) -> Option<T> {
        let (item, fire_low, new_len) = {
            let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            let item = guard.items.pop_front()?;
            let new_len = guard.items.len();
            let fire_low = guard.high_latched && new_len <= self.low_watermark;
            if fire_low {
                guard.high_latched = false;
            }
            (item, fire_low, new_len)
        };
        self.not_full.notify_one();
        if fire_low {
            self.invoke_on_low(new_len);
        }
        Some(item)
    }

    fn maybe_signal_high(&self, new_len: usize) {
        let should_fire = {
            let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if !guard.high_latched && new_len >= self.high_watermark {
                guard.high_latched = true;
                true
            } else {
                false
            }
        };
        if should_fire {
            if let Some(cb) = &self.on_high {
                let cb = cb.clone();
                let capacity = self.capacity;
                if catch_unwind(AssertUnwindSafe(|| cb(new_len, capacity))).is_err() {
                    tracing::warn!("bounded_queue: on_high callback panicked");
                }
            }
        }
    }

    fn invoke_on_low(&self, new_len: usize) {
        if let Some(cb) = &self.on_low {
            let cb = cb.clone();
            let capacity = self.capacity;
            if catch_unwind(AssertUnwindSafe(|| cb(new_len, capacity))).is_err() {
                tracing::warn!("bounded_queue: on_low callback panicked");
            }
        }
    }

    fn invoke_on_drop(&self, item: T) {
        if let Some(cb) = &self.on_drop {
            let cb = cb.clone();
            if catch_unwind(AssertUnwindSafe(move || cb(item))).is_err() {
                tracing::warn!("bounded_queue: on_drop callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue(capacity: usize, high: usize, low: usize, overflow: OverflowStrategy) -> BoundedQueue<i32> {
        BoundedQueue::new(BoundedQueueConfig { capacity, high_watermark: high, low_watermark: low, overflow })
            .unwrap()
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let q = queue(10, 8, 4, OverflowStrategy::Block);
        for i in 0..5 {
            q.put(i).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.get().await, i);
        }
    }

    #[tokio::test]
    async fn size_never_exceeds_capacity() {
        let q = queue(3, 3, 1, OverflowStrategy::Error);
        q.put(1).await.unwrap();
        q.put(2).await.unwrap();
        q.put(3).await.unwrap();
        assert_eq!(q.len(), 3);
        assert!(q.put(4).await.is_err());
        assert_eq!(q.len(), 3);
    }

    #[tokio::test]
    async fn watermark_hysteresis_fires_once_per_edge() {
        let high_count = Arc::new(AtomicUsize::new(0));
        let low_count = Arc::new(AtomicUsize::new(0));
        let h = high_count.clone();
        let l = low_count.clone();

        let q = BoundedQueue::new(BoundedQueueConfig {
            capacity: 10,
            high_watermark: 8,
            low_watermark: 4,
            overflow: OverflowStrategy::Block,
        })
        .unwrap()
        .on_high(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .on_low(move |_, _| {
            l.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..8 {
            q.put(i).await.unwrap();
        }
        assert_eq!(high_count.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            q.get().await;
        }
        assert_eq!(q.len(), 3);
        assert_eq!(low_count.load(Ordering::SeqCst), 1);

        for i in 100..104 {
            q.put(i).await.unwrap();
        }
        assert_eq!(q.len(), 7);
        assert_eq!(high_count.load(Ordering::SeqCst), 1, "below high watermark, no refire");

        q.put(999).await.unwrap();
        assert_eq!(q.len(), 8);
        assert_eq!(high_count.load(Ordering::SeqCst), 2, "crossed high watermark again");
    }

    #[tokio::test]
    async fn drop_oldest_evicts_head_and_preserves_order() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let d = dropped.clone();

        let q = BoundedQueue::new(BoundedQueueConfig {
            capacity: 5,
            high_watermark: 5,
            low_watermark: 2,
            overflow: OverflowStrategy::DropOldest,
        })
        .unwrap()
        .on_drop(move |item| {
            d.lock().unwrap().push(item);
        });

        for i in 0..5 {
            q.put(i).await.unwrap();
        }
        q.put(99).await.unwrap();

        assert_eq!(*dropped.lock().unwrap(), vec![0]);

        let mut drained = Vec::new();
        while let Some(item) = q.try_pop() {
            drained.push(item);
        }
        assert_eq!(drained, vec![1, 2, 3, 4, 99]);
    }

    #[tokio::test]
    async fn error_strategy_rejects_when_full() {
        let q = queue(2, 2, 1, OverflowStrategy::Error);
        q.put(1).await.unwrap();
        q.put(2).await.unwrap();
        let err = q.put(3).await.unwrap_err();
        assert_eq!(err.size, 2);
        assert_eq!(err.capacity, 2);
    }

    #[tokio::test]
    async fn block_strategy_waits_for_space() {
        let q = Arc::new(queue(1, 1, 1, OverflowStrategy::Block));
        q.put(1).await.unwrap();

        let q2 = q.clone();
        let handle = tokio::spawn(async move {
            q2.put(2).await.unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "producer should be blocked while queue is full");

        assert_eq!(q.get().await, 1);
        handle.await.unwrap();
        assert_eq!(q.get().await, 2);
    }

    #[tokio::test]
    async fn degenerate_capacity_one_works() {
        let q = queue(1, 1, 1, OverflowStrategy::Error);
        q.put(42).await.unwrap();
        assert!(q.put(43).await.is_err());
        assert_eq!(q.get().await, 42);
    }

    #[test]
    fn rejects_invalid_watermark_order() {
        let err = BoundedQueue::<i32>::new(BoundedQueueConfig {
            capacity: 10,
            high_watermark: 2,
            low_watermark: 5,
            overflow: OverflowStrategy::Block,
        })
        .unwrap_err();
        assert_eq!(err, crate::error::StartError::WatermarkOrder { low: 5, high: 2 });
    }
}
