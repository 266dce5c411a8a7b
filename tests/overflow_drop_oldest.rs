use std::sync::{Arc, Mutex};
use write_coordinator::{BoundedQueue, BoundedQueueConfig, OverflowStrategy};

#[tokio::test]
async fn drop_oldest_evicts_the_head_and_keeps_fifo_order() {
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let dropped_cb = dropped.clone();

    let queue = BoundedQueue::new(BoundedQueueConfig {
        capacity: 5,
        high_watermark: 5,
        low_watermark: 2,
        overflow: OverflowStrategy::DropOldest,
    })
    .unwrap()
    .on_drop(move |item: u32| {
        dropped_cb.lock().unwrap().push(item);
    });

    for i in 0..5u32 {
        queue.put(i).await.unwrap();
    }
    assert_eq!(queue.len(), 5);

    queue.put(99).await.unwrap();
    assert_eq!(queue.len(), 5);
    assert_eq!(*dropped.lock().unwrap(), vec![0]);

    let mut drained = Vec::new();
    while let Some(item) = queue.try_pop() {
        drained.push(item);
    }
    assert_eq!(drained, vec![1, 2, 3, 4, 99]);
}
