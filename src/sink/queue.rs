//! Bounded many-writer, single-reader result queue.

use crate::metrics::Metrics;
use crate::probe::CheckResult;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct Inner {
    items: VecDeque<CheckResult>,
    /// Results taken by the reader and not yet settled.
    held: usize,
}

/// FIFO of results awaiting delivery. When full, the oldest result is
/// evicted to admit the newest.
///
/// A batch taken by the reader stays on the books as held until the reader
/// settles it, so discarding the queue also counts a batch that was mid-send.
pub struct ResultQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    batch_size: usize,
    ready: Notify,
    metrics: Arc<Metrics>,
}

impl ResultQueue {
    pub fn new(capacity: usize, batch_size: usize, metrics: Arc<Metrics>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                held: 0,
            }),
            capacity,
            batch_size: batch_size.max(1),
            ready: Notify::new(),
            metrics,
        }
    }

    /// Enqueue a result without waiting. Returns the evicted result, if any.
    pub fn push(&self, result: CheckResult) -> Option<CheckResult> {
        let (evicted, depth) = {
            let mut inner = self.lock();
            let evicted = if inner.items.len() >= self.capacity {
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(result);
            self.metrics.set_queue_depth(inner.items.len());
            (evicted, inner.items.len())
        };

        if let Some(old) = &evicted {
            self.metrics.record_dropped(1);
            tracing::warn!(
                endpoint = %old.endpoint_id,
                capacity = self.capacity,
                "Sink queue full, dropped oldest result"
            );
        }
        if depth >= self.batch_size {
            self.ready.notify_one();
        }
        evicted
    }

    /// Remove up to `max` results from the front, preserving order. The
    /// batch is held until [`ResultQueue::settle`] or
    /// [`ResultQueue::requeue_front`].
    pub(crate) fn take_batch(&self, max: usize) -> Vec<CheckResult> {
        let mut inner = self.lock();
        let n = max.min(inner.items.len());
        let batch: Vec<_> = inner.items.drain(..n).collect();
        inner.held = batch.len();
        self.metrics.set_queue_depth(inner.items.len());
        batch
    }

    /// Release the held batch. Returns how many results were still held; zero
    /// if a discard already counted them.
    pub(crate) fn settle(&self) -> u64 {
        let mut inner = self.lock();
        std::mem::take(&mut inner.held) as u64
    }

    /// Put an undelivered batch back at the front, ahead of newer results.
    /// May briefly exceed capacity.
    pub(crate) fn requeue_front(&self, batch: Vec<CheckResult>) {
        let mut inner = self.lock();
        if inner.held == 0 {
            // Discarded while it was held.
            return;
        }
        inner.held = 0;
        for result in batch.into_iter().rev() {
            inner.items.push_front(result);
        }
        self.metrics.set_queue_depth(inner.items.len());
    }

    /// Empty the queue, counting everything in it and any held batch as
    /// dropped.
    pub(crate) fn discard_all(&self) -> u64 {
        let discarded = {
            let mut inner = self.lock();
            let n = inner.items.len() + std::mem::take(&mut inner.held);
            inner.items.clear();
            self.metrics.set_queue_depth(0);
            n as u64
        };
        self.metrics.record_dropped(discarded);
        discarded
    }

    /// Resolves once a full batch is waiting.
    pub(crate) async fn ready(&self) {
        self.ready.notified().await;
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::descriptor;
    use std::time::Duration;

    fn result(id: &str) -> CheckResult {
        CheckResult::from_response(&descriptor(id, Duration::from_secs(1), true), 200, Duration::ZERO)
    }

    fn ids(results: &[CheckResult]) -> Vec<&str> {
        results.iter().map(|r| r.endpoint_id.as_str()).collect()
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let metrics = Arc::new(Metrics::new());
        let queue = ResultQueue::new(3, 10, metrics.clone());

        for id in ["r0", "r1", "r2"] {
            assert!(queue.push(result(id)).is_none());
        }
        let evicted = queue.push(result("r3")).unwrap();
        assert_eq!(evicted.endpoint_id, "r0");
        queue.push(result("r4"));

        assert_eq!(queue.len(), 3);
        assert_eq!(ids(&queue.take_batch(10)), vec!["r2", "r3", "r4"]);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.results_dropped_total, 2);
        assert_eq!(snapshot.sink_queue_depth, 0);
    }

    #[test]
    fn test_batches_preserve_order() {
        let queue = ResultQueue::new(100, 10, Arc::new(Metrics::new()));
        for i in 0..5 {
            queue.push(result(&format!("r{}", i)));
        }

        let first = queue.take_batch(2);
        assert_eq!(ids(&first), vec!["r0", "r1"]);

        queue.requeue_front(first);
        queue.push(result("r5"));
        assert_eq!(ids(&queue.take_batch(10)), vec!["r0", "r1", "r2", "r3", "r4", "r5"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_discard_all_records_drops() {
        let metrics = Arc::new(Metrics::new());
        let queue = ResultQueue::new(10, 10, metrics.clone());
        queue.push(result("a"));
        queue.push(result("b"));

        assert_eq!(queue.discard_all(), 2);
        assert!(queue.is_empty());
        assert_eq!(metrics.snapshot().results_dropped_total, 2);
    }

    #[test]
    fn test_discard_counts_held_batch_once() {
        let metrics = Arc::new(Metrics::new());
        let queue = ResultQueue::new(10, 10, metrics.clone());
        for id in ["a", "b", "c"] {
            queue.push(result(id));
        }

        let batch = queue.take_batch(2);
        assert_eq!(metrics.snapshot().sink_queue_depth, 1);
        assert_eq!(queue.discard_all(), 3);

        // The reader finds its batch already accounted for.
        assert_eq!(queue.settle(), 0);
        queue.requeue_front(batch);
        assert!(queue.is_empty());
        assert_eq!(metrics.snapshot().results_dropped_total, 3);
    }

    #[test]
    fn test_settle_releases_held_batch() {
        let metrics = Arc::new(Metrics::new());
        let queue = ResultQueue::new(10, 10, metrics.clone());
        queue.push(result("a"));

        let batch = queue.take_batch(10);
        assert_eq!(batch.len(), 1);
        assert_eq!(queue.settle(), 1);
        assert_eq!(queue.discard_all(), 0);
        assert_eq!(metrics.snapshot().results_dropped_total, 0);
    }

    #[tokio::test]
    async fn test_full_batch_wakes_reader() {
        let queue = ResultQueue::new(10, 2, Arc::new(Metrics::new()));
        queue.push(result("a"));
        queue.push(result("b"));

        // The permit is stored even though nobody was waiting yet.
        tokio::time::timeout(Duration::from_secs(1), queue.ready())
            .await
            .expect("queue should signal a full batch");
    }
}
