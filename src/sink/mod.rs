//! Result sink: buffers results and delivers them to a log backend.
//!
//! Probes hand results to a bounded [`ResultQueue`] without waiting. A single
//! background flusher drains the queue in batches and retries failed batches
//! with exponential backoff until a per-batch retry budget runs out. Batches
//! are delivered strictly in queue order; a failing batch blocks the ones
//! behind it.

mod backend;
mod backoff;
mod queue;

#[cfg(test)]
pub mod fake;

pub use backend::*;
pub use backoff::*;
pub use queue::*;

use crate::metrics::Metrics;
use crate::probe::CheckResult;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Drain window used when the sink is dropped without an explicit shutdown.
const FALLBACK_DRAIN: Duration = Duration::from_secs(10);

/// Extra time the flusher gets past its own drain deadline before it is aborted.
const DRAIN_SLACK: Duration = Duration::from_secs(1);

/// Sink delivery error types.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sink tuning.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Maximum queued results before the oldest is evicted.
    pub capacity: usize,
    /// Maximum results per backend send.
    pub batch_size: usize,
    /// How often a partial batch is flushed.
    pub flush_interval: Duration,
    /// How long one batch may be retried before it is dropped.
    pub max_retry: Duration,
    pub backoff: Backoff,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(2),
            max_retry: Duration::from_secs(300),
            backoff: Backoff::default(),
        }
    }
}

/// Outcome of the final flush at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub delivered: u64,
    pub dropped: u64,
    /// The flush deadline expired before the queue was empty.
    pub timed_out: bool,
}

/// Handle to the running sink.
pub struct ResultSink {
    queue: Arc<ResultQueue>,
    mode_tx: watch::Sender<Option<Instant>>,
    handle: JoinHandle<SinkReport>,
}

impl ResultSink {
    /// Start the background flusher.
    pub fn start(config: SinkConfig, backend: Arc<dyn LogBackend>, metrics: Arc<Metrics>) -> Self {
        let queue = Arc::new(ResultQueue::new(config.capacity, config.batch_size, metrics.clone()));
        let (mode_tx, mode_rx) = watch::channel(None);

        tracing::info!(
            backend = backend.name(),
            capacity = config.capacity,
            batch_size = config.batch_size,
            "Starting result sink"
        );

        let flusher = Flusher {
            queue: queue.clone(),
            backend,
            config,
            metrics,
            mode_rx,
        };
        let handle = tokio::spawn(flusher.run());

        Self {
            queue,
            mode_tx,
            handle,
        }
    }

    /// The queue probes enqueue into.
    pub fn queue(&self) -> Arc<ResultQueue> {
        self.queue.clone()
    }

    /// Flush everything still queued, giving up after `deadline`.
    pub async fn shutdown(&mut self, deadline: Duration) -> SinkReport {
        let deadline_at = Instant::now() + deadline;
        let _ = self.mode_tx.send(Some(deadline_at));

        let joined = tokio::time::timeout_at(deadline_at + DRAIN_SLACK, &mut self.handle).await;
        match joined {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                tracing::error!("Sink flusher task failed: {}", e);
                SinkReport {
                    dropped: self.queue.discard_all(),
                    timed_out: false,
                    ..Default::default()
                }
            }
            Err(_) => {
                self.handle.abort();
                let dropped = self.queue.discard_all();
                tracing::error!(dropped, "Sink flusher overran its drain deadline and was aborted");
                SinkReport {
                    dropped,
                    timed_out: true,
                    ..Default::default()
                }
            }
        }
    }

    /// Stop immediately, discarding whatever is still queued or mid-send.
    pub fn abort(&mut self) -> u64 {
        self.handle.abort();
        self.queue.discard_all()
    }
}

enum Delivery {
    Delivered,
    /// Retry budget exhausted.
    Dropped,
    /// Drain deadline reached.
    Expired,
    /// Drain requested while waiting to retry.
    Interrupted,
}

/// The single reader of the queue.
struct Flusher {
    queue: Arc<ResultQueue>,
    backend: Arc<dyn LogBackend>,
    config: SinkConfig,
    metrics: Arc<Metrics>,
    mode_rx: watch::Receiver<Option<Instant>>,
}

impl Flusher {
    async fn run(mut self) -> SinkReport {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.mode_rx.changed() => break,
                _ = self.queue.ready() => {}
                _ = ticker.tick() => {}
            }

            if !self.flush_queued().await {
                break;
            }
        }

        self.drain().await
    }

    /// Deliver queued batches until the queue is empty. Returns false when
    /// a drain was requested.
    async fn flush_queued(&mut self) -> bool {
        loop {
            if self.mode_rx.has_changed().unwrap_or(true) {
                return false;
            }

            let batch = self.queue.take_batch(self.config.batch_size);
            if batch.is_empty() {
                return true;
            }

            let delivery = self.deliver(&batch, None).await;
            match delivery {
                Delivery::Interrupted => {
                    self.queue.requeue_front(batch);
                    return false;
                }
                Delivery::Delivered => {
                    self.queue.settle();
                }
                Delivery::Dropped | Delivery::Expired => {}
            }
        }
    }

    async fn drain(mut self) -> SinkReport {
        let deadline = (*self.mode_rx.borrow()).unwrap_or_else(|| Instant::now() + FALLBACK_DRAIN);
        let mut report = SinkReport::default();

        if !self.queue.is_empty() {
            tracing::info!(queued = self.queue.len(), "Flushing result sink");
        }

        loop {
            let batch = self.queue.take_batch(self.config.batch_size);
            if batch.is_empty() {
                break;
            }

            let n = batch.len() as u64;
            match self.deliver(&batch, Some(deadline)).await {
                Delivery::Delivered => {
                    self.queue.settle();
                    report.delivered += n;
                }
                Delivery::Expired => {
                    report.dropped += n;
                    report.timed_out = true;
                }
                Delivery::Dropped | Delivery::Interrupted => report.dropped += n,
            }
        }

        report
    }

    /// Send one batch, retrying with backoff. With a deadline the retries
    /// stop at the deadline; without one they can be interrupted by a
    /// drain request.
    async fn deliver(&mut self, batch: &[CheckResult], deadline: Option<Instant>) -> Delivery {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            let sent = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.backend.send(batch)).await {
                    Ok(sent) => sent,
                    Err(_) => return self.drop_batch(batch, Delivery::Expired),
                },
                None => self.backend.send(batch).await,
            };

            match sent {
                Ok(()) => {
                    tracing::debug!(batch = batch.len(), attempt, "Delivered result batch");
                    return Delivery::Delivered;
                }
                Err(e) => {
                    tracing::warn!(
                        backend = self.backend.name(),
                        batch = batch.len(),
                        attempt,
                        "Log backend send failed: {}",
                        e
                    );
                }
            }

            let delay = self.config.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            if started.elapsed() + delay > self.config.max_retry {
                return self.drop_batch(batch, Delivery::Dropped);
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() + delay >= deadline {
                        return self.drop_batch(batch, Delivery::Expired);
                    }
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.mode_rx.changed() => return Delivery::Interrupted,
                    }
                }
            }
        }
    }

    fn drop_batch(&self, batch: &[CheckResult], why: Delivery) -> Delivery {
        self.metrics.record_dropped(self.queue.settle());
        let reason = match why {
            Delivery::Expired => "shutdown deadline reached",
            _ => "retry budget exhausted",
        };
        tracing::error!(
            backend = self.backend.name(),
            dropped = batch.len(),
            "Dropping result batch: {}",
            reason
        );
        why
    }
}
