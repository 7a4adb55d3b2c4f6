//! Scheduler module for running probes on per-endpoint timers.
//!
//! Every enabled endpoint gets its own probe loop task. A loop never runs two
//! probes for its endpoint at once: a tick that arrives while the previous
//! probe is still running is skipped and counted. A process-wide semaphore
//! caps how many probes run at the same time across all loops.

mod entry;

pub use entry::*;

use crate::endpoint::EndpointDescriptor;
use crate::metrics::Metrics;
use crate::probe::{CheckResult, Prober};
use crate::sink::ResultQueue;

use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

type InFlightProbe = Pin<Box<dyn Future<Output = Option<CheckResult>> + Send>>;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum probes running at once across all endpoints.
    pub max_in_flight: usize,
    /// Delay each endpoint's first probe by a random fraction of its interval.
    pub start_jitter: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 50,
            start_jitter: true,
        }
    }
}

/// How the in-flight drain at shutdown ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Every loop finished within the grace period.
    pub completed: bool,
    /// Probes that were force-cancelled.
    pub cancelled: usize,
}

/// Everything a probe loop needs besides its own endpoint.
#[derive(Clone)]
struct ProbeContext {
    prober: Arc<dyn Prober>,
    queue: Arc<ResultQueue>,
    metrics: Arc<Metrics>,
    permits: Arc<Semaphore>,
}

/// The scheduler that owns all probe loops.
pub struct Scheduler {
    config: SchedulerConfig,
    ctx: ProbeContext,
    stop_tx: broadcast::Sender<()>,
    loops: JoinSet<()>,
    entries: Arc<[Arc<EntryStats>]>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        prober: Arc<dyn Prober>,
        queue: Arc<ResultQueue>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));

        Self {
            config,
            ctx: ProbeContext {
                prober,
                queue,
                metrics,
                permits,
            },
            stop_tx,
            loops: JoinSet::new(),
            entries: Arc::from(Vec::new()),
        }
    }

    /// Start one probe loop per enabled descriptor. Returns the number of
    /// endpoints scheduled.
    pub fn start(&mut self, descriptors: &[EndpointDescriptor]) -> usize {
        if !self.entries.is_empty() {
            tracing::warn!("Scheduler already started, ignoring");
            return self.entries.len();
        }

        let enabled: Vec<Arc<EndpointDescriptor>> = descriptors
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .map(Arc::new)
            .collect();

        let skipped = descriptors.len() - enabled.len();
        if skipped > 0 {
            tracing::info!("Skipping {} disabled endpoints", skipped);
        }
        tracing::info!(
            max_in_flight = self.config.max_in_flight,
            "Starting scheduler with {} endpoints",
            enabled.len()
        );

        let mut entries = Vec::with_capacity(enabled.len());
        let mut rng = rand::thread_rng();

        for descriptor in enabled {
            let stats = Arc::new(EntryStats::new(
                descriptor.id.clone(),
                descriptor.configured_url.clone(),
                descriptor.interval,
            ));
            entries.push(stats.clone());

            let first_fire = if self.config.start_jitter {
                rng.gen_range(Duration::ZERO..=descriptor.interval)
            } else {
                Duration::ZERO
            };

            tracing::debug!(
                endpoint = %descriptor.id,
                interval = ?descriptor.interval,
                first_fire = ?first_fire,
                "Scheduler: Adding endpoint"
            );

            self.loops.spawn(run_probe_loop(
                descriptor,
                self.ctx.clone(),
                stats,
                first_fire,
                self.stop_tx.subscribe(),
            ));
        }

        self.entries = Arc::from(entries);
        self.entries.len()
    }

    /// Stats for every scheduled endpoint.
    pub fn entries(&self) -> Arc<[Arc<EntryStats>]> {
        self.entries.clone()
    }

    /// Number of probes currently running or waiting for a permit.
    pub fn in_flight(&self) -> usize {
        self.entries.iter().filter(|e| e.is_in_flight()).count()
    }

    /// Stop firing new probes. Running probes continue; probes still
    /// waiting for a permit are abandoned.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
        self.ctx.permits.close();
        tracing::info!("Scheduler stopped, {} probes in flight", self.in_flight());
    }

    /// Wait for running probes to finish, cancelling whatever is left after
    /// `grace`. Call after [`Scheduler::stop`].
    pub async fn drain(&mut self, grace: Duration) -> DrainOutcome {
        let loops = &mut self.loops;
        let finished = tokio::time::timeout(grace, async {
            while let Some(joined) = loops.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!("Probe loop panicked: {}", e);
                    }
                }
            }
        })
        .await
        .is_ok();

        if finished {
            return DrainOutcome {
                completed: true,
                cancelled: 0,
            };
        }

        let cancelled = self.abort().await;
        tracing::warn!(
            grace = ?grace,
            "Force-cancelled {} probes still in flight after grace period",
            cancelled
        );
        DrainOutcome {
            completed: false,
            cancelled,
        }
    }

    /// Cancel every loop and its running probe immediately. Returns how many
    /// probes were cancelled.
    pub async fn abort(&mut self) -> usize {
        let _ = self.stop_tx.send(());
        self.ctx.permits.close();

        let cancelled = self.in_flight();
        self.loops.shutdown().await;
        for entry in self.entries.iter() {
            entry.set_in_flight(false);
        }
        cancelled
    }
}

impl ProbeContext {
    /// Build the probe future for one tick. It resolves to `None` when the
    /// scheduler stopped before a permit was granted.
    fn launch(&self, descriptor: Arc<EndpointDescriptor>) -> InFlightProbe {
        let permits = self.permits.clone();
        let prober = self.prober.clone();

        Box::pin(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(prober.probe(&descriptor).await)
        })
    }

    fn finish(&self, stats: &EntryStats, outcome: Option<CheckResult>) {
        stats.set_in_flight(false);
        let Some(result) = outcome else {
            return;
        };

        self.metrics.record_probe(&result);
        let previous_failures = stats.record(&result);

        if result.is_ok() && previous_failures > 0 {
            tracing::info!(
                endpoint = %result.endpoint_id,
                failures = previous_failures,
                "Endpoint recovered"
            );
        } else if !result.is_ok() && previous_failures == 0 {
            tracing::warn!(
                endpoint = %result.endpoint_id,
                code = ?result.response_code,
                error = ?result.error_detail,
                "Endpoint became unavailable"
            );
        }
        tracing::debug!(
            endpoint = %result.endpoint_id,
            status = %result.status,
            code = ?result.response_code,
            elapsed = ?result.response_time,
            "Probe completed"
        );

        self.queue.push(result);
    }
}

/// Run the probe loop for a single endpoint.
async fn run_probe_loop(
    descriptor: Arc<EndpointDescriptor>,
    ctx: ProbeContext,
    stats: Arc<EntryStats>,
    first_fire: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + first_fire, descriptor.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<InFlightProbe> = None;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {
                if in_flight.is_some() {
                    stats.record_skipped();
                    ctx.metrics.record_skipped_overlap();
                    tracing::warn!(
                        endpoint = %descriptor.id,
                        "Skipping probe, previous probe still in flight"
                    );
                    continue;
                }

                stats.set_in_flight(true);
                in_flight = Some(ctx.launch(descriptor.clone()));
            }
            outcome = wait_for(&mut in_flight) => {
                in_flight = None;
                ctx.finish(&stats, outcome);
            }
        }
    }

    // Stopped: let the running probe finish. The supervisor bounds this wait.
    if let Some(probe) = in_flight.take() {
        let outcome = probe.await;
        ctx.finish(&stats, outcome);
    }
}

async fn wait_for(slot: &mut Option<InFlightProbe>) -> Option<CheckResult> {
    match slot.as_mut() {
        Some(probe) => probe.await,
        None => std::future::pending().await,
    }
}
