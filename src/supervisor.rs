//! Process lifecycle: startup, graceful drain, shutdown.
//!
//! State machine: `STARTING -> RUNNING -> DRAINING -> STOPPED`. A requested
//! shutdown always passes through DRAINING. A forced shutdown during the
//! drain goes straight to STOPPED and counts whatever was still queued as
//! dropped.

use crate::config::MonitorConfig;
use crate::endpoint::{validate_unique_ids, ConfigError, DescriptorSource};
use crate::metrics::Metrics;
use crate::probe::Prober;
use crate::scheduler::Scheduler;
use crate::sink::{HttpBackend, LogBackend, ResultSink, StdoutBackend};
use crate::web::{AppState, Server};

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long the web server gets to close its connections at exit.
const WEB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Startup error types. Any of these aborts startup before probing begins.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("invalid backend url {url:?}: {reason}")]
    BackendUrl { url: String, reason: String },
    #[error("failed to bind observability server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// A shutdown phase that overran its deadline. Logged and reported; the
/// process exits anyway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTimeout {
    #[error("{cancelled} probes still in flight after {grace:?} were cancelled")]
    Probes { cancelled: usize, grace: Duration },
    #[error("final flush did not finish within {deadline:?}, {dropped} results dropped")]
    Flush { dropped: u64, deadline: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SupervisorState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl SupervisorState {
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Starting, Running) | (Running, Draining) | (Draining, Stopped) | (Starting, Stopped) | (Running, Stopped)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorState::Starting => "STARTING",
            SupervisorState::Running => "RUNNING",
            SupervisorState::Draining => "DRAINING",
            SupervisorState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Summary of a shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub forced: bool,
    pub probes_cancelled: usize,
    pub results_delivered: u64,
    pub results_dropped: u64,
    pub timeouts: Vec<ShutdownTimeout>,
}

/// Build the log backend named by the configuration.
pub fn backend_from_config(config: &MonitorConfig) -> Result<Arc<dyn LogBackend>, MonitorError> {
    match &config.backend_url {
        Some(raw) => {
            let url = reqwest::Url::parse(raw).map_err(|e| MonitorError::BackendUrl {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
            tracing::info!("Forwarding results to {}", url);
            Ok(Arc::new(HttpBackend::new(url, config.backend_timeout)?))
        }
        None => {
            tracing::info!("No backend url configured, logging results to stdout");
            Ok(Arc::new(StdoutBackend))
        }
    }
}

/// Owns the scheduler, the sink and the web server for the process lifetime.
pub struct Supervisor {
    config: MonitorConfig,
    metrics: Arc<Metrics>,
    state: watch::Sender<SupervisorState>,
    scheduler: Scheduler,
    sink: ResultSink,
    web: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Load descriptors and start every component. Nothing is started if
    /// loading or validation fails.
    pub async fn start(
        config: MonitorConfig,
        source: &dyn DescriptorSource,
        prober: Arc<dyn Prober>,
        backend: Arc<dyn LogBackend>,
    ) -> Result<Self, MonitorError> {
        let (state, _) = watch::channel(SupervisorState::Starting);
        tracing::info!("Supervisor state: {}", SupervisorState::Starting);

        let descriptors = source.load()?;
        validate_unique_ids(&descriptors)?;

        let listener = match config.http_port {
            Some(port) => Some(
                Server::bind(port)
                    .await
                    .map_err(|source| MonitorError::Bind { port, source })?,
            ),
            None => None,
        };

        let metrics = Arc::new(Metrics::new());
        let sink = ResultSink::start(config.sink.clone(), backend, metrics.clone());
        let mut scheduler = Scheduler::new(config.scheduler.clone(), prober, sink.queue(), metrics.clone());
        scheduler.start(&descriptors);

        let web = listener.map(|server| {
            let app = AppState {
                metrics: metrics.clone(),
                entries: scheduler.entries(),
                state: state.subscribe(),
            };
            let mut state_rx = state.subscribe();
            tokio::spawn(server.run(app, async move {
                let _ = state_rx.wait_for(|s| *s == SupervisorState::Stopped).await;
            }))
        });

        let supervisor = Self {
            config,
            metrics,
            state,
            scheduler,
            sink,
            web,
        };
        supervisor.transition(SupervisorState::Running);
        Ok(supervisor)
    }

    /// Drain and stop. If `force` resolves before the drain completes, the
    /// drain is abandoned.
    pub async fn shutdown<F>(mut self, force: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        self.transition(SupervisorState::Draining);

        let report = tokio::select! {
            report = self.drain() => report,
            _ = force => {
                tracing::warn!("Forced shutdown requested, abandoning drain");
                self.abort_all().await
            }
        };

        self.transition(SupervisorState::Stopped);
        self.stop_web().await;

        for timeout in &report.timeouts {
            tracing::error!("Shutdown timeout: {}", timeout);
        }
        let counters = self.metrics.snapshot();
        tracing::info!(
            forced = report.forced,
            probes_total = counters.probes_total,
            results_dropped_total = counters.results_dropped_total,
            delivered = report.results_delivered,
            dropped = report.results_dropped,
            cancelled = report.probes_cancelled,
            "Shutdown complete"
        );
        report
    }

    async fn drain(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        self.scheduler.stop();
        let grace = self.config.grace_period;
        let outcome = self.scheduler.drain(grace).await;
        report.probes_cancelled = outcome.cancelled;
        if !outcome.completed {
            report.timeouts.push(ShutdownTimeout::Probes {
                cancelled: outcome.cancelled,
                grace,
            });
        }

        let deadline = self.config.drain_deadline;
        let flushed = self.sink.shutdown(deadline).await;
        report.results_delivered = flushed.delivered;
        report.results_dropped = flushed.dropped;
        if flushed.timed_out {
            report.timeouts.push(ShutdownTimeout::Flush {
                dropped: flushed.dropped,
                deadline,
            });
        }

        report
    }

    async fn abort_all(&mut self) -> ShutdownReport {
        let probes_cancelled = self.scheduler.abort().await;
        let results_dropped = self.sink.abort();
        tracing::error!(
            cancelled = probes_cancelled,
            dropped = results_dropped,
            "Forced shutdown discarded in-flight work"
        );
        ShutdownReport {
            forced: true,
            probes_cancelled,
            results_dropped,
            ..Default::default()
        }
    }

    async fn stop_web(&mut self) {
        if let Some(handle) = self.web.take() {
            if tokio::time::timeout(WEB_SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Web server did not stop within {:?}", WEB_SHUTDOWN_TIMEOUT);
            }
        }
    }

    fn transition(&self, next: SupervisorState) {
        let current = *self.state.borrow();
        if !current.can_transition_to(next) {
            tracing::warn!("Ignoring invalid state transition {} -> {}", current, next);
            return;
        }
        self.state.send_replace(next);
        tracing::info!("Supervisor state: {} -> {}", current, next);
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
