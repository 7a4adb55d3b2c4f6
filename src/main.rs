//! Endpoint Monitor - HTTP health-check daemon
//!
//! Probes a configured set of endpoints on independent timers and ships every
//! result to a log backend.

mod config;
mod endpoint;
mod metrics;
mod probe;
mod scheduler;
mod sink;
mod supervisor;
mod web;

use config::{LogFormat, MonitorConfig};
use endpoint::JsonFileSource;
use probe::HttpProber;
use supervisor::{backend_from_config, shutdown_signal, MonitorError, Supervisor};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging()?;

    let cfg = MonitorConfig::load();
    tracing::info!("Starting endpoint monitor, config file {}", cfg.config_path.display());

    let supervisor = match start(cfg).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            return Err(e.into());
        }
    };

    shutdown_signal().await;
    // A second signal while draining forces an immediate stop.
    let report = supervisor.shutdown(shutdown_signal()).await;
    if report.forced {
        return Err(format!("forced shutdown dropped {} results", report.results_dropped).into());
    }
    Ok(())
}

async fn start(cfg: MonitorConfig) -> Result<Supervisor, MonitorError> {
    let source = JsonFileSource::new(&cfg.config_path, cfg.endpoint_defaults.clone());
    let prober = Arc::new(HttpProber::new()?);
    let backend = backend_from_config(&cfg)?;
    Supervisor::start(cfg, &source, prober, backend).await
}

fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::from_default_env().add_directive("endpoint_monitor=info".parse()?);

    let (text, json) = match LogFormat::from_env() {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
    Ok(())
}
