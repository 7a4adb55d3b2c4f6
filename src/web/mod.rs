//! Web server module.
//!
//! Serves the observability endpoints: Prometheus counters, a JSON status
//! page, and a liveness check.

mod handlers;

pub use handlers::*;

use crate::metrics::Metrics;
use crate::scheduler::EntryStats;
use crate::supervisor::SupervisorState;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub entries: Arc<[Arc<EntryStats>]>,
    pub state: watch::Receiver<SupervisorState>,
}

/// Observability server.
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind the listener on all interfaces.
    pub async fn bind(port: u16) -> std::io::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    /// Build the router with all routes.
    pub fn routes(state: AppState) -> Router {
        Router::new()
            .route("/metrics", get(handlers::handle_metrics))
            .route("/api/status", get(handlers::handle_status))
            .route("/healthz", get(handlers::handle_healthz))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(self, state: AppState, shutdown: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = Self::routes(state);
        if let Err(e) = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!("Web server failed: {}", e);
        }
    }
}
