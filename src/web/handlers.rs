//! HTTP request handlers.

use super::AppState;
use crate::metrics::{render_prometheus, MetricsSnapshot};
use crate::scheduler::EntrySnapshot;
use crate::supervisor::SupervisorState;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = render_prometheus(&state.metrics.snapshot());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: SupervisorState,
    pub counters: MetricsSnapshot,
    pub endpoints: Vec<EntrySnapshot>,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        state: *state.state.borrow(),
        counters: state.metrics.snapshot(),
        endpoints: state.entries.iter().map(|e| e.snapshot()).collect(),
    })
}

pub async fn handle_healthz(State(state): State<AppState>) -> impl IntoResponse {
    let current = *state.state.borrow();
    let code = if current == SupervisorState::Running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, current.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::Server;
    use super::*;
    use crate::metrics::Metrics;
    use crate::probe::fake::descriptor;
    use crate::scheduler::EntryStats;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn app_state(current: SupervisorState) -> (AppState, watch::Sender<SupervisorState>) {
        let metrics = Arc::new(Metrics::new());
        metrics.record_skipped_overlap();
        let d = descriptor("svc", Duration::from_secs(30), true);
        let entries: Arc<[Arc<EntryStats>]> =
            Arc::from(vec![Arc::new(EntryStats::new(d.id.clone(), d.configured_url.clone(), d.interval))]);
        let (tx, rx) = watch::channel(current);
        (
            AppState {
                metrics,
                entries,
                state: rx,
            },
            tx,
        )
    }

    async fn get(state: AppState, uri: &str) -> (StatusCode, String) {
        let response = Server::routes(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (state, _tx) = app_state(SupervisorState::Running);
        let (status, body) = get(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("probes_skipped_overlap_total 1\n"));
        assert!(body.contains("sink_queue_depth 0\n"));
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (state, _tx) = app_state(SupervisorState::Running);
        let (status, body) = get(state, "/api/status").await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["state"], "RUNNING");
        assert_eq!(value["counters"]["probes_skipped_overlap_total"], 1);
        assert_eq!(value["endpoints"][0]["id"], "svc");
        assert_eq!(value["endpoints"][0]["interval_seconds"], 30.0);
        assert!(value["endpoints"][0]["last_status"].is_null());
    }

    #[tokio::test]
    async fn test_healthz_follows_state() {
        let (state, tx) = app_state(SupervisorState::Running);
        let (status, _) = get(state.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);

        tx.send_replace(SupervisorState::Draining);
        let (status, body) = get(state, "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "DRAINING");
    }
}
