use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::RwLock;

use crate::fleet::FleetReport;
use crate::scheduler::{RequestScheduler, SchedulerStatus};

#[derive(Clone)]
pub struct AppState {
    scheduler: RequestScheduler,
    last_report: Arc<RwLock<Option<FleetReport>>>,
    prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(scheduler: RequestScheduler, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            scheduler,
            last_report: Arc::new(RwLock::new(None)),
            prometheus,
        }
    }

    /// Publish the most recent fleet report on `/report`.
    pub async fn set_report(&self, report: FleetReport) {
        *self.last_report.write().await = Some(report);
    }
}

/// Read-only observability surface: health, scheduler status, last report,
/// and Prometheus exposition when a recorder is installed.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/report", get(report))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

async fn report(State(state): State<AppState>) -> Result<Json<FleetReport>, StatusCode> {
    state
        .last_report
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .prometheus
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or(StatusCode::NOT_FOUND)
}
