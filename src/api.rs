// src/api.rs
//! Ops HTTP surface: health, metrics, job status and manual triggers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::error::SchedulerError;
use crate::health::HealthReport;
use crate::locator::{ResolvedEndpoint, Service};
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct OpsState {
    orchestrator: Arc<Orchestrator>,
    metrics: Option<PrometheusHandle>,
}

impl OpsState {
    pub fn new(orchestrator: Arc<Orchestrator>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            orchestrator,
            metrics,
        }
    }
}

pub fn create_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}/trigger", post(trigger_job))
        .route("/feeds/{id}/refresh", post(refresh_feed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthOut {
    status: &'static str,
    scheduler_running: bool,
    checks: HealthReport,
    endpoints: Vec<(Service, ResolvedEndpoint)>,
}

async fn health(State(state): State<OpsState>) -> Response {
    let o = &state.orchestrator;
    let checks = o.probe().check().await;
    let healthy = checks.all_up();
    let out = HealthOut {
        status: if healthy { "healthy" } else { "degraded" },
        scheduler_running: o.scheduler().is_running(),
        checks,
        endpoints: o.locator().snapshot(),
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(out)).into_response()
}

async fn render_metrics(State(state): State<OpsState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}

async fn list_jobs(State(state): State<OpsState>) -> Response {
    Json(state.orchestrator.scheduler().statuses()).into_response()
}

async fn trigger_job(State(state): State<OpsState>, Path(id): Path<String>) -> Response {
    let code = match state.orchestrator.scheduler().trigger(&id) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(SchedulerError::JobNotFound(_)) => StatusCode::NOT_FOUND,
        Err(SchedulerError::JobAlreadyRunning(_)) => StatusCode::CONFLICT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = match code {
        StatusCode::ACCEPTED => json!({ "job": id, "triggered": true }),
        _ => json!({ "job": id, "triggered": false, "reason": code.canonical_reason() }),
    };
    (code, Json(body)).into_response()
}

async fn refresh_feed(State(state): State<OpsState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.batch().process_one(&id).await {
        Ok(Some(outcome)) => (StatusCode::OK, Json(json!({ "feed_id": id, "outcome": outcome }))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "feed not found" }))).into_response(),
        Err(e) => {
            tracing::error!(target: "batch", feed_id = %id, error = %e, "manual refresh failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
