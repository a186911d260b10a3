use std::net::SocketAddr;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::registry::Telemetry;
use crate::state::FleetState;

#[derive(Serialize)]
struct RunnerResponse {
    id: String,
    hostname: String,
    port: u16,
    status: String,
    workload: u32,
    last_seen: DateTime<Utc>,
    telemetry: Telemetry,
}

#[derive(Serialize)]
struct ActionResponse {
    id: String,
    action_type: String,
    status: String,
    runners: Vec<String>,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    stream_id: u64,
    version: String,
    completed: bool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    actions: Vec<ActionResponse>,
}

#[derive(Serialize)]
struct SlotResponse {
    name: String,
    transcoding: bool,
    stream_id: Option<u64>,
    version: Option<String>,
}

#[derive(Serialize)]
struct EndpointResponse {
    id: String,
    base_url: String,
    bound: usize,
    slots: Vec<SlotResponse>,
}

/// Read-only JSON views over the scheduler state.
pub fn router(state: FleetState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/runners", get(list_runners_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/endpoints", get(list_endpoints_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: FleetState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting status API");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind status API");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Status API failed");
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn list_runners_handler(State(state): State<FleetState>) -> impl IntoResponse {
    let registry = state.runners.read().await;
    let now = Utc::now();
    let window = registry.liveness_window();

    let runners: Vec<RunnerResponse> = registry
        .all()
        .into_iter()
        .map(|r| RunnerResponse {
            id: r.id.to_string(),
            hostname: r.hostname.clone(),
            port: r.port,
            status: r.status_at(now, window).to_string(),
            workload: r.workload,
            last_seen: r.last_seen,
            telemetry: r.telemetry.clone(),
        })
        .collect();

    Json(runners)
}

async fn list_jobs_handler(State(state): State<FleetState>) -> impl IntoResponse {
    let store = state.jobs.read().await;
    let jobs: Vec<JobResponse> = store
        .all_jobs()
        .into_iter()
        .map(|job| JobResponse {
            id: job.id.to_string(),
            stream_id: job.stream_id,
            version: job.version.to_string(),
            completed: job.completed,
            start: job.start,
            end: job.end,
            actions: job
                .actions
                .iter()
                .map(|a| ActionResponse {
                    id: a.id.to_string(),
                    action_type: a.action_type().to_string(),
                    status: a.status.to_string(),
                    runners: a.runners.clone(),
                })
                .collect(),
        })
        .collect();

    Json(jobs)
}

async fn list_endpoints_handler(State(state): State<FleetState>) -> impl IntoResponse {
    let slots = state.slots.lock().await;
    let endpoints: Vec<EndpointResponse> = slots
        .endpoints()
        .iter()
        .map(|e| EndpointResponse {
            id: e.id.clone(),
            base_url: e.base_url.clone(),
            bound: e.bound_count(),
            slots: e
                .slots
                .iter()
                .map(|s| SlotResponse {
                    name: s.name.clone(),
                    transcoding: s.transcoding,
                    stream_id: s.bound.map(|b| b.stream_id),
                    version: s.bound.map(|b| b.version.to_string()),
                })
                .collect(),
        })
        .collect();

    Json(endpoints)
}
