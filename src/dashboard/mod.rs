use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::cluster::{DispatchOrchestrator, Hub, MembershipRegistry, WorkerRecord};
use crate::error::Result;
use crate::protocol::ExecutionOutcome;
use crate::scheduler::{Job, JobId};
use crate::transport::hub_socket;

#[derive(Clone)]
pub struct DashboardState {
    pub registry: Arc<MembershipRegistry>,
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub hub: Arc<Hub>,
    /// Shutdown signal handed to manual triggers.
    pub cancel: CancellationToken,
}

impl FromRef<DashboardState> for Arc<Hub> {
    fn from_ref(state: &DashboardState) -> Self {
        state.hub.clone()
    }
}

#[derive(Serialize)]
struct WorkerResponse {
    id: String,
    name: String,
    host: String,
    ip_address: String,
    port: u16,
    version: String,
    registered_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    max_concurrent: usize,
    current_running: usize,
    queue_depth: usize,
    cpu_usage: f64,
    memory_usage: f64,
    available: bool,
}

impl WorkerResponse {
    fn from_record(worker: WorkerRecord, available: bool) -> Self {
        Self {
            available,
            max_concurrent: worker.capacity.max_concurrent,
            current_running: worker.capacity.current_running,
            queue_depth: worker.capacity.queue_depth,
            cpu_usage: worker.capacity.cpu_usage,
            memory_usage: worker.capacity.memory_usage,
            id: worker.id,
            name: worker.name,
            host: worker.host,
            ip_address: worker.ip_address,
            port: worker.port,
            version: worker.version,
            registered_at: worker.registered_at,
            last_heartbeat: worker.last_heartbeat,
        }
    }
}

#[derive(Serialize)]
struct JobResponse {
    id: JobId,
    name: String,
    method: String,
    url: String,
    status: String,
    execution: String,
    schedule: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status.to_string(),
            execution: format!("{:?}", job.execution),
            schedule: job.schedule.to_string(),
            name: job.name,
            method: job.method,
            url: job.url,
        }
    }
}

#[derive(Serialize)]
struct ExecutionResponse {
    job_id: JobId,
    worker_id: Option<String>,
    status: &'static str,
    status_code: Option<u16>,
    response: String,
    error: Option<String>,
    duration_ms: u64,
    fired_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl From<ExecutionOutcome> for ExecutionResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            job_id: outcome.job_id,
            worker_id: outcome.worker_id,
            status: if outcome.success { "Success" } else { "Failed" },
            status_code: outcome.status_code,
            response: outcome.response,
            error: outcome.error,
            duration_ms: outcome.duration_ms,
            fired_at: outcome.fired_at,
            completed_at: outcome.completed_at,
        }
    }
}

#[derive(Serialize)]
struct TriggerResponse {
    job_id: JobId,
    success: bool,
    error: Option<String>,
}

/// Dashboard routes plus the `/hub` worker endpoint.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/hub", get(hub_socket))
        .route("/api/workers", get(list_workers_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/:id/executions", get(list_executions_handler))
        .route("/api/jobs/:id/trigger", post(trigger_job_handler))
        .route("/api/selector", get(selector_stats_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve until `cancel` fires.
pub async fn run_dashboard(listener: TcpListener, state: DashboardState, cancel: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Starting dashboard server");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn list_workers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let now = Utc::now();
    let window = state.registry.liveness_window();
    let workers: Vec<WorkerResponse> = state
        .registry
        .list_all()
        .await
        .into_iter()
        .map(|w| {
            let available = w.is_available(now, window);
            WorkerResponse::from_record(w, available)
        })
        .collect();

    Json(workers)
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.orchestrator.store().list_jobs().await {
        Ok(jobs) => {
            let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
            Json(jobs).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_executions_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<JobId>,
) -> impl IntoResponse {
    match state.orchestrator.store().executions(job_id).await {
        Ok(history) => {
            let history: Vec<ExecutionResponse> = history.into_iter().map(ExecutionResponse::from).collect();
            Json(history).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn trigger_job_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<JobId>,
) -> impl IntoResponse {
    match state.orchestrator.store().find_by_id(job_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(TriggerResponse {
                    job_id,
                    success: false,
                    error: Some("Job not found".to_string()),
                }),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TriggerResponse {
                    job_id,
                    success: false,
                    error: Some(e.to_string()),
                }),
            );
        }
    }

    tracing::info!(job_id, "Manual trigger requested");
    let success = state.orchestrator.trigger_now(job_id, &state.cancel).await;
    (
        StatusCode::OK,
        Json(TriggerResponse {
            job_id,
            success,
            error: None,
        }),
    )
}

async fn selector_stats_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.orchestrator.selector().stats())
}
