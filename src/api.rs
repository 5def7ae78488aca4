// src/api.rs
//
// =============================================================================
// GRIDMASTER: REST SURFACE
// =============================================================================
//
// Thin JSON glue over the supervisors.
//
// Endpoints:
//     POST   /api/v1/jobs             - Submit a job (triggers a tick)
//     GET    /api/v1/jobs             - List jobs (status/label/limit/offset)
//     GET    /api/v1/jobs/stats       - Job counts by status
//     GET    /api/v1/jobs/{id}        - Job details
//     PUT    /api/v1/jobs/{id}        - Worker progress report
//     DELETE /api/v1/jobs/{id}        - Cancel (idempotent)
//     GET    /api/v1/jobs/{id}/logs   - Job logs
//     POST   /api/v1/nodes            - Register a worker node
//     GET    /api/v1/nodes            - List nodes
//     GET    /api/v1/nodes/status     - Cluster aggregate
//     POST   /api/v1/nodes/heartbeat  - Worker heartbeat
//     GET    /api/v1/nodes/{id}       - Node details
//     DELETE /api/v1/nodes/{id}       - Unregister
//     GET    /health, GET /           - Service endpoints (no auth)
//
// Handlers never contain business rules: they parse, delegate, and map
// `MasterError` to a status code.

use crate::config::Settings;
use crate::core::{
    ClusterStatus, HeartbeatRequest, JobCreate, JobStatus, JobUpdate, NodeRegister, NodeStatus,
};
use crate::error::MasterError;
use crate::jobs::JobSupervisor;
use crate::nodes::NodeSupervisor;
use crate::scheduler::Scheduler;
use crate::store::ClusterStore;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

// ============================================================================
// 1. STATE & WIRING
// ============================================================================

pub struct AppState {
    pub store: Arc<ClusterStore>,
    pub jobs: Arc<JobSupervisor>,
    pub nodes: Arc<NodeSupervisor>,
    pub scheduler: Arc<Scheduler>,
    pub settings: Settings,
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/stats", get(job_stats))
        .route(
            "/jobs/{id}",
            get(get_job).put(update_job).delete(cancel_job),
        )
        .route("/jobs/{id}/logs", get(job_logs))
        .route("/nodes", post(register_node).get(list_nodes))
        .route("/nodes/status", get(cluster_status))
        .route("/nodes/heartbeat", post(heartbeat))
        .route("/nodes/{id}", get(get_node).delete(remove_node))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_key_gate));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .route("/", get(root))
        .layer(cors_layer(&state.settings))
        .with_state(state)
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    if settings.cors_origins.trim() == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = settings
            .cors_origins
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// ============================================================================
// 2. ERROR MAPPING
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub struct ApiError(MasterError);

impl From<MasterError> for ApiError {
    fn from(err: MasterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MasterError::JobNotFound(_)
            | MasterError::NodeNotFound(_)
            | MasterError::UnknownWorker(_) => StatusCode::NOT_FOUND,
            MasterError::Validation(_) | MasterError::InvalidQuantity(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            MasterError::InvalidTransition { .. } => StatusCode::CONFLICT,
            MasterError::Unauthenticated => StatusCode::UNAUTHORIZED,
            MasterError::Forbidden => StatusCode::FORBIDDEN,
            MasterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// 3. AUTH GATE
// ============================================================================

/// Validates the X-API-Key header. Open access when no key is configured;
/// otherwise a missing header is 401 and a mismatch is 403.
async fn api_key_gate(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = &state.settings.api_key {
        let provided = req
            .headers()
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());
        match provided {
            None => return Err(MasterError::Unauthenticated.into()),
            Some(key) if key != expected => return Err(MasterError::Forbidden.into()),
            Some(_) => {}
        }
    }
    Ok(next.run(req).await)
}

// ============================================================================
// 4. JOB HANDLERS
// ============================================================================

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JobCreate>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.create(body)?;
    // Match immediately instead of waiting out the timer interval.
    state.scheduler.trigger().await;
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<JobStatus>,
    label: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(100);
    if !(1..=1000).contains(&limit) {
        return Err(MasterError::Validation("limit must be between 1 and 1000".into()).into());
    }
    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(MasterError::Validation("offset must not be negative".into()).into());
    }

    let jobs = state.jobs.list(
        query.status,
        query.label.as_deref(),
        limit as usize,
        offset as usize,
    );
    Ok(Json(jobs))
}

async fn job_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.jobs.stats())
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .jobs
        .get(&id)
        .ok_or(MasterError::JobNotFound(id))?;
    Ok(Json(job))
}

async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<JobUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.update(&id, body)?;
    Ok(Json(job))
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.cancel(&id)?;
    Ok(Json(job))
}

async fn job_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .jobs
        .get(&id)
        .ok_or(MasterError::JobNotFound(id))?;
    Ok(Json(json!({
        "job_id": job.id,
        "logs": job.logs.unwrap_or_default(),
    })))
}

// ============================================================================
// 5. NODE HANDLERS
// ============================================================================

async fn register_node(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NodeRegister>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.nodes.register(body)?;
    Ok((StatusCode::CREATED, Json(node)))
}

#[derive(Debug, Deserialize)]
struct ListNodesQuery {
    status: Option<NodeStatus>,
}

async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListNodesQuery>,
) -> impl IntoResponse {
    Json(state.nodes.list(query.status))
}

async fn cluster_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let nodes = state.nodes.list(None);
    let online: Vec<_> = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Online)
        .collect();
    let job_counts = state.store.count_jobs_by_status();
    let count = |status: &str| job_counts.get(status).copied().unwrap_or(0);

    Json(ClusterStatus {
        total_nodes: nodes.len(),
        online_nodes: online.len(),
        total_jobs: job_counts.values().sum(),
        running_jobs: count("running"),
        pending_jobs: count("pending") + count("queued"),
        completed_jobs: count("completed"),
        failed_jobs: count("failed"),
        total_cpu_cores: online.iter().map(|n| u64::from(n.resources.cpu_cores)).sum(),
        total_gpu_count: online.iter().map(|n| u64::from(n.resources.gpu_count)).sum(),
        total_memory_mb: online.iter().map(|n| n.resources.memory_total_mb).sum(),
    })
}

async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state
        .nodes
        .get(&id)
        .ok_or(MasterError::NodeNotFound(id))?;
    Ok(Json(node))
}

async fn remove_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.nodes.remove(&id) {
        return Err(MasterError::NodeNotFound(id).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Heartbeats answer 404 with `acknowledged=false` for unknown workers,
/// which is the signal to re-register.
async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    let response = state.nodes.heartbeat(&body);
    let status = if response.acknowledged {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(response))
}

// ============================================================================
// 6. SERVICE ENDPOINTS
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Gridmaster",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
