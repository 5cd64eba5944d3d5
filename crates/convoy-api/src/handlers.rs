//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.
//! Instance mutation always goes through the reconcile loop; the API only
//! changes what the loop will see on its next tick.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use convoy_core::ImageRef;
use convoy_metrics::{render_prometheus, ServiceMetrics};
use convoy_reconcile::{ControlCommand, ReconcileError};
use convoy_state::{InstanceRecord, InstanceStatus, RolloutPhase};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Services ───────────────────────────────────────────────────

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_specs() {
        Ok(specs) => ApiResponse::ok(specs).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/services/{name}
pub async fn get_service(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_spec(&name) {
        Ok(Some(spec)) => ApiResponse::ok(spec).into_response(),
        Ok(None) => error_response("service not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Status ─────────────────────────────────────────────────────

/// Combined rollout/scaling/fleet status for one service.
#[derive(serde::Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub image: String,
    pub phase: RolloutPhase,
    pub current_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    pub desired_replicas: u32,
    pub ready: u32,
    pub starting: u32,
    pub terminating: u32,
    pub failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_pct: Option<f64>,
    pub updated_at: u64,
}

fn tally(records: &[InstanceRecord]) -> (u32, u32, u32, u32) {
    let mut counts = (0, 0, 0, 0);
    for record in records {
        match record.status {
            InstanceStatus::Ready => counts.0 += 1,
            InstanceStatus::Starting => counts.1 += 1,
            InstanceStatus::Terminating => counts.2 += 1,
            InstanceStatus::Failed => counts.3 += 1,
        }
    }
    counts
}

/// GET /api/v1/services/{name}/status
pub async fn service_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let spec = match state.store.get_spec(&name) {
        Ok(Some(spec)) => spec,
        Ok(None) => {
            return error_response("service not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    };

    let rollout = state.store.get_rollout(&name).ok().flatten();
    let scaling = state.store.get_scaling(&name).ok().flatten();
    let records = state
        .store
        .list_instances_for_service(&name)
        .unwrap_or_default();
    let (ready, starting, terminating, failed) = tally(&records);

    let status = ServiceStatus {
        service: name.clone(),
        image: spec.image.clone(),
        phase: rollout.as_ref().map_or(RolloutPhase::Idle, |r| r.phase),
        current_version: rollout
            .as_ref()
            .map_or_else(|| spec.image.clone(), |r| r.current_version.clone()),
        target_version: rollout.as_ref().and_then(|r| r.target_version.clone()),
        desired_replicas: scaling
            .as_ref()
            .map_or(spec.replicas.min, |s| s.desired_replicas),
        ready,
        starting,
        terminating,
        failed,
        utilization_pct: state.poller.latest(&name).await.map(|s| s.percent),
        updated_at: rollout.as_ref().map_or(0, |r| r.updated_at),
    };
    ApiResponse::ok(status).into_response()
}

// ── Instances ──────────────────────────────────────────────────

/// GET /api/v1/services/{name}/instances
pub async fn list_instances(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.list_instances_for_service(&name) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Image updates ──────────────────────────────────────────────

/// Request body for PUT /services/{name}/image.
#[derive(serde::Deserialize)]
pub struct UpdateImageRequest {
    pub image: String,
}

/// PUT /api/v1/services/{name}/image
///
/// Rewrites the spec's image; the service's reconciler notices the change
/// on its next tick and begins the rollout.
pub async fn update_image(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateImageRequest>,
) -> impl IntoResponse {
    if let Err(e) = ImageRef::parse(&req.image) {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }

    let mut spec = match state.store.get_spec(&name) {
        Ok(Some(spec)) => spec,
        Ok(None) => {
            return error_response("service not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    };

    info!(service = %name, from = %spec.image, to = %req.image, "image update requested");
    spec.image = req.image;
    match state.store.put_spec(&spec) {
        Ok(()) => ApiResponse::ok(spec).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Pause / resume ─────────────────────────────────────────────

async fn send_command(state: &ApiState, name: &str, command: ControlCommand) -> axum::response::Response {
    match state.reconcilers.command(name, command).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({
                "service": name,
                "command": match command {
                    ControlCommand::Pause => "pause",
                    ControlCommand::Resume => "resume",
                },
            })),
        )
            .into_response(),
        Err(ReconcileError::ServiceNotRunning(_)) => {
            error_response("service not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response(),
    }
}

/// POST /api/v1/services/{name}/pause
pub async fn pause_service(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    send_command(&state, &name, ControlCommand::Pause).await
}

/// POST /api/v1/services/{name}/resume
pub async fn resume_service(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    send_command(&state, &name, ControlCommand::Resume).await
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let specs = state.store.list_specs().unwrap_or_default();
    let mut rows = Vec::with_capacity(specs.len());

    for spec in &specs {
        let rollout = state.store.get_rollout(&spec.name).ok().flatten();
        let scaling = state.store.get_scaling(&spec.name).ok().flatten();
        let records = state
            .store
            .list_instances_for_service(&spec.name)
            .unwrap_or_default();
        let (ready, starting, terminating, failed) = tally(&records);

        rows.push(ServiceMetrics {
            service: spec.name.clone(),
            phase: rollout.as_ref().map_or(RolloutPhase::Idle, |r| r.phase),
            desired_replicas: scaling
                .as_ref()
                .map_or(spec.replicas.min, |s| s.desired_replicas),
            ready,
            starting,
            terminating,
            failed,
            utilization_pct: state.poller.latest(&spec.name).await.map(|s| s.percent),
        });
    }

    let body = render_prometheus(&rows);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
