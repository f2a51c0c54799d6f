//! HTTP request handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use openapi_server::models::{
    AttachDownstreamRequest, BypassRequest, DashboardResponse, DeployRequest,
    DeploymentAttemptResponse, DeliveryModeRequest, DownstreamOutput, DownstreamPartitions,
    ErrorResponse, HealthResponse, IngestReleaseRequest, IngestReleaseResponse,
    InstallEventRequest, InstallStatusResponse, PreflightStateResponse, StartInstallRequest,
    VersionResponse,
};
use serde::Deserialize;
use tracing::{debug, error};

use crate::errors::{ErrorKind, FleetError};
use crate::models::downstream::DownstreamTarget;
use crate::models::release::{AppLink, ApplicationPort, Release, RenderDiagnostic, ResourceRef};
use crate::server::convert;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error returned by every handler
pub struct ApiError(FleetError);

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        ApiError(err)
    }
}

/// HTTP status for an error
pub fn status_code(err: &FleetError) -> StatusCode {
    match err {
        FleetError::NotFound(_)
        | FleetError::UnknownDownstream(_)
        | FleetError::UnknownSequence { .. } => StatusCode::NOT_FOUND,
        _ => match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::GateBlocked | ErrorKind::Delivery | ErrorKind::Install => {
                StatusCode::CONFLICT
            }
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "validation",
        ErrorKind::GateBlocked => "gate_blocked",
        ErrorKind::Delivery => "delivery",
        ErrorKind::Install => "install",
        ErrorKind::Internal => "internal",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        let details = match &self.0 {
            FleetError::GateBlocked {
                state, attempt_id, ..
            } => Some(serde_json::json!({
                "gateState": state.name(),
                "attemptId": attempt_id,
            })),
            FleetError::AttemptInProgress { attempt_id, .. }
            | FleetError::ModeSwitchConflict { attempt_id, .. } => {
                Some(serde_json::json!({ "attemptId": attempt_id }))
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: kind_name(self.0.kind()).to_string(),
            message: self.0.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// -- health and version ---------------------------------------------------

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fleetdeck".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// -- releases and downstreams ---------------------------------------------

pub async fn ingest_release_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<IngestReleaseRequest>,
) -> ApiResult<IngestReleaseResponse> {
    let release = Release {
        sequence: request.sequence,
        version_label: request.version_label,
        source: request.source,
        release_notes: request.release_notes,
        yaml_errors: request
            .yaml_errors
            .into_iter()
            .map(|e| RenderDiagnostic {
                path: e.path,
                error: e.error,
            })
            .collect(),
        status_informers: request
            .status_informers
            .iter()
            .map(|i| ResourceRef::new(&i.kind, &i.name, &i.namespace))
            .collect(),
        links: request
            .links
            .into_iter()
            .map(|l| AppLink {
                title: l.description,
                url: l.url,
            })
            .collect(),
        application_ports: request
            .application_ports
            .into_iter()
            .map(|p| ApplicationPort {
                service_name: p.service_name,
                service_port: p.service_port,
                local_port: p.local_port,
                application_url: p.application_url,
            })
            .collect(),
        allow_rollback: request.allow_rollback,
        created_at: Utc::now(),
    };
    let sequence = state.app.ingest(release).await?;
    Ok(Json(IngestReleaseResponse { sequence }))
}

pub async fn list_downstreams_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<Vec<DownstreamPartitions>> {
    let catalog = state.app.catalog.clone();
    Ok(Json(
        state
            .app
            .list_downstream_partitions()
            .iter()
            .map(|s| convert::partitions(&catalog, s))
            .collect(),
    ))
}

pub async fn get_downstream_handler(
    State(state): State<Arc<ServerState>>,
    Path(downstream_id): Path<String>,
) -> ApiResult<DownstreamPartitions> {
    let snapshot = state.app.downstream(&downstream_id)?;
    Ok(Json(convert::partitions(&state.app.catalog, &snapshot)))
}

pub async fn attach_downstream_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<AttachDownstreamRequest>,
) -> Result<(StatusCode, Json<DownstreamPartitions>), ApiError> {
    let mut target = DownstreamTarget::new(&request.id, &request.title);
    target.namespace = request.namespace;
    state.app.attach(target, &request.seed_pending)?;

    let snapshot = state.app.downstream(&request.id)?;
    Ok((
        StatusCode::CREATED,
        Json(convert::partitions(&state.app.catalog, &snapshot)),
    ))
}

pub async fn detach_downstream_handler(
    State(state): State<Arc<ServerState>>,
    Path(downstream_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.app.detach(&downstream_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_delivery_mode_handler(
    State(state): State<Arc<ServerState>>,
    Path(downstream_id): Path<String>,
    Json(request): Json<DeliveryModeRequest>,
) -> ApiResult<DownstreamPartitions> {
    let mode = convert::delivery_mode(&request.mode, request.handoff)?;
    state.app.set_delivery_mode(&downstream_id, mode).await?;

    let snapshot = state.app.downstream(&downstream_id)?;
    Ok(Json(convert::partitions(&state.app.catalog, &snapshot)))
}

pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path((downstream_id, sequence)): Path<(String, i64)>,
) -> ApiResult<DownstreamPartitions> {
    state.app.rollback(&downstream_id, sequence).await?;

    let snapshot = state.app.downstream(&downstream_id)?;
    Ok(Json(convert::partitions(&state.app.catalog, &snapshot)))
}

// -- preflight gate -------------------------------------------------------

pub async fn get_preflight_handler(
    State(state): State<Arc<ServerState>>,
    Path((downstream_id, sequence)): Path<(String, i64)>,
) -> ApiResult<PreflightStateResponse> {
    let gate = state.app.preflight.state(&downstream_id, sequence)?;
    Ok(Json(convert::preflight_state(&downstream_id, sequence, &gate)))
}

pub async fn run_preflight_handler(
    State(state): State<Arc<ServerState>>,
    Path((downstream_id, sequence)): Path<(String, i64)>,
) -> ApiResult<PreflightStateResponse> {
    let gate = state.app.request_preflight(&downstream_id, sequence).await?;
    Ok(Json(convert::preflight_state(&downstream_id, sequence, &gate)))
}

pub async fn bypass_preflight_handler(
    State(state): State<Arc<ServerState>>,
    Path((downstream_id, sequence)): Path<(String, i64)>,
    Json(request): Json<BypassRequest>,
) -> ApiResult<PreflightStateResponse> {
    let gate = state
        .app
        .request_bypass(&downstream_id, sequence, &request.operator)
        .await?;
    Ok(Json(convert::preflight_state(&downstream_id, sequence, &gate)))
}

// -- deployment -----------------------------------------------------------

pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path((downstream_id, sequence)): Path<(String, i64)>,
    body: Option<Json<DeployRequest>>,
) -> ApiResult<DeploymentAttemptResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let attempt = state
        .app
        .request_deployment(
            &downstream_id,
            sequence,
            request.timeout_secs.map(Duration::from_secs),
        )
        .await?;
    Ok(Json(convert::attempt(&attempt)))
}

pub async fn output_handler(
    State(state): State<Arc<ServerState>>,
    Path((downstream_id, sequence)): Path<(String, i64)>,
) -> ApiResult<DownstreamOutput> {
    let output = state.app.downstream_output(&downstream_id, sequence)?;
    Ok(Json(convert::output(&output)))
}

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    pub sequence: Option<i64>,
}

pub async fn list_attempts_handler(
    State(state): State<Arc<ServerState>>,
    Path(downstream_id): Path<String>,
    Query(query): Query<AttemptsQuery>,
) -> ApiResult<Vec<DeploymentAttemptResponse>> {
    let attempts = state.app.list_attempts(&downstream_id, query.sequence)?;
    Ok(Json(attempts.iter().map(convert::attempt).collect()))
}

pub async fn cancel_attempt_handler(
    State(state): State<Arc<ServerState>>,
    Path((downstream_id, attempt_id)): Path<(String, String)>,
) -> ApiResult<DeploymentAttemptResponse> {
    let attempt = state.app.cancel_attempt(&downstream_id, &attempt_id).await?;
    Ok(Json(convert::attempt(&attempt)))
}

// -- dashboard ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub cluster: Option<String>,
}

pub async fn dashboard_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<String>,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<DashboardResponse> {
    let snapshot = state.app.snapshot(&app_id, query.cluster.as_deref()).await?;
    Ok(Json(convert::dashboard(&snapshot)))
}

// -- install --------------------------------------------------------------

pub async fn install_status_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<InstallStatusResponse> {
    Json(convert::install_status(state.app.install_pipeline_state().as_ref()))
}

pub async fn start_install_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<StartInstallRequest>,
) -> ApiResult<InstallStatusResponse> {
    let variant = convert::install_variant(&request.variant)?;
    let pipeline = state.app.start_install(variant, &request.message)?;
    Ok(Json(convert::install_status(Some(&pipeline))))
}

pub async fn install_event_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<InstallEventRequest>,
) -> ApiResult<InstallStatusResponse> {
    let event = convert::install_event(&request.event, request.message)?;
    let pipeline = state.app.advance_install(event)?;
    Ok(Json(convert::install_status(Some(&pipeline))))
}
