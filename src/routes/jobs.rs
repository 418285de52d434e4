use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app_state::AppState;
use crate::models::job::JobParams;
use crate::models::remote::{Device, RemoteKind};
use crate::models::view::JobView;
use crate::routes::ApiError;
use crate::services::filter::{self, FilterCriteria};

#[derive(Debug, Default, Deserialize)]
pub struct JobQuery {
    pub name: Option<String>,
    pub source_device_id: Option<i64>,
    pub target_device_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteQuery {
    #[serde(rename = "type")]
    pub kind: RemoteKind,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub id: i64,
    pub message: String,
}

/// Resolve a device id to its registry entry. `Ok(None)` means no job can
/// match, since nothing lives on an unregistered device.
async fn resolve_device(
    state: &AppState,
    kind: RemoteKind,
    id: Option<i64>,
) -> Result<Option<Option<Device>>, ApiError> {
    match id {
        None => Ok(Some(None)),
        Some(id) => Ok(state.control.find_remote(kind, id).await?.map(Some)),
    }
}

/// GET /api/v1/jobs: current jobs, filtered by name and devices.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let Some(source_device) = resolve_device(&state, RemoteKind::Source, query.source_device_id).await? else {
        return Ok(Json(Vec::new()));
    };
    let Some(target_device) = resolve_device(&state, RemoteKind::Target, query.target_device_id).await? else {
        return Ok(Json(Vec::new()));
    };

    let criteria = FilterCriteria {
        name: query.name,
        source_device,
        target_device,
    };

    let snapshot = state.reconciler.store().get();
    let rows = filter::apply(&snapshot.jobs, &criteria)
        .iter()
        .map(JobView::from)
        .collect();
    Ok(Json(rows))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<JobView>, ApiError> {
    let snapshot = state.reconciler.store().get();
    snapshot
        .get(id)
        .map(|job| Json(JobView::from(job)))
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Job {id} not found")))
}

/// POST /api/v1/jobs: create a job and start it right away.
pub async fn create_job(
    State(state): State<AppState>,
    Json(params): Json<JobParams>,
) -> Result<Json<CommandResponse>, ApiError> {
    params
        .validate()
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let id = state.control.create_job(&params).await?;
    info!(job_id = id, name = %params.name, "Job created");

    let result = state.control.start_job(id).await;
    state.reconciler.refresh_snapshot();
    let message = result?;

    Ok(Json(CommandResponse { id, message }))
}

/// PUT /api/v1/jobs/{id}: only allowed while the job is not running.
pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(params): Json<JobParams>,
) -> Result<Json<CommandResponse>, ApiError> {
    params
        .validate()
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let status = state
        .reconciler
        .store()
        .get()
        .get(id)
        .map(|job| job.status)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Job {id} not found")))?;
    if !status.is_editable() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("Job {id} is {status}; stop it before editing"),
        ));
    }

    let message = state.control.update_job(id, &params).await?;
    state.reconciler.refresh_snapshot();
    Ok(Json(CommandResponse { id, message }))
}

/// POST /api/v1/jobs/{id}/start
pub async fn start_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CommandResponse>, ApiError> {
    let message = state.control.start_job(id).await?;
    state.reconciler.refresh_snapshot();
    Ok(Json(CommandResponse { id, message }))
}

/// POST /api/v1/jobs/{id}/stop
pub async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CommandResponse>, ApiError> {
    let message = state.control.stop_job(id).await?;
    state.reconciler.refresh_snapshot();
    Ok(Json(CommandResponse { id, message }))
}

/// DELETE /api/v1/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CommandResponse>, ApiError> {
    let message = state.control.delete_job(id).await?;
    state.reconciler.refresh_snapshot();
    Ok(Json(CommandResponse { id, message }))
}

/// POST /api/v1/jobs/refresh: pull a fresh snapshot now.
pub async fn refresh(State(state): State<AppState>) -> StatusCode {
    state.reconciler.refresh_snapshot();
    StatusCode::ACCEPTED
}

/// GET /api/v1/remotes?type=source|target: devices for the filter pickers.
pub async fn list_remotes(
    State(state): State<AppState>,
    Query(query): Query<RemoteQuery>,
) -> Result<Json<Vec<Device>>, ApiError> {
    Ok(Json(state.control.list_remotes(query.kind).await?))
}
