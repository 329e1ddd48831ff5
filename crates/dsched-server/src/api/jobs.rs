use axum::{
    extract::{Path, State},
    Extension, Json,
};
use dsched_core::JobResult;
use dsched_scheduler::{JobInfo, ScheduleSummary};

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState};

pub(super) async fn get_schedule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<ScheduleSummary>> {
    Json(ApiResponse::new(
        state.registry.get_schedule_summary(),
        req_id.0,
    ))
}

pub(super) async fn get_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobInfo>>, ApiError> {
    let info = state
        .registry
        .get_job_info(&id)
        .ok_or_else(|| ApiError::job_not_found(req_id.0.clone(), &id))?;
    Ok(Json(ApiResponse::new(info, req_id.0)))
}

pub(super) async fn pause_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobInfo>>, ApiError> {
    set_paused(&state, &req_id, &id, true)
}

pub(super) async fn resume_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobInfo>>, ApiError> {
    set_paused(&state, &req_id, &id, false)
}

fn set_paused(
    state: &AppState,
    req_id: &RequestId,
    id: &str,
    paused: bool,
) -> Result<Json<ApiResponse<JobInfo>>, ApiError> {
    let toggled = if paused {
        state.registry.pause_job(id)
    } else {
        state.registry.resume_job(id)
    };
    let info = toggled
        .then(|| state.registry.get_job_info(id))
        .flatten()
        .ok_or_else(|| ApiError::job_not_found(req_id.0.clone(), id))?;
    Ok(Json(ApiResponse::new(info, req_id.0.clone())))
}

/// Runs the job to completion before responding. The run lives on its own
/// task, so a client that disconnects early does not cut it short.
pub(super) async fn run_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobResult>>, ApiError> {
    if state.registry.get_job_info(&id).is_none() {
        return Err(ApiError::job_not_found(req_id.0, &id));
    }

    match state.registry.run_now(&id).await {
        Some(result) => Ok(Json(ApiResponse::new(result, req_id.0))),
        None => Err(ApiError::new(
            req_id.0,
            "conflict",
            format!("job '{id}' is already running"),
        )),
    }
}

pub(super) async fn list_recent_runs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<Vec<JobResult>>> {
    Json(ApiResponse::new(state.registry.recent_results(), req_id.0))
}
