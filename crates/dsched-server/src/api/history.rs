use axum::{
    extract::{Query, State},
    Extension, Json,
};
use dsched_core::{HistoryRecord, JobStatus};
use dsched_db::HistoryFilter;
use serde::Deserialize;

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    pub job_id: Option<String>,
    pub job_name: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub(super) async fn list_history(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<HistoryRecord>>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(|e| ApiError::new(req_id.0.clone(), "validation_error", e.to_string()))?;

    let filter = HistoryFilter {
        job_id: query.job_id,
        job_name: query.job_name,
        status,
        limit: normalize_limit(query.limit),
    };

    let records = state
        .registry
        .handler()
        .list_history(&filter)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse::new(records, req_id.0)))
}
