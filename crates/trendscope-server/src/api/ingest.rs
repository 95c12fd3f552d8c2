use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use trendscope_engine::SubmitOutcome;
use trendscope_ingest::IngestBatch;

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState};

pub(super) async fn submit_batch(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Result<Json<IngestBatch>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<SubmitOutcome>>), ApiError> {
    let Json(batch) = body.map_err(|e| ApiError::new(req_id.0.clone(), "rejected", e.body_text()))?;

    match state.engine.submit(&batch) {
        outcome @ SubmitOutcome::Accepted { .. } => Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse::new(req_id.0, outcome)),
        )),
        SubmitOutcome::Rejected { reason } if state.engine.is_shutting_down() => {
            Err(ApiError::new(req_id.0, "unavailable", reason))
        }
        SubmitOutcome::Rejected { reason } => Err(ApiError::new(req_id.0, "rejected", reason)),
    }
}
