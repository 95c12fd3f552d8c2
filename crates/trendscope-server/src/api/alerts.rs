use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use trendscope_core::Alert;

use crate::middleware::RequestId;

use super::{normalize_limit, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct AlertsQuery {
    pub limit: Option<usize>,
}

/// Most recent alerts first.
pub(super) async fn list_recent_alerts(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<AlertsQuery>,
) -> Json<ApiResponse<Vec<Alert>>> {
    let alerts = state.engine.recent_alerts(normalize_limit(query.limit));
    Json(ApiResponse::new(req_id.0, alerts))
}
