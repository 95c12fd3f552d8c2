use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use trendscope_core::{Platform, Trend, TrendId, TrendState};
use trendscope_store::{TimeWindow, TrendFilters};

use crate::middleware::RequestId;

use super::{map_store_error, normalize_limit, ApiError, ApiResponse, AppState};

const DEFAULT_HISTORY_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub(super) struct TrendsQuery {
    pub category: Option<String>,
    pub state: Option<TrendState>,
    pub platform: Option<Platform>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub state: Option<TrendState>,
    pub platform: Option<Platform>,
    pub limit: Option<usize>,
}

impl TrendsQuery {
    fn into_filters(self) -> TrendFilters {
        TrendFilters {
            category: self.category,
            state: self.state,
            platform: self.platform,
            limit: Some(normalize_limit(self.limit)),
        }
    }
}

/// Open trends from the latest cycle, strongest first.
pub(super) async fn list_open_trends(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<TrendsQuery>,
) -> Json<ApiResponse<Vec<Trend>>> {
    let filters = query.into_filters();
    let view = state.engine.view();
    let mut trends: Vec<Trend> = view
        .trends
        .iter()
        .filter(|t| filters.matches(t))
        .cloned()
        .collect();
    trends.sort_by(|a, b| {
        b.virality_score
            .total_cmp(&a.virality_score)
            .then(a.trend_id.cmp(&b.trend_id))
    });
    trends.truncate(filters.limit.unwrap_or(usize::MAX));
    Json(ApiResponse::new(req_id.0, trends))
}

/// Archived history through [`trendscope_store::ArchiveStore::query_range`].
/// Defaults to the last 24 hours.
pub(super) async fn query_history(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<Trend>>>, ApiError> {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query
        .from
        .unwrap_or(to - Duration::hours(DEFAULT_HISTORY_HOURS));
    if from > to {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "`from` must not be after `to`",
        ));
    }

    let filters = TrendsQuery {
        category: query.category,
        state: query.state,
        platform: query.platform,
        limit: query.limit,
    }
    .into_filters();
    let trends = state
        .store
        .query_range(TimeWindow::new(from, to), &filters)
        .await
        .map_err(|e| map_store_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse::new(req_id.0, trends)))
}

/// An open trend from the live view, falling back to the archive.
pub(super) async fn get_trend(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(trend_id): Path<TrendId>,
) -> Result<Json<ApiResponse<Trend>>, ApiError> {
    if let Some(trend) = state.engine.view().trend(&trend_id) {
        return Ok(Json(ApiResponse::new(req_id.0, trend.clone())));
    }

    let stored = state
        .store
        .get(trend_id)
        .await
        .map_err(|e| map_store_error(req_id.0.clone(), &e))?;

    match stored {
        Some(trend) => Ok(Json(ApiResponse::new(req_id.0, trend))),
        None => Err(ApiError::new(
            req_id.0,
            "not_found",
            format!("trend {trend_id} not found"),
        )),
    }
}
