mod alerts;
mod ingest;
mod signals;
mod trends;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use trendscope_core::Platform;
use trendscope_engine::{IntakeStats, TrendEngine};
use trendscope_store::{ArchiveStore, StoreError};

use crate::middleware::{request_id, require_bearer_auth, AuthState, RequestId};

#[derive(Clone)]
pub struct AppState {
    pub engine: TrendEngine,
    pub store: Arc<dyn ArchiveStore>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    store: &'static str,
    cycle: u64,
    last_cycle_at: Option<DateTime<Utc>>,
    open_trends: usize,
    shutting_down: bool,
    queue_depths: BTreeMap<Platform, usize>,
    intake: IntakeStats,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(super) fn new(request_id: String, data: T) -> Self {
        Self {
            data,
            meta: ResponseMeta::new(request_id),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "rejected" => StatusCode::UNPROCESSABLE_ENTITY,
            "unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn normalize_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(50).clamp(1, 200)
}

pub(super) fn map_store_error(request_id: String, error: &StoreError) -> ApiError {
    if error.is_retriable() {
        tracing::warn!(error = %error, "archive store unavailable");
        return ApiError::new(request_id, "unavailable", "archive store unavailable");
    }
    tracing::error!(error = %error, "archive query failed");
    ApiError::new(request_id, "internal_error", "archive query failed")
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/ingest", post(ingest::submit_batch))
        .route("/api/v1/signals", post(signals::submit_signals))
        .route("/api/v1/trends", get(trends::list_open_trends))
        .route("/api/v1/trends/history", get(trends::query_history))
        .route("/api/v1/trends/{trend_id}", get(trends::get_trend))
        .route("/api/v1/alerts", get(alerts::list_recent_alerts))
        .layer(axum::middleware::from_fn_with_state(
            auth,
            require_bearer_auth,
        ))
}

pub fn build_app(state: AppState, auth: AuthState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let view = state.engine.view();
    let store_result = state.store.health_check().await;
    if let Err(e) = &store_result {
        tracing::warn!(error = %e, "health check: archive store unavailable");
    }
    let healthy = store_result.is_ok() && !state.engine.is_shutting_down();
    let data = HealthData {
        status: if healthy { "ok" } else { "degraded" },
        store: if store_result.is_ok() { "ok" } else { "unavailable" },
        cycle: view.cycle,
        last_cycle_at: view.updated_at,
        open_trends: view.trends.len(),
        shutting_down: state.engine.is_shutting_down(),
        queue_depths: state.engine.queue_depths(),
        intake: state.engine.intake_stats(),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::new(req_id.0, data)))
}
