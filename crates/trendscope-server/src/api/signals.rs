use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use trendscope_engine::{EngineError, SignalInput};

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState};

#[derive(Debug, Serialize)]
pub(super) struct SignalReceipt {
    accepted: usize,
    rejected: Vec<RejectedSignal>,
}

#[derive(Debug, Serialize)]
pub(super) struct RejectedSignal {
    index: usize,
    reason: String,
}

/// Accepts a JSON array of ML collaborator outputs. Valid entries are
/// applied at the next cycle; invalid ones are reported back by index.
pub(super) async fn submit_signals(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Result<Json<Vec<SignalInput>>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<SignalReceipt>>), ApiError> {
    let Json(inputs) =
        body.map_err(|e| ApiError::new(req_id.0.clone(), "rejected", e.body_text()))?;

    let mut receipt = SignalReceipt {
        accepted: 0,
        rejected: Vec::new(),
    };
    for (index, input) in inputs.into_iter().enumerate() {
        let item_id = input.item_id.clone();
        match state.engine.submit_signal(input) {
            Ok(()) => receipt.accepted += 1,
            Err(EngineError::ShuttingDown) => {
                return Err(ApiError::new(
                    req_id.0,
                    "unavailable",
                    EngineError::ShuttingDown.to_string(),
                ));
            }
            Err(reason) => {
                tracing::debug!(%item_id, reason = %reason, "signal rejected");
                receipt.rejected.push(RejectedSignal {
                    index,
                    reason: reason.to_string(),
                });
            }
        }
    }

    if receipt.accepted == 0 && !receipt.rejected.is_empty() {
        return Err(ApiError::new(
            req_id.0,
            "rejected",
            format!("all {} signals were rejected", receipt.rejected.len()),
        ));
    }
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::new(req_id.0, receipt))))
}
