use axum::{Json, http::StatusCode, response::IntoResponse};
use charge_core::ErrorKind;
use charge_engine::EngineError;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn engine_error_to_response(error: EngineError) -> impl IntoResponse {
    let status = match error.kind() {
        Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::CapacityExceeded) => StatusCode::CONFLICT,
        Some(ErrorKind::InvalidState) | Some(ErrorKind::ClassMismatch) => StatusCode::BAD_REQUEST,
        None => {
            tracing::error!("Operation failed: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}
