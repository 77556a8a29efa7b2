use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use charge_core::{RequestId, RerouteStrategy};
use charge_engine::Engine;
use serde::{Deserialize, Serialize};

use crate::error::engine_error_to_response;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultRequest {
    pub description: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultResponse {
    /// Requests left attached to the faulted pile
    pub affected: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverRequest {
    #[serde(default)]
    pub strategy: RerouteStrategy,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverResponse {
    pub rescheduled_count: usize,
    pub rescheduled: Vec<RequestId>,
    pub stranded: Vec<RequestId>,
}

pub async fn report_fault(
    State(engine): State<Arc<Engine>>,
    Path(code): Path<String>,
    Json(payload): Json<FaultRequest>,
) -> impl IntoResponse {
    match engine.report_fault(code, payload.description).await {
        Ok(affected) => (StatusCode::OK, Json(FaultResponse { affected })).into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

/// Put a faulted pile back in service and reroute its queue
pub async fn recover_fault(
    State(engine): State<Arc<Engine>>,
    Path(code): Path<String>,
    Json(payload): Json<RecoverRequest>,
) -> impl IntoResponse {
    match engine.recover_fault(code, payload.strategy).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(RecoverResponse {
                rescheduled_count: outcome.rescheduled_count(),
                rescheduled: outcome.rescheduled,
                stranded: outcome.stranded,
            }),
        )
            .into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

pub async fn power_on(
    State(engine): State<Arc<Engine>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    match engine.power_on(code).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

pub async fn shutdown(
    State(engine): State<Arc<Engine>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    match engine.shutdown(code).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}
