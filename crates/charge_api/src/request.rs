use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use charge_core::{ChargeSession, PileClass, RequestId};
use charge_engine::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::engine_error_to_response;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub class: PileClass,
    pub energy: f64,
    pub battery_capacity: f64,
    pub requester: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub id: RequestId,
    pub ticket: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyRequest {
    pub requester: String,
    pub class: Option<PileClass>,
    pub energy: Option<f64>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub requester: String,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FinishRequest {
    /// Energy the vehicle reports having received
    pub energy: Option<f64>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishResponse {
    pub session: Option<ChargeSession>,
}

/// Admit a new charging request
pub async fn submit_request(
    State(engine): State<Arc<Engine>>,
    Json(payload): Json<SubmitRequest>,
) -> impl IntoResponse {
    match engine
        .submit(
            payload.class,
            payload.energy,
            payload.battery_capacity,
            payload.requester,
        )
        .await
    {
        Ok(admission) => (
            StatusCode::CREATED,
            Json(SubmitResponse {
                id: admission.id,
                ticket: admission.ticket.to_string(),
            }),
        )
            .into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

/// Lifecycle state, estimates and progress of one request
pub async fn get_request(
    State(engine): State<Arc<Engine>>,
    Path(request_id): Path<Uuid>,
) -> impl IntoResponse {
    match engine.status(RequestId(request_id)).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

/// Change class or amount while still in the waiting area
pub async fn modify_request(
    State(engine): State<Arc<Engine>>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<ModifyRequest>,
) -> impl IntoResponse {
    match engine
        .modify_request(
            RequestId(request_id),
            payload.requester,
            payload.class,
            payload.energy,
        )
        .await
    {
        Ok(ticket) => (
            StatusCode::OK,
            Json(SubmitResponse {
                id: RequestId(request_id),
                ticket: ticket.to_string(),
            }),
        )
            .into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

pub async fn cancel_request(
    State(engine): State<Arc<Engine>>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> impl IntoResponse {
    match engine.cancel(RequestId(request_id), payload.requester).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

/// Client-side report that charging is done
pub async fn finish_request(
    State(engine): State<Arc<Engine>>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<FinishRequest>,
) -> impl IntoResponse {
    match engine
        .finish_charging(RequestId(request_id), payload.energy)
        .await
    {
        Ok(session) => (StatusCode::OK, Json(FinishResponse { session })).into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

/// Closed sessions of one requester with their fees
pub async fn get_bills(
    State(engine): State<Arc<Engine>>,
    Path(requester): Path<String>,
) -> Json<Vec<ChargeSession>> {
    Json(engine.bills_for(&requester).await)
}
