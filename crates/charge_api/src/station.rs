use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use charge_core::{DispatchStrategy, FaultRecord, StationSnapshot};
use charge_engine::Engine;
use serde::{Deserialize, Serialize};

use crate::error::engine_error_to_response;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRequest {
    pub strategy: DispatchStrategy,
    pub bulk_threshold: Option<usize>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyResponse {
    pub strategy: DispatchStrategy,
    pub bulk_threshold: usize,
}

/// Get every pile with its queue and the waiting area
pub async fn get_station_status(State(engine): State<Arc<Engine>>) -> Json<StationSnapshot> {
    tracing::info!("Getting station status");
    Json(engine.queue_snapshot().await)
}

pub async fn get_faults(State(engine): State<Arc<Engine>>) -> Json<Vec<FaultRecord>> {
    Json(engine.faults().await)
}

/// Switch the dispatch strategy used by subsequent dispatch passes
pub async fn set_strategy(
    State(engine): State<Arc<Engine>>,
    Json(payload): Json<StrategyRequest>,
) -> Json<StrategyResponse> {
    let config = engine
        .set_strategy(payload.strategy, payload.bulk_threshold)
        .await;
    Json(StrategyResponse {
        strategy: config.strategy,
        bulk_threshold: config.bulk_threshold,
    })
}

/// Run a reconciliation pass now instead of waiting for the next tick
pub async fn sweep(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    match engine.sweep().await {
        Ok(report) => Json(report).into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}
