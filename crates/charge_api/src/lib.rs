//! HTTP API for the charging station dispatcher.

mod error;
mod pile;
mod request;
mod station;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use charge_engine::Engine;
use tower_http::trace::TraceLayer;

pub use crate::error::ErrorResponse;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Create the application router with all endpoints
pub fn create_app(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/requests", post(request::submit_request))
        .route(
            "/requests/{request_id}",
            get(request::get_request).patch(request::modify_request),
        )
        .route("/requests/{request_id}/cancel", post(request::cancel_request))
        .route("/requests/{request_id}/finish", post(request::finish_request))
        .route("/bills/{requester}", get(request::get_bills))
        .route("/piles/{code}/fault", post(pile::report_fault))
        .route("/piles/{code}/recover", post(pile::recover_fault))
        .route("/piles/{code}/power-on", post(pile::power_on))
        .route("/piles/{code}/shutdown", post(pile::shutdown))
        .route("/station/status", get(station::get_station_status))
        .route("/station/faults", get(station::get_faults))
        .route("/station/strategy", put(station::set_strategy))
        .route("/station/sweep", post(station::sweep))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
