//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::recognizer_client::Recognizer;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let recognizer_reachable = state.recognizer.health_check().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.uptime_sec(),
        store_connected: state.synchronizer.is_connected(),
        subscription: state.synchronizer.state().await,
        recognizer_configured: state.recognizer.is_configured(),
        recognizer_connected: state.recognizer.is_connected(),
        recognizer_reachable,
        signed_in: state.identity.current().await.is_some(),
        location: state.location.status().text(),
        markers: state.synchronizer.marker_count().await,
        ws_clients: state.realtime.connection_count(),
    };

    Json(response)
}
