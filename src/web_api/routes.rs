//! API Routes

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Path, Query, State,
    },
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};

use crate::age_colorizer::legend;
use crate::error::Error;
use crate::media_capture::Frame;
use crate::models::{
    ApiResponse, CaptureQuery, CycleQuery, LocationErrorReport, LocationReport, LocationView,
};
use crate::pin_store::PinStore;
use crate::state::AppState;

/// Upper bound for an uploaded capture
const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Identity
        .route("/api/auth/anonymous", post(sign_in_anonymously))
        // Location
        .route("/api/location", get(get_location).post(report_location))
        .route("/api/location/error", post(report_location_error))
        // Capture
        .route("/api/captures", post(submit_capture))
        .route("/api/cycles", get(list_cycles))
        // Pins
        .route("/api/pins", get(list_pins))
        .route("/api/pins/subscribe", post(resubscribe))
        .route("/api/pins/:id", delete(delete_pin))
        .route("/api/legend", get(get_legend))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .layer(DefaultBodyLimit::max(MAX_CAPTURE_BYTES))
        .with_state(state)
}

// ========================================
// Identity Handlers
// ========================================

async fn sign_in_anonymously(State(state): State<AppState>) -> impl IntoResponse {
    match state.identity.sign_in_anonymously().await {
        Ok(identity) => Json(ApiResponse::success(identity)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Location Handlers
// ========================================

fn location_view(state: &AppState) -> LocationView {
    let status = state.location.status();
    LocationView {
        text: status.text(),
        active: status.is_active(),
        fix: state.location.current_fix().ok(),
    }
}

async fn get_location(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(location_view(&state)))
}

async fn report_location(
    State(state): State<AppState>,
    Json(req): Json<LocationReport>,
) -> impl IntoResponse {
    match state
        .location
        .report_fix(req.latitude, req.longitude, req.accuracy)
    {
        Ok(_) => Json(ApiResponse::success(location_view(&state))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn report_location_error(
    State(state): State<AppState>,
    Json(req): Json<LocationErrorReport>,
) -> impl IntoResponse {
    state.location.report_error(req.kind);
    Json(ApiResponse::success(location_view(&state)))
}

// ========================================
// Capture Handlers
// ========================================

/// Raw JPEG body; one capture-and-classify cycle
async fn submit_capture(
    State(state): State<AppState>,
    Query(query): Query<CaptureQuery>,
    body: Bytes,
) -> impl IntoResponse {
    if body.is_empty() {
        return Error::Validation("Empty capture body".to_string()).into_response();
    }

    let frame = Frame::jpeg(body.to_vec(), query.width, query.height);
    match state.capture_frame(frame).await {
        Ok(report) => Json(ApiResponse::success(report)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_cycles(
    State(state): State<AppState>,
    Query(query): Query<CycleQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).min(state.config.cycle_log_capacity.max(1));
    Json(ApiResponse::success(state.cycle_log.get_latest(limit).await))
}

// ========================================
// Pin Handlers
// ========================================

async fn list_pins(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.synchronizer.markers().await))
}

/// Store-side deletion; the live view follows through the subscription
async fn delete_pin(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.remove(&id).await {
        Ok(true) => Json(ApiResponse::success(serde_json::json!({ "deleted": id }))).into_response(),
        Ok(false) => Error::NotFound(format!("Pin {} not found", id)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn resubscribe(State(state): State<AppState>) -> impl IntoResponse {
    match state.synchronizer.subscribe().await {
        Ok(()) => Json(ApiResponse::success(serde_json::json!({
            "state": state.synchronizer.state().await,
        })))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_legend() -> impl IntoResponse {
    Json(ApiResponse::success(legend()))
}

// ========================================
// WebSocket
// ========================================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Live map feed: current markers first, then hub messages until the client leaves
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sink, mut incoming) = socket.split();
    let (conn_id, mut hub_rx) = state.realtime.register().await;

    let snapshot: Vec<String> = state
        .synchronizer
        .markers()
        .await
        .into_iter()
        .filter_map(|marker| {
            serde_json::to_string(&serde_json::json!({ "type": "pin_snapshot", "data": marker }))
                .map_err(|e| tracing::error!(error = %e, "Marker snapshot not serializable"))
                .ok()
        })
        .collect();

    let mut open = true;
    for text in snapshot {
        if sink.send(Message::Text(text)).await.is_err() {
            open = false;
            break;
        }
    }

    while open {
        tokio::select! {
            outgoing = hub_rx.recv() => match outgoing {
                Some(text) => open = sink.send(Message::Text(text)).await.is_ok(),
                None => open = false,
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(connection_id = %conn_id, "Map client closed socket");
                    open = false;
                }
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "Map socket error");
                    open = false;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    state.realtime.unregister(&conn_id).await;
}
