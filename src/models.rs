//! Shared API models
//!
//! Request and response bodies used by the web API.

use crate::location_tracker::{LocationErrorKind, LocationFix};
use crate::pin_synchronizer::SubscriptionState;
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub store_connected: bool,
    pub subscription: SubscriptionState,
    pub recognizer_configured: bool,
    pub recognizer_connected: bool,
    pub recognizer_reachable: bool,
    pub signed_in: bool,
    pub location: String,
    pub markers: usize,
    pub ws_clients: u64,
}

/// Location report from the field client
#[derive(Debug, Clone, Deserialize)]
pub struct LocationReport {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: f64,
}

/// Geolocation error report
#[derive(Debug, Clone, Deserialize)]
pub struct LocationErrorReport {
    pub kind: LocationErrorKind,
}

/// Current location status
#[derive(Debug, Clone, Serialize)]
pub struct LocationView {
    pub text: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<LocationFix>,
}

/// Optional frame dimensions for an uploaded capture
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureQuery {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Cycle list query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CycleQuery {
    pub limit: Option<usize>,
}
