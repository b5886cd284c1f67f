//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management
//! - Marker rendering fan-out (placed / recolored / removed)
//! - Connectivity, location and capture-cycle notifications
//!
//! The hub is the rendering surface of the pin synchronizer: every client
//! draws markers from these messages, keyed by `MarkerHandle`.

use crate::age_colorizer::AgeColor;
use crate::pin_store::GeoPoint;
use crate::pin_synchronizer::{MarkerHandle, MarkerInfo, MarkerRenderer, MarkerView};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    PinPlaced(PinPlacedMessage),
    PinRecolored(PinRecoloredMessage),
    PinRemoved(PinRemovedMessage),
    ConnectionStatus(ConnectionStatusMessage),
    LocationStatus(LocationStatusMessage),
    /// End of one capture-and-classify cycle
    CycleCompleted(CycleCompletedMessage),
}

impl HubMessage {
    fn kind(&self) -> &'static str {
        match self {
            HubMessage::PinPlaced(_) => "pin_placed",
            HubMessage::PinRecolored(_) => "pin_recolored",
            HubMessage::PinRemoved(_) => "pin_removed",
            HubMessage::ConnectionStatus(_) => "connection_status",
            HubMessage::LocationStatus(_) => "location_status",
            HubMessage::CycleCompleted(_) => "cycle_completed",
        }
    }
}

/// New marker
#[derive(Debug, Clone, Serialize)]
pub struct PinPlacedMessage {
    pub handle: MarkerHandle,
    pub pin_id: String,
    pub position: GeoPoint,
    pub color: AgeColor,
    pub hex: String,
    pub info: MarkerInfo,
}

/// Marker re-evaluated by the color refresh
#[derive(Debug, Clone, Serialize)]
pub struct PinRecoloredMessage {
    pub handle: MarkerHandle,
    pub pin_id: String,
    pub color: AgeColor,
    pub hex: String,
    pub info: MarkerInfo,
}

/// Marker removed
#[derive(Debug, Clone, Serialize)]
pub struct PinRemovedMessage {
    pub handle: MarkerHandle,
    pub pin_id: String,
}

/// Collaborator connectivity ("store", "recognizer")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatusMessage {
    pub service: String,
    pub connected: bool,
}

/// Location status line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationStatusMessage {
    pub text: String,
    pub active: bool,
}

/// Capture cycle summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCompletedMessage {
    pub cycle_id: u64,
    pub summary: String,
    pub pins_created: usize,
    pub pins_attempted: usize,
    pub completed_at: String,
}

/// Marker fan-out to connected WebSocket clients
pub struct RealtimeHub {
    clients: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    connection_count: AtomicU64,
    next_handle: AtomicU64,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Attach a client; messages arrive as serialized JSON text
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().await.insert(id, tx);
        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Map client attached");
        (id, rx)
    }

    pub async fn unregister(&self, id: &Uuid) {
        if self.clients.write().await.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Map client detached");
        }
    }

    /// Send to every attached client; clients whose channel closed are dropped
    pub async fn broadcast(&self, message: HubMessage) {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = %message.kind(), error = %e, "Hub message not serializable");
                return;
            }
        };

        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|id, tx| match tx.send(text.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(connection_id = %id, "Closed map client dropped");
                false
            }
        });
        let dropped = before - clients.len();
        if dropped > 0 {
            self.connection_count.fetch_sub(dropped as u64, Ordering::Relaxed);
        }

        tracing::debug!(kind = %message.kind(), clients = clients.len(), "Hub message sent");
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerRenderer for RealtimeHub {
    async fn place(&self, marker: &MarkerView) -> MarkerHandle {
        let handle = MarkerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.broadcast(HubMessage::PinPlaced(PinPlacedMessage {
            handle,
            pin_id: marker.pin_id.clone(),
            position: marker.position,
            color: marker.color,
            hex: marker.hex.to_string(),
            info: marker.info.clone(),
        }))
        .await;
        handle
    }

    async fn recolor(&self, handle: MarkerHandle, marker: &MarkerView) {
        self.broadcast(HubMessage::PinRecolored(PinRecoloredMessage {
            handle,
            pin_id: marker.pin_id.clone(),
            color: marker.color,
            hex: marker.hex.to_string(),
            info: marker.info.clone(),
        }))
        .await;
    }

    async fn release(&self, handle: MarkerHandle, pin_id: &str) {
        self.broadcast(HubMessage::PinRemoved(PinRemovedMessage {
            handle,
            pin_id: pin_id.to_string(),
        }))
        .await;
    }

    async fn connection_changed(&self, connected: bool) {
        self.broadcast(HubMessage::ConnectionStatus(ConnectionStatusMessage {
            service: "store".to_string(),
            connected,
        }))
        .await;
    }
}
