//! PinStore - Realtime Pin Collection
//!
//! ## Responsibilities
//!
//! - Pin wire record (the persisted document layout)
//! - Insert with store-assigned id and timestamp
//! - Live, limited, newest-first subscriptions delivering added/removed deltas
//!
//! [`MemoryPinStore`] is the in-process implementation shared by every client
//! session connected to this server.

use crate::age_colorizer::PinTimestamp;
use crate::clock::Clock;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Older records nest the position as `location: {lat, lng}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegacyLocation {
    pub lat: f64,
    pub lng: f64,
}

/// Persisted pin record
///
/// Carries no detection count: how many objects triggered a pin is decision
/// metadata and never leaves the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinDocument {
    #[serde(default)]
    pub object_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LegacyLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub timestamp: PinTimestamp,
}

impl PinDocument {
    /// Position from top-level fields, falling back to the legacy nested shape
    pub fn position(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => self.location.map(|l| GeoPoint {
                latitude: l.lat,
                longitude: l.lng,
            }),
        }
    }
}

/// Client-side pin submission; id and timestamp come from the store
#[derive(Debug, Clone, PartialEq)]
pub struct PinDraft {
    pub object_name: String,
    pub position: GeoPoint,
    pub confidence: Option<f64>,
    pub user_id: String,
}

impl PinDraft {
    fn into_document(self, timestamp: PinTimestamp) -> PinDocument {
        PinDocument {
            object_name: self.object_name,
            latitude: Some(self.position.latitude),
            longitude: Some(self.position.longitude),
            location: None,
            confidence: self.confidence,
            user_id: self.user_id,
            timestamp,
        }
    }
}

/// Stored pin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pin {
    pub id: String,
    #[serde(flatten)]
    pub document: PinDocument,
}

/// Subscription query: most recent `limit` pins, newest first
#[derive(Debug, Clone, Copy)]
pub struct PinQuery {
    pub limit: usize,
}

impl Default for PinQuery {
    fn default() -> Self {
        Self { limit: 100 }
    }
}

/// Event delivered on a live subscription
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Added { id: String, document: PinDocument },
    Removed { id: String },
    /// End of the initial batch; later events are incremental
    Synced,
    /// Listener failure; nothing further is delivered
    Failed { reason: String },
}

/// Receiving end of a live subscription
///
/// Dropping the feed cancels the subscription on the store side.
pub struct PinFeed {
    rx: mpsc::UnboundedReceiver<FeedEvent>,
}

impl PinFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<FeedEvent>) -> Self {
        Self { rx }
    }

    /// Next event in delivery order; `None` once the store closed the feed
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }
}

/// Realtime pin collection
pub trait PinStore: Send + Sync + 'static {
    /// Insert a pin; the store assigns id and timestamp
    fn insert(&self, draft: PinDraft) -> impl Future<Output = Result<Pin>> + Send;

    /// Open a live subscription
    fn subscribe(&self, query: PinQuery) -> impl Future<Output = Result<PinFeed>> + Send;

    /// Delete a pin; `false` if it did not exist
    fn remove(&self, id: &str) -> impl Future<Output = Result<bool>> + Send;
}

struct StoredPin {
    pin: Pin,
    created_at: DateTime<Utc>,
    seq: u64,
}

struct Subscriber {
    id: u64,
    limit: usize,
    window: Vec<String>,
    tx: mpsc::UnboundedSender<FeedEvent>,
}

#[derive(Default)]
struct StoreInner {
    /// Newest first
    pins: Vec<StoredPin>,
    subscribers: Vec<Subscriber>,
    write_rejection: Option<String>,
    /// objectName -> rejection reason
    object_rejections: HashMap<String, String>,
    write_latency: Option<std::time::Duration>,
    read_rejection: Option<String>,
}

impl StoreInner {
    fn window(&self, limit: usize) -> Vec<String> {
        self.pins
            .iter()
            .take(limit)
            .map(|p| p.pin.id.clone())
            .collect()
    }

    fn document(&self, id: &str) -> Option<PinDocument> {
        self.pins
            .iter()
            .find(|p| p.pin.id == id)
            .map(|p| p.pin.document.clone())
    }

    /// Push window deltas to every subscriber, dropping closed ones
    fn publish(&mut self) {
        let mut subscribers = std::mem::take(&mut self.subscribers);

        subscribers.retain_mut(|sub| {
            let next = self.window(sub.limit);
            let events = {
                let next_set: HashSet<&String> = next.iter().collect();
                let prev_set: HashSet<&String> = sub.window.iter().collect();

                let mut events = Vec::new();
                for id in sub.window.iter().filter(|id| !next_set.contains(id)) {
                    events.push(FeedEvent::Removed { id: id.clone() });
                }
                for id in next.iter().filter(|id| !prev_set.contains(id)) {
                    if let Some(document) = self.document(id) {
                        events.push(FeedEvent::Added {
                            id: id.clone(),
                            document,
                        });
                    }
                }
                events
            };

            let open = events.into_iter().all(|event| sub.tx.send(event).is_ok());
            if !open {
                tracing::debug!(subscriber_id = sub.id, "Subscriber closed, dropping");
            }
            sub.window = next;
            open
        });

        self.subscribers = subscribers;
    }
}

/// In-process realtime pin store
pub struct MemoryPinStore {
    inner: Mutex<StoreInner>,
    clock: Arc<dyn Clock>,
    next_seq: AtomicU64,
    next_subscriber: AtomicU64,
}

impl MemoryPinStore {
    /// Create new MemoryPinStore; `clock` is the store's server clock
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            clock,
            next_seq: AtomicU64::new(1),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Fail every open listener, as on revoked read permission
    pub async fn fail_listeners(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        for sub in inner.subscribers.drain(..) {
            let _ = sub.tx.send(FeedEvent::Failed {
                reason: reason.to_string(),
            });
        }
        tracing::warn!(reason = %reason, "All pin listeners failed");
    }

    /// Reject subsequent inserts with `reason` (`None` accepts again)
    pub async fn reject_writes(&self, reason: Option<String>) {
        self.inner.lock().await.write_rejection = reason;
    }

    /// Reject subsequent inserts for one `objectName` only
    pub async fn reject_object(&self, object_name: &str, reason: &str) {
        self.inner
            .lock()
            .await
            .object_rejections
            .insert(object_name.to_string(), reason.to_string());
    }

    /// Hold every insert for `latency` before it commits (`None` for none)
    pub async fn set_write_latency(&self, latency: Option<std::time::Duration>) {
        self.inner.lock().await.write_latency = latency;
    }

    /// Reject subsequent subscriptions with `reason` (`None` accepts again)
    pub async fn reject_reads(&self, reason: Option<String>) {
        self.inner.lock().await.read_rejection = reason;
    }

    /// Number of stored pins
    pub async fn len(&self) -> usize {
        self.inner.lock().await.pins.len()
    }

    /// Number of open listeners
    pub async fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    /// Pin by id
    pub async fn get(&self, id: &str) -> Option<Pin> {
        let inner = self.inner.lock().await;
        inner
            .pins
            .iter()
            .find(|p| p.pin.id == id)
            .map(|p| p.pin.clone())
    }
}

impl PinStore for MemoryPinStore {
    async fn insert(&self, draft: PinDraft) -> Result<Pin> {
        if draft.user_id.is_empty() {
            return Err(Error::Write("missing userId".to_string()));
        }
        if draft.object_name.is_empty() {
            return Err(Error::Write("missing objectName".to_string()));
        }

        let latency = self.inner.lock().await.write_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().await;
        if let Some(reason) = &inner.write_rejection {
            return Err(Error::Write(reason.clone()));
        }
        if let Some(reason) = inner.object_rejections.get(&draft.object_name) {
            return Err(Error::Write(reason.clone()));
        }

        let created_at = self.clock.now();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let pin = Pin {
            id: Uuid::new_v4().simple().to_string(),
            document: draft.into_document(PinTimestamp::from_instant(created_at)),
        };

        inner.pins.push(StoredPin {
            pin: pin.clone(),
            created_at,
            seq,
        });
        inner
            .pins
            .sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        inner.publish();

        tracing::info!(pin_id = %pin.id, object_name = %pin.document.object_name, "Pin stored");
        Ok(pin)
    }

    async fn subscribe(&self, query: PinQuery) -> Result<PinFeed> {
        let mut inner = self.inner.lock().await;
        if let Some(reason) = &inner.read_rejection {
            return Err(Error::Subscription(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let window = inner.window(query.limit);
        for id in &window {
            if let Some(document) = inner.document(id) {
                let _ = tx.send(FeedEvent::Added {
                    id: id.clone(),
                    document,
                });
            }
        }
        let _ = tx.send(FeedEvent::Synced);

        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        inner.subscribers.push(Subscriber {
            id,
            limit: query.limit,
            window,
            tx,
        });

        tracing::debug!(subscriber_id = id, limit = query.limit, "Pin listener opened");
        Ok(PinFeed::new(rx))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.pins.len();
        inner.pins.retain(|p| p.pin.id != id);
        let removed = inner.pins.len() != before;
        if removed {
            inner.publish();
            tracing::info!(pin_id = %id, "Pin deleted");
        }
        Ok(removed)
    }
}
