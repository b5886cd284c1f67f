//! PinSynchronizer - Live Marker View over the Pin Store
//!
//! ## Responsibilities
//!
//! - Own the local marker view (pin id -> rendering handle + creation time)
//! - Reconcile it against the store's added/removed stream
//! - Submit locally created pins
//! - Re-evaluate marker colors on demand (see `color_refresh`)
//!
//! ## Subscription lifecycle
//!
//! unsubscribed -> subscribing -> active -> (error | cancel) -> unsubscribed
//!
//! Only one listener runs at a time; subscribing again cancels the previous
//! one. After a listener error the local view stays visible but stale until
//! the next explicit `subscribe()`, whose initial batch replaces it: markers
//! missing from that batch are released.

use crate::age_colorizer::{age_minutes, color_for_age, format_time_ago, AgeColor};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::pin_store::{FeedEvent, GeoPoint, Pin, PinDocument, PinDraft, PinFeed, PinQuery, PinStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Opaque handle to a rendered marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerHandle(pub u64);

/// Info-window content for a marker
///
/// Never includes how many detections produced the pin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerInfo {
    pub object_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_percent: Option<i64>,
    pub time_ago: String,
    pub age_minutes: i64,
    pub user: String,
}

/// Everything a renderer needs to draw one marker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerView {
    pub pin_id: String,
    pub position: GeoPoint,
    pub color: AgeColor,
    pub hex: &'static str,
    pub info: MarkerInfo,
}

impl MarkerView {
    fn build(pin_id: &str, document: &PinDocument, position: GeoPoint, now: DateTime<Utc>) -> Self {
        let color = color_for_age(&document.timestamp, now);
        let created = document.timestamp.to_instant().unwrap_or(now);
        let user = if document.user_id.is_empty() {
            "Unknown".to_string()
        } else {
            format!("{}...", document.user_id.chars().take(8).collect::<String>())
        };

        Self {
            pin_id: pin_id.to_string(),
            position,
            color,
            hex: color.hex(),
            info: MarkerInfo {
                object_name: document.object_name.clone(),
                confidence_percent: document
                    .confidence
                    .filter(|c| *c > 0.0)
                    .map(|c| (c * 100.0).round() as i64),
                time_ago: format_time_ago(created, now),
                age_minutes: age_minutes(&document.timestamp, now),
                user,
            },
        }
    }
}

/// Marker rendering surface (map, WebSocket fan-out, test recorder)
pub trait MarkerRenderer: Send + Sync + 'static {
    /// Draw a new marker
    fn place(&self, marker: &MarkerView) -> impl Future<Output = MarkerHandle> + Send;

    /// Update an existing marker in place
    fn recolor(&self, handle: MarkerHandle, marker: &MarkerView) -> impl Future<Output = ()> + Send;

    /// Remove a marker and free its handle
    fn release(&self, handle: MarkerHandle, pin_id: &str) -> impl Future<Output = ()> + Send;

    /// Store connectivity changed
    fn connection_changed(&self, _connected: bool) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
}

/// Point-in-time listing of one marker
#[derive(Debug, Clone, Serialize)]
pub struct MarkerSnapshot {
    pub handle: MarkerHandle,
    #[serde(flatten)]
    pub view: MarkerView,
}

struct MarkerEntry {
    handle: MarkerHandle,
    document: PinDocument,
    position: GeoPoint,
    color: AgeColor,
}

struct ActiveListener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// PinSynchronizer instance
pub struct PinSynchronizer<S, R> {
    store: Arc<S>,
    renderer: Arc<R>,
    clock: Arc<dyn Clock>,
    query: PinQuery,
    markers: Mutex<HashMap<String, MarkerEntry>>,
    state: RwLock<SubscriptionState>,
    connected: AtomicBool,
    generation: AtomicU64,
    listener: Mutex<Option<ActiveListener>>,
}

impl<S: PinStore, R: MarkerRenderer> PinSynchronizer<S, R> {
    /// Create new PinSynchronizer
    pub fn new(store: Arc<S>, renderer: Arc<R>, clock: Arc<dyn Clock>, query: PinQuery) -> Self {
        Self {
            store,
            renderer,
            clock,
            query,
            markers: Mutex::new(HashMap::new()),
            state: RwLock::new(SubscriptionState::Unsubscribed),
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            listener: Mutex::new(None),
        }
    }

    /// Open the live subscription, replacing any previous one
    pub async fn subscribe(self: &Arc<Self>) -> Result<()> {
        let mut listener = self.listener.lock().await;
        if let Some(previous) = listener.take() {
            previous.cancel.cancel();
            let _ = previous.task.await;
            tracing::debug!("Previous pin listener cancelled");
        }

        *self.state.write().await = SubscriptionState::Subscribing;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let feed = match self.store.subscribe(self.query).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::error!(error = %e, "Pin listener setup failed");
                *self.state.write().await = SubscriptionState::Unsubscribed;
                self.set_connected(false).await;
                return Err(match e {
                    Error::Subscription(_) => e,
                    other => Error::Subscription(other.to_string()),
                });
            }
        };

        *self.state.write().await = SubscriptionState::Active;
        self.set_connected(true).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).listen(feed, cancel.clone(), generation));
        *listener = Some(ActiveListener { cancel, task });

        tracing::info!(limit = self.query.limit, "Pin listener active");
        Ok(())
    }

    /// Cancel the live subscription; rendered markers stay
    pub async fn unsubscribe(&self) {
        let previous = self.listener.lock().await.take();
        if let Some(previous) = previous {
            previous.cancel.cancel();
            let _ = previous.task.await;
        }
        // Invalidate any late failure report from the cancelled listener
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.state.write().await = SubscriptionState::Unsubscribed;
        tracing::info!("Pin listener cancelled");
    }

    async fn listen(self: Arc<Self>, mut feed: PinFeed, cancel: CancellationToken, generation: u64) {
        // Ids seen in the initial batch; `None` once it has been reconciled
        let mut initial: Option<HashSet<String>> = Some(HashSet::new());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = feed.next() => match event {
                    Some(FeedEvent::Added { id, document }) => {
                        if let Some(seen) = initial.as_mut() {
                            seen.insert(id.clone());
                        }
                        self.apply_added(&id, document).await;
                    }
                    Some(FeedEvent::Removed { id }) => {
                        if let Some(seen) = initial.as_mut() {
                            seen.remove(&id);
                        }
                        self.apply_removed(&id).await;
                    }
                    Some(FeedEvent::Synced) => {
                        if let Some(seen) = initial.take() {
                            self.retain_only(&seen).await;
                        }
                    }
                    Some(FeedEvent::Failed { reason }) => {
                        tracing::error!(reason = %reason, "Pin listener error");
                        self.mark_down(generation).await;
                        break;
                    }
                    None => {
                        tracing::warn!("Pin listener closed by store");
                        self.mark_down(generation).await;
                        break;
                    }
                },
            }
        }
    }

    /// Release every marker whose id is not in `live`; returns how many
    async fn retain_only(&self, live: &HashSet<String>) -> usize {
        let mut markers = self.markers.lock().await;
        let stale: Vec<String> = markers
            .keys()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();

        for id in &stale {
            if let Some(entry) = markers.remove(id) {
                self.renderer.release(entry.handle, id).await;
            }
        }

        if !stale.is_empty() {
            tracing::info!(released = stale.len(), "Stale markers released after resubscribe");
        }
        stale.len()
    }

    async fn mark_down(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        *self.state.write().await = SubscriptionState::Unsubscribed;
        self.set_connected(false).await;
    }

    async fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            self.renderer.connection_changed(connected).await;
        }
    }

    /// Submit a new pin; the store assigns id and timestamp
    pub async fn write(&self, draft: PinDraft) -> Result<Pin> {
        self.store.insert(draft).await.map_err(|e| match e {
            Error::Write(_) => e,
            other => Error::Write(other.to_string()),
        })
    }

    /// Apply an added event; `false` when already present or unplaceable
    pub async fn apply_added(&self, id: &str, document: PinDocument) -> bool {
        let mut markers = self.markers.lock().await;
        if markers.contains_key(id) {
            tracing::debug!(pin_id = %id, "Duplicate added event ignored");
            return false;
        }

        let Some(position) = document.position() else {
            tracing::warn!(pin_id = %id, "Pin without position skipped");
            return false;
        };

        let view = MarkerView::build(id, &document, position, self.clock.now());
        let handle = self.renderer.place(&view).await;
        markers.insert(
            id.to_string(),
            MarkerEntry {
                handle,
                color: view.color,
                document,
                position,
            },
        );

        tracing::debug!(pin_id = %id, color = %view.hex, "Marker placed");
        true
    }

    /// Apply a removed event; `false` when the id is unknown
    pub async fn apply_removed(&self, id: &str) -> bool {
        let entry = self.markers.lock().await.remove(id);
        match entry {
            Some(entry) => {
                self.renderer.release(entry.handle, id).await;
                tracing::debug!(pin_id = %id, "Marker released");
                true
            }
            None => false,
        }
    }

    /// Re-evaluate every marker against the current time
    ///
    /// The marker map stays locked for the whole pass, so concurrent
    /// add/remove events wait until it completes. Returns how many markers
    /// changed color bucket.
    pub async fn refresh_colors(&self) -> usize {
        let now = self.clock.now();
        let mut markers = self.markers.lock().await;
        let mut changed = 0;

        for (id, entry) in markers.iter_mut() {
            let view = MarkerView::build(id, &entry.document, entry.position, now);
            if view.color != entry.color {
                changed += 1;
                entry.color = view.color;
            }
            self.renderer.recolor(entry.handle, &view).await;
        }

        tracing::debug!(markers = markers.len(), changed = changed, "Marker colors refreshed");
        changed
    }

    /// Current marker listing, newest first
    pub async fn markers(&self) -> Vec<MarkerSnapshot> {
        let now = self.clock.now();
        let markers = self.markers.lock().await;
        let mut list: Vec<(Option<DateTime<Utc>>, MarkerSnapshot)> = markers
            .iter()
            .map(|(id, entry)| {
                (
                    entry.document.timestamp.to_instant(),
                    MarkerSnapshot {
                        handle: entry.handle,
                        view: MarkerView::build(id, &entry.document, entry.position, now),
                    },
                )
            })
            .collect();
        list.sort_by(|a, b| b.0.cmp(&a.0));
        list.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    pub async fn marker_count(&self) -> usize {
        self.markers.lock().await.len()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.markers.lock().await.contains_key(id)
    }

    pub async fn state(&self) -> SubscriptionState {
        *self.state.read().await
    }

    /// Store connectivity as last observed by the listener
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Renderer operation log
    #[derive(Debug, Clone, PartialEq)]
    pub enum RenderOp {
        Place(String, AgeColor),
        Recolor(MarkerHandle, AgeColor),
        Release(MarkerHandle),
        Connection(bool),
    }

    #[derive(Default)]
    pub struct RecordingRenderer {
        next: AtomicU64,
        pub ops: StdMutex<Vec<RenderOp>>,
    }

    impl RecordingRenderer {
        pub fn ops(&self) -> Vec<RenderOp> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl MarkerRenderer for RecordingRenderer {
        async fn place(&self, marker: &MarkerView) -> MarkerHandle {
            self.ops
                .lock()
                .unwrap()
                .push(RenderOp::Place(marker.pin_id.clone(), marker.color));
            MarkerHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn recolor(&self, handle: MarkerHandle, marker: &MarkerView) {
            self.ops
                .lock()
                .unwrap()
                .push(RenderOp::Recolor(handle, marker.color));
        }

        async fn release(&self, handle: MarkerHandle, _pin_id: &str) {
            self.ops.lock().unwrap().push(RenderOp::Release(handle));
        }

        async fn connection_changed(&self, connected: bool) {
            self.ops.lock().unwrap().push(RenderOp::Connection(connected));
        }
    }

    /// Poll an async condition until it holds or two seconds pass
    macro_rules! eventually {
        ($cond:expr) => {{
            let mut ok = false;
            for _ in 0..200 {
                if $cond {
                    ok = true;
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            ok
        }};
    }
    pub(crate) use eventually;
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::age_colorizer::PinTimestamp;
    use crate::clock::ManualClock;
    use crate::pin_store::MemoryPinStore;
    use chrono::{Duration, TimeZone};

    type TestSync = PinSynchronizer<MemoryPinStore, RecordingRenderer>;

    fn setup() -> (Arc<ManualClock>, Arc<MemoryPinStore>, Arc<RecordingRenderer>, Arc<TestSync>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryPinStore::new(clock.clone()));
        let renderer = Arc::new(RecordingRenderer::default());
        let sync = Arc::new(PinSynchronizer::new(
            store.clone(),
            renderer.clone(),
            clock.clone(),
            PinQuery::default(),
        ));
        (clock, store, renderer, sync)
    }

    fn document(name: &str, timestamp: PinTimestamp) -> PinDocument {
        PinDocument {
            object_name: name.to_string(),
            latitude: Some(10.0),
            longitude: Some(20.0),
            location: None,
            confidence: Some(0.9),
            user_id: "abcdefghijkl".to_string(),
            timestamp,
        }
    }

    fn draft(name: &str) -> PinDraft {
        PinDraft {
            object_name: name.to_string(),
            position: GeoPoint {
                latitude: 1.0,
                longitude: 2.0,
            },
            confidence: Some(0.8),
            user_id: "user-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_added_is_idempotent() {
        let (_, _, renderer, sync) = setup();
        assert!(sync.apply_added("p1", document("bottle", PinTimestamp::Absent)).await);
        assert!(!sync.apply_added("p1", document("bottle", PinTimestamp::Absent)).await);

        assert_eq!(sync.marker_count().await, 1);
        assert_eq!(renderer.ops().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_removed_unknown_is_noop() {
        let (_, _, renderer, sync) = setup();
        assert!(!sync.apply_removed("ghost").await);
        assert!(renderer.ops().is_empty());
    }

    #[tokio::test]
    async fn test_apply_removed_releases_handle() {
        let (_, _, renderer, sync) = setup();
        sync.apply_added("p1", document("can", PinTimestamp::Absent)).await;
        assert!(sync.apply_removed("p1").await);
        assert_eq!(renderer.ops()[1], RenderOp::Release(MarkerHandle(1)));
        assert_eq!(sync.marker_count().await, 0);
    }

    #[tokio::test]
    async fn test_pin_without_position_skipped() {
        let (_, _, _, sync) = setup();
        let mut doc = document("can", PinTimestamp::Absent);
        doc.latitude = None;
        assert!(!sync.apply_added("p1", doc).await);
        assert_eq!(sync.marker_count().await, 0);
    }

    #[tokio::test]
    async fn test_marker_info_hides_user_tail() {
        let (clock, _, _, sync) = setup();
        let created = clock.now() - Duration::minutes(15);
        sync.apply_added("p1", document("bottle", PinTimestamp::from_instant(created)))
            .await;

        let markers = sync.markers().await;
        let info = &markers[0].view.info;
        assert_eq!(info.user, "abcdefgh...");
        assert_eq!(info.age_minutes, 15);
        assert_eq!(info.confidence_percent, Some(90));
        assert_eq!(markers[0].view.color, AgeColor::DarkOrange);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_and_incremental() {
        let (_, store, renderer, sync) = setup();
        let existing = store.insert(draft("bottle")).await.unwrap();

        sync.subscribe().await.unwrap();
        assert_eq!(sync.state().await, SubscriptionState::Active);
        assert!(sync.is_connected());
        assert!(eventually!(sync.contains(&existing.id).await));

        let written = sync.write(draft("can")).await.unwrap();
        assert!(eventually!(sync.contains(&written.id).await));

        store.remove(&existing.id).await.unwrap();
        assert!(eventually!(!sync.contains(&existing.id).await));
        assert!(renderer.ops().contains(&RenderOp::Connection(true)));
    }

    #[tokio::test]
    async fn test_resubscribe_replays_without_duplicates() {
        let (_, store, _, sync) = setup();
        store.insert(draft("bottle")).await.unwrap();
        store.insert(draft("can")).await.unwrap();

        sync.subscribe().await.unwrap();
        assert!(eventually!(sync.marker_count().await == 2));

        sync.subscribe().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(sync.marker_count().await, 2);
        assert_eq!(store.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_listener_error_marks_down_and_keeps_markers() {
        let (_, store, renderer, sync) = setup();
        store.insert(draft("bottle")).await.unwrap();
        sync.subscribe().await.unwrap();
        assert!(eventually!(sync.marker_count().await == 1));

        store.fail_listeners("permission denied").await;
        assert!(eventually!(sync.state().await == SubscriptionState::Unsubscribed));
        assert!(!sync.is_connected());
        assert_eq!(sync.marker_count().await, 1);
        assert!(renderer.ops().contains(&RenderOp::Connection(false)));

        // Nothing further is delivered until a fresh subscribe
        let later = store.insert(draft("can")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!sync.contains(&later.id).await);

        sync.subscribe().await.unwrap();
        assert!(eventually!(sync.contains(&later.id).await));
    }

    #[tokio::test]
    async fn test_resubscribe_releases_pins_deleted_while_down() {
        let (clock, store, renderer, sync) = setup();
        let deleted = store.insert(draft("bottle")).await.unwrap();
        clock.advance(Duration::seconds(1));
        let kept = store.insert(draft("can")).await.unwrap();
        sync.subscribe().await.unwrap();
        assert!(eventually!(sync.marker_count().await == 2));

        store.fail_listeners("permission denied").await;
        assert!(eventually!(sync.state().await == SubscriptionState::Unsubscribed));
        store.remove(&deleted.id).await.unwrap();
        assert!(sync.contains(&deleted.id).await);

        sync.subscribe().await.unwrap();
        assert!(eventually!(!sync.contains(&deleted.id).await));
        assert!(sync.contains(&kept.id).await);
        assert_eq!(sync.marker_count().await, 1);
        assert_eq!(
            renderer
                .ops()
                .iter()
                .filter(|op| matches!(op, RenderOp::Release(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_resubscribe_releases_pins_outside_window() {
        let (clock, store, _, sync) = setup();
        let sync = Arc::new(PinSynchronizer::new(
            store.clone(),
            Arc::new(RecordingRenderer::default()),
            clock.clone(),
            PinQuery { limit: 1 },
        ));
        let oldest = store.insert(draft("bottle")).await.unwrap();
        sync.subscribe().await.unwrap();
        assert!(eventually!(sync.contains(&oldest.id).await));

        store.fail_listeners("network").await;
        assert!(eventually!(!sync.is_connected()));
        clock.advance(Duration::seconds(1));
        let newest = store.insert(draft("can")).await.unwrap();

        sync.subscribe().await.unwrap();
        assert!(eventually!(sync.contains(&newest.id).await));
        assert!(eventually!(!sync.contains(&oldest.id).await));
    }

    #[tokio::test]
    async fn test_subscribe_failure_surfaces_error() {
        let (_, store, _, sync) = setup();
        store.reject_reads(Some("permission denied".into())).await;
        let result = sync.subscribe().await;
        assert!(matches!(result, Err(Error::Subscription(_))));
        assert_eq!(sync.state().await, SubscriptionState::Unsubscribed);
        assert!(!sync.is_connected());
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let (_, store, _, sync) = setup();
        store.reject_writes(Some("quota exceeded".into())).await;
        assert!(matches!(sync.write(draft("can")).await, Err(Error::Write(_))));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (_, store, _, sync) = setup();
        sync.subscribe().await.unwrap();
        sync.unsubscribe().await;
        assert_eq!(sync.state().await, SubscriptionState::Unsubscribed);

        let pin = store.insert(draft("can")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!sync.contains(&pin.id).await);
    }

    #[tokio::test]
    async fn test_refresh_colors_tracks_age() {
        let (clock, _, renderer, sync) = setup();
        sync.apply_added("p1", document("bottle", PinTimestamp::from_instant(clock.now())))
            .await;

        assert_eq!(sync.refresh_colors().await, 0);
        clock.advance(Duration::minutes(7));
        assert_eq!(sync.refresh_colors().await, 1);

        let ops = renderer.ops();
        assert_eq!(ops.last(), Some(&RenderOp::Recolor(MarkerHandle(1), AgeColor::OrangeRed)));
    }
}
