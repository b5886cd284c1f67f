//! Color Refresh Scheduler
//!
//! Re-evaluates every rendered marker's age color on a fixed interval
//! (default one minute) so markers fade without new store events.

use crate::pin_store::PinStore;
use crate::pin_synchronizer::{MarkerRenderer, PinSynchronizer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic marker recolor
pub struct ColorRefreshScheduler<S, R> {
    synchronizer: Arc<PinSynchronizer<S, R>>,
    tick_interval: Duration,
    task: Mutex<Option<RunningTask>>,
}

impl<S: PinStore, R: MarkerRenderer> ColorRefreshScheduler<S, R> {
    pub fn new(synchronizer: Arc<PinSynchronizer<S, R>>) -> Self {
        Self {
            synchronizer,
            tick_interval: Duration::from_secs(60),
            task: Mutex::new(None),
        }
    }

    /// Override the tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Start the background task; no-op when already running
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("Color refresh already running");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.tick_interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        this.tick().await;
                    }
                }
            }
            debug!("Color refresh loop exited");
        });

        *task = Some(RunningTask { cancel, handle });
        info!(interval_secs = self.tick_interval.as_secs(), "Color refresh started");
    }

    /// One refresh pass; returns markers that changed color
    pub async fn tick(&self) -> usize {
        let changed = self.synchronizer.refresh_colors().await;
        if changed > 0 {
            debug!(changed = changed, "Marker colors advanced");
        }
        changed
    }

    /// Stop the background task and wait for it
    pub async fn stop(&self) {
        let running = self.task.lock().await.take();
        if let Some(running) = running {
            running.cancel.cancel();
            let _ = running.handle.await;
            info!("Color refresh stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::age_colorizer::{AgeColor, PinTimestamp};
    use crate::clock::{Clock, ManualClock};
    use crate::pin_store::{MemoryPinStore, PinDocument, PinQuery};
    use crate::pin_synchronizer::test_support::*;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<ManualClock>, Arc<RecordingRenderer>, Arc<PinSynchronizer<MemoryPinStore, RecordingRenderer>>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let renderer = Arc::new(RecordingRenderer::default());
        let sync = Arc::new(PinSynchronizer::new(
            Arc::new(MemoryPinStore::new(clock.clone())),
            renderer.clone(),
            clock.clone(),
            PinQuery::default(),
        ));
        (clock, renderer, sync)
    }

    fn document(clock: &ManualClock) -> PinDocument {
        PinDocument {
            object_name: "bottle".to_string(),
            latitude: Some(1.0),
            longitude: Some(2.0),
            location: None,
            confidence: None,
            user_id: "u".to_string(),
            timestamp: PinTimestamp::from_instant(clock.now()),
        }
    }

    #[tokio::test]
    async fn test_background_refresh_recolors() {
        let (clock, renderer, sync) = setup();
        sync.apply_added("p1", document(&clock)).await;

        let scheduler = Arc::new(
            ColorRefreshScheduler::new(sync).with_tick_interval(Duration::from_millis(20)),
        );
        clock.advance(chrono::Duration::minutes(130));
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        assert!(eventually!(renderer
            .ops()
            .contains(&RenderOp::Recolor(crate::pin_synchronizer::MarkerHandle(1), AgeColor::Blue))));

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_halts_ticks() {
        let (clock, renderer, sync) = setup();
        sync.apply_added("p1", document(&clock)).await;

        let scheduler = Arc::new(
            ColorRefreshScheduler::new(sync).with_tick_interval(Duration::from_millis(10)),
        );
        scheduler.start().await;
        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.stop().await;

        let after_stop = renderer.ops().len();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(renderer.ops().len(), after_stop);
    }
}
