//! Application state
//!
//! One explicit session context: every shared component is built here on
//! session start and torn down in `shutdown()`.

use crate::capture_orchestrator::{CaptureOrchestrator, CycleReport};
use crate::clock::{Clock, SystemClock};
use crate::color_refresh::ColorRefreshScheduler;
use crate::cycle_log_service::CycleLogService;
use crate::detection_classifier::ClassifierPolicy;
use crate::error::Result;
use crate::identity::IdentityService;
use crate::location_tracker::{LocationPolicy, LocationTracker};
use crate::media_capture::{CameraSession, Frame, StillFrameSource};
use crate::pin_store::{MemoryPinStore, PinQuery};
use crate::pin_synchronizer::PinSynchronizer;
use crate::realtime_hub::{
    ConnectionStatusMessage, CycleCompletedMessage, HubMessage, LocationStatusMessage, RealtimeHub,
};
use crate::recognizer_client::{Recognizer, RecognizerConfig, RecognizerSlot};
use crate::throttle_ledger::{ThrottleLedger, ThrottlePolicy};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type Synchronizer = PinSynchronizer<MemoryPinStore, RealtimeHub>;
pub type Orchestrator = CaptureOrchestrator<RecognizerSlot, MemoryPinStore, RealtimeHub>;
pub type ColorRefresh = ColorRefreshScheduler<MemoryPinStore, RealtimeHub>;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Hosted recognizer base URL
    pub recognizer_url: String,
    pub recognizer_api_key: Option<String>,
    pub recognizer_model_id: String,
    pub recognizer_model_version: String,
    pub recognizer_timeout_secs: u64,
    /// Minimum confidence for a valid detection
    pub confidence_threshold: f64,
    /// Valid detections of one class needed for a pin
    pub min_detections_per_class: usize,
    /// Per-class cooldown between pins
    pub pin_throttle_ms: i64,
    /// Most-recent pins kept in the live view
    pub pin_query_limit: usize,
    pub color_refresh_secs: u64,
    pub location_timeout_secs: u64,
    pub location_max_age_secs: u64,
    pub allow_anonymous_auth: bool,
    pub cycle_log_capacity: usize,
    /// Static frontend directory
    pub static_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8080),
            recognizer_url: std::env::var("RECOGNIZER_URL")
                .unwrap_or_else(|_| "https://detect.roboflow.com".to_string()),
            recognizer_api_key: std::env::var("RECOGNIZER_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            recognizer_model_id: std::env::var("RECOGNIZER_MODEL_ID")
                .unwrap_or_else(|_| "fmy-first-project-ulnpd".to_string()),
            recognizer_model_version: std::env::var("RECOGNIZER_MODEL_VERSION")
                .unwrap_or_else(|_| "1".to_string()),
            recognizer_timeout_secs: env_or("RECOGNIZER_TIMEOUT_SECS", 30),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", 0.5),
            min_detections_per_class: env_or("MIN_DETECTIONS_PER_CLASS", 2),
            pin_throttle_ms: env_or("PIN_THROTTLE_MS", 30_000),
            pin_query_limit: env_or("PIN_QUERY_LIMIT", 100),
            color_refresh_secs: env_or("COLOR_REFRESH_SECS", 60),
            location_timeout_secs: env_or("LOCATION_TIMEOUT_SECS", 15),
            location_max_age_secs: env_or("LOCATION_MAX_AGE_SECS", 60),
            allow_anonymous_auth: env_or("ALLOW_ANONYMOUS_AUTH", true),
            cycle_log_capacity: env_or("CYCLE_LOG_CAPACITY", 200),
            static_dir: std::env::var("STATIC_DIR").ok().map(PathBuf::from),
        }
    }
}

impl AppConfig {
    pub fn recognizer(&self) -> RecognizerConfig {
        RecognizerConfig {
            base_url: self.recognizer_url.clone(),
            api_key: self.recognizer_api_key.clone(),
            model_id: self.recognizer_model_id.clone(),
            model_version: self.recognizer_model_version.clone(),
            timeout: Duration::from_secs(self.recognizer_timeout_secs),
        }
    }

    pub fn classifier_policy(&self) -> ClassifierPolicy {
        ClassifierPolicy {
            confidence_threshold: self.confidence_threshold,
            min_detections: self.min_detections_per_class.max(1),
        }
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            cooldown: chrono::Duration::milliseconds(self.pin_throttle_ms.max(0)),
        }
    }

    pub fn location_policy(&self) -> LocationPolicy {
        LocationPolicy {
            timeout: Duration::from_secs(self.location_timeout_secs),
            max_age: Duration::from_secs(self.location_max_age_secs),
        }
    }

    pub fn pin_query(&self) -> PinQuery {
        PinQuery {
            limit: self.pin_query_limit.max(1),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    /// Realtime pin store
    pub store: Arc<MemoryPinStore>,
    /// RealtimeHub (WebSocket fan-out, marker renderer)
    pub realtime: Arc<RealtimeHub>,
    pub synchronizer: Arc<Synchronizer>,
    pub recognizer: Arc<RecognizerSlot>,
    pub ledger: Arc<ThrottleLedger>,
    pub identity: Arc<IdentityService>,
    pub location: Arc<LocationTracker>,
    pub cycle_log: Arc<CycleLogService>,
    pub orchestrator: Arc<Orchestrator>,
    pub color_refresh: Arc<ColorRefresh>,
    pub started_at: DateTime<Utc>,
    session: CancellationToken,
}

impl AppState {
    /// Build every component for a new session
    pub fn build(config: AppConfig) -> Self {
        Self::build_with_clock(config, Arc::new(SystemClock))
    }

    pub fn build_with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        let recognizer = Arc::new(RecognizerSlot::from_config(config.recognizer()));
        Self::assemble(config, clock, recognizer)
    }

    /// Build with an already constructed recognizer
    pub fn assemble(config: AppConfig, clock: Arc<dyn Clock>, recognizer: Arc<RecognizerSlot>) -> Self {
        let store = Arc::new(MemoryPinStore::new(clock.clone()));
        let realtime = Arc::new(RealtimeHub::new());
        let synchronizer = Arc::new(PinSynchronizer::new(
            store.clone(),
            realtime.clone(),
            clock.clone(),
            config.pin_query(),
        ));
        let ledger = Arc::new(ThrottleLedger::new(config.throttle_policy()));
        let identity = Arc::new(IdentityService::new(config.allow_anonymous_auth));
        let location = Arc::new(LocationTracker::new(config.location_policy(), clock.clone()));
        let cycle_log = Arc::new(CycleLogService::new(config.cycle_log_capacity));

        let orchestrator = Arc::new(CaptureOrchestrator::new(
            recognizer.clone(),
            synchronizer.clone(),
            ledger.clone(),
            config.classifier_policy(),
            identity.clone(),
            location.clone(),
            cycle_log.clone(),
            clock.clone(),
        ));

        let color_refresh = Arc::new(
            ColorRefreshScheduler::new(synchronizer.clone())
                .with_tick_interval(Duration::from_secs(config.color_refresh_secs.max(1))),
        );

        Self {
            started_at: clock.now(),
            config,
            clock,
            store,
            realtime,
            synchronizer,
            recognizer,
            ledger,
            identity,
            location,
            cycle_log,
            orchestrator,
            color_refresh,
            session: CancellationToken::new(),
        }
    }

    /// Sign in, open the pin subscription and start background tasks
    ///
    /// A sign-in failure is logged and leaves the map read-only.
    pub async fn start(&self) -> Result<()> {
        if let Err(e) = self.identity.sign_in_anonymously().await {
            tracing::error!(error = %e, "Sign-in failed; pin creation disabled");
        }

        self.spawn_location_relay();
        self.color_refresh.start().await;
        self.synchronizer.subscribe().await?;

        tracing::info!("Session started");
        Ok(())
    }

    fn spawn_location_relay(&self) {
        let mut rx = self.location.subscribe();
        let realtime = self.realtime.clone();
        let token = self.session.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = rx.borrow_and_update().status;
                        realtime
                            .broadcast(HubMessage::LocationStatus(LocationStatusMessage {
                                text: status.text(),
                                active: status.is_active(),
                            }))
                            .await;
                    }
                }
            }
            tracing::debug!("Location relay stopped");
        });
    }

    /// Run one capture cycle on an uploaded frame
    pub async fn capture_frame(&self, frame: Frame) -> Result<CycleReport> {
        let source = Arc::new(StillFrameSource::new(frame));
        let session = CameraSession::open(source, &self.location).await?;

        let result = self.orchestrator.run_cycle(&session).await;
        session.close();

        if self.recognizer.is_configured() {
            self.realtime
                .broadcast(HubMessage::ConnectionStatus(ConnectionStatusMessage {
                    service: "recognizer".to_string(),
                    connected: self.recognizer.is_connected(),
                }))
                .await;
        }

        let report = result?;
        self.realtime
            .broadcast(HubMessage::CycleCompleted(CycleCompletedMessage {
                cycle_id: report.cycle_id,
                summary: report.summary.clone(),
                pins_created: report.pins_created,
                pins_attempted: report.pins_attempted,
                completed_at: report.completed_at.to_rfc3339(),
            }))
            .await;
        Ok(report)
    }

    /// End the session
    pub async fn shutdown(&self) {
        self.session.cancel();
        self.color_refresh.stop().await;
        self.synchronizer.unsubscribe().await;
        tracing::info!("Session ended");
    }

    pub fn uptime_sec(&self) -> u64 {
        (self.clock.now() - self.started_at).num_seconds().max(0) as u64
    }
}
