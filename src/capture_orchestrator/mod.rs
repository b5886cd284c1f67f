//! CaptureOrchestrator - Capture-and-Classify Cycle
//!
//! ## Responsibilities
//!
//! - Run one cycle: frame -> recognizer -> classifier -> throttle -> write
//! - Allow at most one cycle in flight
//! - Summarize per-class outcomes and record the cycle
//!
//! ## Failure handling
//!
//! A recognizer failure aborts the cycle before classification. A write
//! failure affects only its own class and never updates the throttle ledger.

use crate::clock::Clock;
use crate::cycle_log_service::CycleLogService;
use crate::detection_classifier::{classify, Classification, ClassificationStatus, ClassifierPolicy, PinDecision};
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::location_tracker::LocationTracker;
use crate::media_capture::{CameraSession, FrameSource};
use crate::pin_store::{GeoPoint, Pin, PinDraft, PinStore};
use crate::pin_synchronizer::{MarkerRenderer, PinSynchronizer};
use crate::recognizer_client::Recognizer;
use crate::throttle_ledger::ThrottleLedger;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of one qualifying class
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PinOutcome {
    Created { pin: Pin },
    /// Inside the class cooldown; no write attempted
    Throttled { remaining_ms: i64 },
    Failed { reason: String },
}

/// Per-class line of a cycle report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassOutcome {
    pub class_name: String,
    pub confidence: f64,
    #[serde(flatten)]
    pub outcome: PinOutcome,
}

/// Completed cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub position: Option<GeoPoint>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub prediction_count: usize,
    pub classification: Classification,
    pub outcomes: Vec<ClassOutcome>,
    pub pins_created: usize,
    /// Writes actually attempted (throttled classes excluded)
    pub pins_attempted: usize,
    pub status_message: String,
    pub summary: String,
}

impl CycleReport {
    pub fn new(
        completed_at: DateTime<Utc>,
        position: Option<GeoPoint>,
        classification: Classification,
        outcomes: Vec<ClassOutcome>,
    ) -> Self {
        let pins_created = outcomes
            .iter()
            .filter(|o| matches!(o.outcome, PinOutcome::Created { .. }))
            .count();
        let pins_failed = outcomes
            .iter()
            .filter(|o| matches!(o.outcome, PinOutcome::Failed { .. }))
            .count();
        let pins_attempted = pins_created + pins_failed;

        let summary = match &classification.status {
            ClassificationStatus::Qualified {
                valid, categories, ..
            } if pins_failed > 0 => format!(
                "Analysis complete: {} objects detected across {} categories. {} of {} pins created.",
                valid, categories, pins_created, pins_attempted
            ),
            ClassificationStatus::Qualified {
                valid, categories, ..
            } if pins_attempted == 0 && !outcomes.is_empty() => format!(
                "Analysis complete: {} objects detected across {} categories. No pins created (cooldown active).",
                valid, categories
            ),
            _ => classification.summary_message(pins_created),
        };

        Self {
            cycle_id: 0,
            completed_at,
            elapsed_ms: 0,
            position,
            frame_width: 0,
            frame_height: 0,
            prediction_count: classification.overlays.len(),
            status_message: classification.status_message(),
            classification,
            outcomes,
            pins_created,
            pins_attempted,
            summary,
        }
    }
}

/// CaptureOrchestrator instance
pub struct CaptureOrchestrator<Rz, S, R> {
    recognizer: Arc<Rz>,
    synchronizer: Arc<PinSynchronizer<S, R>>,
    ledger: Arc<ThrottleLedger>,
    policy: ClassifierPolicy,
    identity: Arc<IdentityService>,
    location: Arc<LocationTracker>,
    cycle_log: Arc<CycleLogService>,
    clock: Arc<dyn Clock>,
    cycle_lock: Mutex<()>,
}

impl<Rz, S, R> CaptureOrchestrator<Rz, S, R>
where
    Rz: Recognizer,
    S: PinStore,
    R: MarkerRenderer,
{
    /// Create new CaptureOrchestrator
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recognizer: Arc<Rz>,
        synchronizer: Arc<PinSynchronizer<S, R>>,
        ledger: Arc<ThrottleLedger>,
        policy: ClassifierPolicy,
        identity: Arc<IdentityService>,
        location: Arc<LocationTracker>,
        cycle_log: Arc<CycleLogService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            recognizer,
            synchronizer,
            ledger,
            policy,
            identity,
            location,
            cycle_log,
            clock,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one capture-and-classify cycle on an open camera session
    pub async fn run_cycle<F: FrameSource>(&self, session: &CameraSession<F>) -> Result<CycleReport> {
        let _in_flight = self
            .cycle_lock
            .try_lock()
            .map_err(|_| Error::Conflict("A capture is already being analyzed".to_string()))?;

        if self.location.current_fix().is_err() {
            return Err(Error::LocationUnavailable(
                "Location required for pin placement".to_string(),
            ));
        }

        let frame = session.grab().await?;
        let started = std::time::Instant::now();
        let (width, height) = (frame.width, frame.height);

        tracing::info!(bytes = frame.data.len(), width = width, height = height, "Capture cycle started");

        let recognition = self.recognizer.detect(frame.data).await.map_err(|e| {
            tracing::warn!(error = %e, "Capture cycle aborted");
            match e {
                Error::Recognition(_) | Error::ConfigurationMissing(_) => e,
                other => Error::Recognition(other.to_string()),
            }
        })?;

        let classification = classify(&recognition.predictions, &self.policy);
        tracing::debug!(
            predictions = recognition.predictions.len(),
            decisions = classification.decisions.len(),
            "Detections classified"
        );

        let mut outcomes = Vec::with_capacity(classification.decisions.len());
        for decision in &classification.decisions {
            let outcome = self.resolve(decision).await;
            outcomes.push(ClassOutcome {
                class_name: decision.class_name.clone(),
                confidence: decision.best.confidence,
                outcome,
            });
        }

        let position = self
            .location
            .current_fix()
            .ok()
            .map(|fix| GeoPoint {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });

        let mut report = CycleReport::new(self.clock.now(), position, classification, outcomes);
        report.frame_width = width;
        report.frame_height = height;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        let report = self.cycle_log.record(report).await;
        tracing::info!(
            cycle_id = report.cycle_id,
            pins_created = report.pins_created,
            pins_attempted = report.pins_attempted,
            "Capture cycle completed"
        );
        Ok(report)
    }

    async fn resolve(&self, decision: &PinDecision) -> PinOutcome {
        let now = self.clock.now();
        if let Some(remaining) = self.ledger.remaining(&decision.class_name, now).await {
            tracing::info!(object_name = %decision.class_name, "Pin throttled");
            return PinOutcome::Throttled {
                remaining_ms: remaining.num_milliseconds(),
            };
        }

        match self.create_pin(decision, now).await {
            Ok(pin) => PinOutcome::Created { pin },
            Err(e) => {
                tracing::error!(object_name = %decision.class_name, error = %e, "Pin creation failed");
                PinOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Write one pin for a qualifying class
    ///
    /// The detection count stays local; the draft carries only the best
    /// detection's class and confidence. A successful write starts the
    /// cooldown at `decided_at`, the instant the throttle was checked.
    pub async fn create_pin(&self, decision: &PinDecision, decided_at: DateTime<Utc>) -> Result<Pin> {
        let identity = self.identity.require().await?;
        let fix = self.location.current_fix()?;

        if !self.synchronizer.is_connected() {
            return Err(Error::Write("Store connection required to save pins".to_string()));
        }

        let draft = PinDraft {
            object_name: decision.class_name.clone(),
            position: GeoPoint {
                latitude: fix.latitude,
                longitude: fix.longitude,
            },
            confidence: Some(decision.best.confidence),
            user_id: identity.user_id,
        };

        let pin = self.synchronizer.write(draft).await?;
        self.ledger.record(&decision.class_name, decided_at).await;

        tracing::info!(
            pin_id = %pin.id,
            object_name = %decision.class_name,
            detections = decision.count,
            "Pin created automatically"
        );
        Ok(pin)
    }

    pub fn policy(&self) -> ClassifierPolicy {
        self.policy
    }

    pub fn ledger(&self) -> &Arc<ThrottleLedger> {
        &self.ledger
    }
}
