//! LocationTracker - Current Device Position
//!
//! ## Responsibilities
//!
//! - Hold the latest location fix reported by the field client
//! - Expose a status line for the UI
//! - Enforce fix staleness and bounded waits
//!
//! Fixes and errors arrive as continuous updates; consumers observe them
//! through a `watch` subscription instead of callbacks.

use crate::clock::Clock;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// One position reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters
    pub accuracy_m: f64,
    pub observed_at: DateTime<Utc>,
}

/// Geolocation failure reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationErrorKind {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unknown,
}

/// Location status
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LocationStatus {
    /// No fix reported yet
    NotAvailable,
    Active { accuracy_m: f64 },
    Failed { kind: LocationErrorKind },
}

impl LocationStatus {
    pub fn text(&self) -> String {
        match self {
            LocationStatus::NotAvailable => "Location: Not Available".to_string(),
            LocationStatus::Active { accuracy_m } => {
                format!("Location: Active (±{}m)", accuracy_m.round() as i64)
            }
            LocationStatus::Failed { kind } => match kind {
                LocationErrorKind::PermissionDenied => "Location: Permission Denied",
                LocationErrorKind::PositionUnavailable => "Location: Position Unavailable",
                LocationErrorKind::Timeout => "Location: Timeout",
                LocationErrorKind::Unknown => "Location: Unknown Error",
            }
            .to_string(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LocationStatus::Active { .. })
    }
}

/// Snapshot published to subscribers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationState {
    pub fix: Option<LocationFix>,
    pub status: LocationStatus,
}

/// Staleness and wait bounds
#[derive(Debug, Clone, Copy)]
pub struct LocationPolicy {
    /// Longest wait for a first fix
    pub timeout: Duration,
    /// Oldest fix that may be reused
    pub max_age: Duration,
}

impl Default for LocationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_age: Duration::from_secs(60),
        }
    }
}

/// LocationTracker instance
pub struct LocationTracker {
    policy: LocationPolicy,
    clock: Arc<dyn Clock>,
    tx: watch::Sender<LocationState>,
}

impl LocationTracker {
    /// Create new LocationTracker
    pub fn new(policy: LocationPolicy, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = watch::channel(LocationState {
            fix: None,
            status: LocationStatus::NotAvailable,
        });
        Self { policy, clock, tx }
    }

    /// Record a new fix
    pub fn report_fix(&self, latitude: f64, longitude: f64, accuracy_m: f64) -> Result<LocationFix> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::Validation(format!(
                "Coordinates out of range: {}, {}",
                latitude, longitude
            )));
        }
        if !accuracy_m.is_finite() || accuracy_m < 0.0 {
            return Err(Error::Validation(format!("Invalid accuracy: {}", accuracy_m)));
        }

        let fix = LocationFix {
            latitude,
            longitude,
            accuracy_m,
            observed_at: self.clock.now(),
        };
        self.tx.send_replace(LocationState {
            fix: Some(fix),
            status: LocationStatus::Active { accuracy_m },
        });

        tracing::debug!(latitude = latitude, longitude = longitude, accuracy_m = accuracy_m, "Location fix updated");
        Ok(fix)
    }

    /// Record a geolocation error; the last fix is kept but ages out normally
    pub fn report_error(&self, kind: LocationErrorKind) {
        self.tx.send_modify(|state| {
            state.status = LocationStatus::Failed { kind };
        });
        tracing::warn!(kind = ?kind, "Location error");
    }

    /// Fix no older than the max age
    pub fn current_fix(&self) -> Result<LocationFix> {
        let state = *self.tx.borrow();
        let fix = state
            .fix
            .ok_or_else(|| Error::LocationUnavailable(state.status.text()))?;

        let age = self.clock.now() - fix.observed_at;
        let max_age = chrono::Duration::from_std(self.policy.max_age)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        if age > max_age {
            return Err(Error::LocationUnavailable(format!(
                "Location fix is stale ({}s old)",
                age.num_seconds()
            )));
        }
        Ok(fix)
    }

    /// Current fix, or wait for the next one up to the timeout
    pub async fn wait_for_fix(&self) -> Result<LocationFix> {
        let mut rx = self.tx.subscribe();
        if let Ok(fix) = self.current_fix() {
            return Ok(fix);
        }

        let waited = tokio::time::timeout(self.policy.timeout, async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let state = *rx.borrow_and_update();
                if let Some(fix) = state.fix {
                    if matches!(state.status, LocationStatus::Active { .. }) {
                        return Some(fix);
                    }
                }
            }
        })
        .await;

        match waited {
            Ok(Some(fix)) => Ok(fix),
            Ok(None) => Err(Error::LocationUnavailable("Location source closed".to_string())),
            Err(_) => {
                self.report_error(LocationErrorKind::Timeout);
                Err(Error::LocationUnavailable(
                    LocationStatus::Failed {
                        kind: LocationErrorKind::Timeout,
                    }
                    .text(),
                ))
            }
        }
    }

    pub fn status(&self) -> LocationStatus {
        self.tx.borrow().status
    }

    /// Subscribe to fix/status updates
    pub fn subscribe(&self) -> watch::Receiver<LocationState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn tracker(timeout_ms: u64) -> (Arc<ManualClock>, LocationTracker) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let policy = LocationPolicy {
            timeout: Duration::from_millis(timeout_ms),
            max_age: Duration::from_secs(60),
        };
        (clock.clone(), LocationTracker::new(policy, clock))
    }

    #[test]
    fn test_status_text() {
        assert_eq!(LocationStatus::NotAvailable.text(), "Location: Not Available");
        assert_eq!(
            LocationStatus::Active { accuracy_m: 12.4 }.text(),
            "Location: Active (±12m)"
        );
        assert_eq!(
            LocationStatus::Failed {
                kind: LocationErrorKind::PermissionDenied
            }
            .text(),
            "Location: Permission Denied"
        );
    }

    #[test]
    fn test_no_fix_is_unavailable() {
        let (_, t) = tracker(100);
        assert!(matches!(t.current_fix(), Err(Error::LocationUnavailable(_))));
    }

    #[test]
    fn test_fix_ages_out() {
        let (clock, t) = tracker(100);
        t.report_fix(40.0, -74.0, 5.0).unwrap();
        clock.advance(chrono::Duration::seconds(60));
        assert!(t.current_fix().is_ok());
        clock.advance(chrono::Duration::seconds(1));
        assert!(matches!(t.current_fix(), Err(Error::LocationUnavailable(_))));
    }

    #[test]
    fn test_error_keeps_status_and_fix() {
        let (_, t) = tracker(100);
        t.report_fix(40.0, -74.0, 5.0).unwrap();
        t.report_error(LocationErrorKind::PositionUnavailable);
        assert_eq!(t.status().text(), "Location: Position Unavailable");
        assert!(t.current_fix().is_ok());
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let (_, t) = tracker(100);
        assert!(matches!(t.report_fix(91.0, 0.0, 5.0), Err(Error::Validation(_))));
        assert!(matches!(t.report_fix(0.0, 0.0, -1.0), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_wait_for_fix_times_out() {
        let (_, t) = tracker(50);
        let result = t.wait_for_fix().await;
        assert!(matches!(result, Err(Error::LocationUnavailable(_))));
        assert_eq!(t.status().text(), "Location: Timeout");
    }

    #[tokio::test]
    async fn test_wait_for_fix_receives_update() {
        let (_, t) = tracker(2_000);
        let t = Arc::new(t);
        let reporter = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reporter.report_fix(1.5, 2.5, 8.0).unwrap();
        });

        let fix = t.wait_for_fix().await.unwrap();
        assert_eq!(fix.latitude, 1.5);
        assert!(t.status().is_active());
    }
}
