//! ThrottleLedger - Per-Class Pin Cooldown
//!
//! ## Responsibilities
//!
//! - Remember when the last pin for each object class was created locally
//! - Refuse a new pin for the same class inside the cooldown window
//!
//! The gate is local to this session. Two sessions can still pin the same
//! class at nearly the same moment.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cooldown policy
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    /// Minimum interval between two pins of the same class
    pub cooldown: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::milliseconds(30_000),
        }
    }
}

/// ThrottleLedger instance
///
/// One entry per class label ever pinned. Entries are overwritten, never
/// evicted; the label set is bounded by the recognizer's vocabulary.
pub struct ThrottleLedger {
    policy: ThrottlePolicy,
    last_pin: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ThrottleLedger {
    /// Create new ThrottleLedger
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            last_pin: RwLock::new(HashMap::new()),
        }
    }

    /// True when a pin for `object_name` was recorded less than the cooldown before `now`
    pub async fn should_throttle(&self, object_name: &str, now: DateTime<Utc>) -> bool {
        let last_pin = self.last_pin.read().await;
        match last_pin.get(object_name) {
            Some(last) => now - *last < self.policy.cooldown,
            None => false,
        }
    }

    /// Record a successful pin
    pub async fn record(&self, object_name: &str, now: DateTime<Utc>) {
        let mut last_pin = self.last_pin.write().await;
        last_pin.insert(object_name.to_string(), now);
        tracing::debug!(object_name = %object_name, "Pin recorded in throttle ledger");
    }

    /// Time left in the cooldown for `object_name`, if any
    pub async fn remaining(&self, object_name: &str, now: DateTime<Utc>) -> Option<Duration> {
        let last_pin = self.last_pin.read().await;
        let last = last_pin.get(object_name)?;
        let left = self.policy.cooldown - (now - *last);
        (left > Duration::zero()).then_some(left)
    }

    /// Number of classes with an entry
    pub async fn len(&self) -> usize {
        self.last_pin.read().await.len()
    }

    pub fn policy(&self) -> ThrottlePolicy {
        self.policy
    }
}

impl Default for ThrottleLedger {
    fn default() -> Self {
        Self::new(ThrottlePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_no_record_no_throttle() {
        let ledger = ThrottleLedger::default();
        assert!(!ledger.should_throttle("bottle", t0()).await);
    }

    #[tokio::test]
    async fn test_inside_window_throttled() {
        let ledger = ThrottleLedger::default();
        ledger.record("bottle", t0()).await;

        assert!(ledger.should_throttle("bottle", t0()).await);
        assert!(
            ledger
                .should_throttle("bottle", t0() + Duration::milliseconds(29_999))
                .await
        );
    }

    #[tokio::test]
    async fn test_window_edge_releases() {
        let ledger = ThrottleLedger::default();
        ledger.record("bottle", t0()).await;

        assert!(
            !ledger
                .should_throttle("bottle", t0() + Duration::milliseconds(30_000))
                .await
        );
        assert!(
            !ledger
                .should_throttle("bottle", t0() + Duration::minutes(5))
                .await
        );
    }

    #[tokio::test]
    async fn test_classes_are_independent() {
        let ledger = ThrottleLedger::default();
        ledger.record("bottle", t0()).await;
        assert!(!ledger.should_throttle("can", t0()).await);
    }

    #[tokio::test]
    async fn test_record_overwrites() {
        let ledger = ThrottleLedger::default();
        ledger.record("bottle", t0()).await;
        ledger.record("bottle", t0() + Duration::seconds(40)).await;

        assert!(
            ledger
                .should_throttle("bottle", t0() + Duration::seconds(50))
                .await
        );
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_custom_cooldown() {
        let ledger = ThrottleLedger::new(ThrottlePolicy {
            cooldown: Duration::seconds(5),
        });
        ledger.record("can", t0()).await;
        assert_eq!(
            ledger.remaining("can", t0() + Duration::seconds(2)).await,
            Some(Duration::seconds(3))
        );
        assert!(!ledger.should_throttle("can", t0() + Duration::seconds(5)).await);
    }
}
