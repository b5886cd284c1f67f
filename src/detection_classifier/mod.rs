//! DetectionClassifier - Detection List to Pin Decisions
//!
//! ## Responsibilities
//!
//! - Split detections by confidence threshold
//! - Count valid detections per class
//! - Decide which classes are corroborated enough for a pin
//! - Tag every detection with an overlay style for the preview
//!
//! A single detection of a class is treated as possibly spurious.
//! Repetition inside one capture is the corroboration signal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One object instance reported by the recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label
    #[serde(rename = "class")]
    pub class_name: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Bounding box center x (image pixels)
    #[serde(default)]
    pub x: f64,
    /// Bounding box center y (image pixels)
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        }
    }

    pub fn with_box(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }

    /// Top-left anchored rectangle, scaled for a preview surface
    pub fn rect(&self, scale: f64) -> OverlayRect {
        OverlayRect {
            left: (self.x - self.width / 2.0) * scale,
            top: (self.y - self.height / 2.0) * scale,
            width: self.width * scale,
            height: self.height * scale,
        }
    }

    fn confidence_percent(&self) -> i64 {
        (self.confidence * 100.0).round() as i64
    }
}

/// Classification policy
///
/// Both values are product tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierPolicy {
    /// Detections at or above this confidence are valid
    pub confidence_threshold: f64,
    /// Valid detections of one class needed to create a pin
    pub min_detections: usize,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            min_detections: 2,
        }
    }
}

impl ClassifierPolicy {
    fn threshold_percent(&self) -> i64 {
        (self.confidence_threshold * 100.0).round() as i64
    }
}

/// A class that qualifies for a pin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinDecision {
    pub class_name: String,
    /// Highest-confidence valid detection of the class
    pub best: Detection,
    /// Valid detections of the class in this capture; never persisted
    pub count: usize,
}

/// Preview style of one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayStyle {
    LowConfidence,
    WillCreatePin,
    ValidNoPin,
}

impl OverlayStyle {
    /// Border color used by the preview
    pub fn border_color(&self) -> &'static str {
        match self {
            OverlayStyle::LowConfidence => "#95a5a6",
            OverlayStyle::WillCreatePin => "#2ecc71",
            OverlayStyle::ValidNoPin => "#e74c3c",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            OverlayStyle::LowConfidence => "LOW CONFIDENCE",
            OverlayStyle::WillCreatePin => "PIN CREATED",
            OverlayStyle::ValidNoPin => "NO PIN",
        }
    }
}

/// Overlay rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Annotated detection for the preview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub detection: Detection,
    pub style: OverlayStyle,
    pub label: String,
    pub rect: OverlayRect,
}

/// Outcome of the classification step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationStatus {
    /// Recognizer returned nothing
    NoObjects,
    /// Detections exist but none met the threshold
    BelowThreshold { detected: usize, threshold: f64 },
    /// Valid detections exist but no class repeats enough
    NoQualifyingClass { valid: usize, categories: usize },
    /// At least one class qualifies
    Qualified {
        valid: usize,
        categories: usize,
        qualifying: usize,
    },
}

/// Classifier output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub decisions: Vec<PinDecision>,
    pub overlays: Vec<Overlay>,
    pub status: ClassificationStatus,
    #[serde(skip)]
    threshold_percent: i64,
    #[serde(skip)]
    min_detections: usize,
}

impl Classification {
    /// Status line shown before any pin is written
    pub fn status_message(&self) -> String {
        match &self.status {
            ClassificationStatus::NoObjects => "No objects detected - No pins created".to_string(),
            ClassificationStatus::BelowThreshold { detected, .. } => format!(
                "{} objects detected but confidence too low (need > {}%) - No pins created",
                detected, self.threshold_percent
            ),
            ClassificationStatus::NoQualifyingClass { valid, .. } => format!(
                "Analysis complete: {} objects detected but no category has {}+ objects. No pins created.",
                valid, self.min_detections
            ),
            ClassificationStatus::Qualified {
                valid,
                categories,
                qualifying,
            } => format!(
                "Analysis complete: {} objects detected across {} categories. {} categories qualify for pins.",
                valid, categories, qualifying
            ),
        }
    }

    /// Summary after writes: `created` pins made it to the store
    pub fn summary_message(&self, created: usize) -> String {
        match &self.status {
            ClassificationStatus::Qualified {
                valid, categories, ..
            } if created > 0 => format!(
                "Analysis complete: {} objects detected across {} categories. {} pins created automatically.",
                valid, categories, created
            ),
            ClassificationStatus::Qualified { valid, .. } => format!(
                "Analysis complete: {} objects detected but no category has {}+ objects. No pins created.",
                valid, self.min_detections
            ),
            _ => self.status_message(),
        }
    }

    pub fn threshold_percent(&self) -> i64 {
        self.threshold_percent
    }
}

/// Overlay style for one detection given the qualifying class set
pub fn overlay_style(
    detection: &Detection,
    policy: &ClassifierPolicy,
    qualifying: &[&str],
) -> OverlayStyle {
    if detection.confidence < policy.confidence_threshold {
        OverlayStyle::LowConfidence
    } else if qualifying.contains(&detection.class_name.as_str()) {
        OverlayStyle::WillCreatePin
    } else {
        OverlayStyle::ValidNoPin
    }
}

fn overlay(detection: &Detection, style: OverlayStyle) -> Overlay {
    Overlay {
        label: format!(
            "{} ({}%) - {}",
            detection.class_name,
            detection.confidence_percent(),
            style.suffix()
        ),
        rect: detection.rect(1.0),
        detection: detection.clone(),
        style,
    }
}

/// Classify one capture's detections
pub fn classify(detections: &[Detection], policy: &ClassifierPolicy) -> Classification {
    let threshold_percent = policy.threshold_percent();

    if detections.is_empty() {
        return Classification {
            decisions: Vec::new(),
            overlays: Vec::new(),
            status: ClassificationStatus::NoObjects,
            threshold_percent,
            min_detections: policy.min_detections,
        };
    }

    let valid: Vec<&Detection> = detections
        .iter()
        .filter(|d| d.confidence >= policy.confidence_threshold)
        .collect();

    if valid.is_empty() {
        return Classification {
            decisions: Vec::new(),
            overlays: detections
                .iter()
                .map(|d| overlay(d, OverlayStyle::LowConfidence))
                .collect(),
            status: ClassificationStatus::BelowThreshold {
                detected: detections.len(),
                threshold: policy.confidence_threshold,
            },
            threshold_percent,
            min_detections: policy.min_detections,
        };
    }

    // Group by class, keeping first-discovery order
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Detection>> = HashMap::new();
    for detection in &valid {
        let key = detection.class_name.as_str();
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(detection);
    }

    let mut decisions = Vec::new();
    for class_name in &order {
        let members = &groups[class_name];
        if members.len() < policy.min_detections {
            continue;
        }

        // Strict comparison keeps the first of equal confidences
        let best = members
            .iter()
            .skip(1)
            .copied()
            .fold(members[0], |best, current| {
                if current.confidence > best.confidence {
                    current
                } else {
                    best
                }
            });

        decisions.push(PinDecision {
            class_name: class_name.to_string(),
            best: best.clone(),
            count: members.len(),
        });
    }

    let qualifying: Vec<&str> = decisions.iter().map(|d| d.class_name.as_str()).collect();
    let overlays = detections
        .iter()
        .map(|d| overlay(d, overlay_style(d, policy, &qualifying)))
        .collect();

    let status = if decisions.is_empty() {
        ClassificationStatus::NoQualifyingClass {
            valid: valid.len(),
            categories: order.len(),
        }
    } else {
        ClassificationStatus::Qualified {
            valid: valid.len(),
            categories: order.len(),
            qualifying: decisions.len(),
        }
    };

    tracing::debug!(
        detected = detections.len(),
        valid = valid.len(),
        categories = order.len(),
        qualifying = decisions.len(),
        "Detections classified"
    );

    Classification {
        decisions,
        overlays,
        status,
        threshold_percent,
        min_detections: policy.min_detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ClassifierPolicy {
        ClassifierPolicy::default()
    }

    #[test]
    fn test_empty_detections() {
        let result = classify(&[], &policy());
        assert!(result.decisions.is_empty());
        assert!(result.overlays.is_empty());
        assert_eq!(result.status, ClassificationStatus::NoObjects);
        assert_eq!(result.status_message(), "No objects detected - No pins created");
    }

    #[test]
    fn test_single_detection_is_noise() {
        let result = classify(&[Detection::new("bottle", 0.9)], &policy());
        assert!(result.decisions.is_empty());
        assert_eq!(
            result.status,
            ClassificationStatus::NoQualifyingClass {
                valid: 1,
                categories: 1
            }
        );
        assert_eq!(result.overlays[0].style, OverlayStyle::ValidNoPin);
    }

    #[test]
    fn test_bottle_pair_with_low_can() {
        let detections = vec![
            Detection::new("bottle", 0.6),
            Detection::new("bottle", 0.9),
            Detection::new("can", 0.3),
        ];
        let result = classify(&detections, &policy());

        assert_eq!(result.decisions.len(), 1);
        let decision = &result.decisions[0];
        assert_eq!(decision.class_name, "bottle");
        assert_eq!(decision.best.confidence, 0.9);
        assert_eq!(decision.count, 2);

        let styles: Vec<_> = result.overlays.iter().map(|o| o.style).collect();
        assert_eq!(
            styles,
            vec![
                OverlayStyle::WillCreatePin,
                OverlayStyle::WillCreatePin,
                OverlayStyle::LowConfidence
            ]
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let detections = vec![Detection::new("can", 0.5), Detection::new("can", 0.5)];
        let result = classify(&detections, &policy());
        assert_eq!(result.decisions.len(), 1);
        assert_eq!(result.decisions[0].count, 2);
    }

    #[test]
    fn test_all_below_threshold() {
        let detections = vec![Detection::new("can", 0.2), Detection::new("can", 0.49)];
        let result = classify(&detections, &policy());
        assert!(result.decisions.is_empty());
        assert_eq!(
            result.status,
            ClassificationStatus::BelowThreshold {
                detected: 2,
                threshold: 0.5
            }
        );
        assert!(result
            .overlays
            .iter()
            .all(|o| o.style == OverlayStyle::LowConfidence));
        assert_eq!(
            result.status_message(),
            "2 objects detected but confidence too low (need > 50%) - No pins created"
        );
    }

    #[test]
    fn test_ties_keep_first_and_order_is_discovery_order() {
        let detections = vec![
            Detection::new("can", 0.7).with_box(1.0, 1.0, 2.0, 2.0),
            Detection::new("bottle", 0.8),
            Detection::new("can", 0.7).with_box(9.0, 9.0, 2.0, 2.0),
            Detection::new("bottle", 0.95),
        ];
        let result = classify(&detections, &policy());

        let names: Vec<_> = result.decisions.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["can", "bottle"]);
        assert_eq!(result.decisions[0].best.x, 1.0);
        assert_eq!(result.decisions[1].best.confidence, 0.95);
    }

    #[test]
    fn test_custom_policy() {
        let strict = ClassifierPolicy {
            confidence_threshold: 0.8,
            min_detections: 3,
        };
        let detections = vec![
            Detection::new("bottle", 0.9),
            Detection::new("bottle", 0.85),
            Detection::new("bottle", 0.7),
        ];
        assert!(classify(&detections, &strict).decisions.is_empty());
    }

    #[test]
    fn test_overlay_label_and_rect() {
        let detections = vec![
            Detection::new("bottle", 0.876).with_box(100.0, 50.0, 40.0, 20.0),
            Detection::new("bottle", 0.9),
        ];
        let result = classify(&detections, &policy());
        let first = &result.overlays[0];
        assert_eq!(first.label, "bottle (88%) - PIN CREATED");
        assert_eq!(first.rect.left, 80.0);
        assert_eq!(first.rect.top, 40.0);

        let scaled = first.detection.rect(0.5);
        assert_eq!(scaled.width, 20.0);
    }

    #[test]
    fn test_summary_message() {
        let detections = vec![Detection::new("bottle", 0.6), Detection::new("bottle", 0.7)];
        let result = classify(&detections, &policy());
        assert_eq!(
            result.summary_message(1),
            "Analysis complete: 2 objects detected across 1 categories. 1 pins created automatically."
        );
    }
}
