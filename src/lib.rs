//! ICE Tracker Session Library
//!
//! Geotagged object sightings: field clients upload camera captures, a
//! hosted recognizer finds objects, corroborated classes become map pins
//! shared live with every connected client.
//!
//! ## Architecture
//!
//! 1. AgeColorizer - Pin age to color bucket
//! 2. ThrottleLedger - Per-class pin cooldown
//! 3. DetectionClassifier - Detections to pin decisions
//! 4. PinStore - Realtime pin collection
//! 5. PinSynchronizer - Live marker view over the store
//! 6. RecognizerClient - Hosted recognition adapter
//! 7. CaptureOrchestrator - Capture-and-classify cycle
//! 8. ColorRefresh - Periodic marker recolor
//! 9. LocationTracker / MediaCapture / Identity - Session collaborators
//! 10. RealtimeHub - WebSocket distribution and marker rendering
//! 11. WebAPI - REST API endpoints

pub mod age_colorizer;
pub mod capture_orchestrator;
pub mod clock;
pub mod color_refresh;
pub mod cycle_log_service;
pub mod detection_classifier;
pub mod identity;
pub mod location_tracker;
pub mod media_capture;
pub mod models;
pub mod pin_store;
pub mod pin_synchronizer;
pub mod realtime_hub;
pub mod recognizer_client;
pub mod throttle_ledger;
pub mod web_api;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
