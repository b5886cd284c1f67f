//! RecognizerClient - Hosted Object Recognition Adapter
//!
//! ## Responsibilities
//!
//! - Submit one captured JPEG to the hosted model
//! - Parse the prediction list
//! - Track recognizer connectivity
//!
//! A malformed response is an error, never an empty prediction list.
//! There is no retry: a repeat is a new capture.

use crate::detection_classifier::Detection;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Object recognizer seam
pub trait Recognizer: Send + Sync + 'static {
    /// Run detection on one JPEG frame
    fn detect(&self, image_jpeg: Vec<u8>) -> impl Future<Output = Result<RecognitionResult>> + Send;

    /// Connectivity as of the last call
    fn is_connected(&self) -> bool;
}

/// Recognizer connection settings
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model_id: String,
    pub model_version: String,
    pub timeout: Duration,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://detect.roboflow.com".to_string(),
            api_key: None,
            model_id: "fmy-first-project-ulnpd".to_string(),
            model_version: "1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Source image dimensions echoed by the model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

/// Detection response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub predictions: Vec<Detection>,

    #[serde(default)]
    pub image: Option<ImageInfo>,

    /// Server-side inference time in seconds
    #[serde(default)]
    pub time: Option<f64>,
}

/// Parse a response body; `predictions` is required
pub fn parse_response(body: &str) -> Result<RecognitionResult> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Error::Recognition(format!("Invalid response from recognizer: {}", e)))?;

    if value.get("predictions").map_or(true, |p| !p.is_array()) {
        return Err(Error::Recognition(
            "Invalid response from recognizer: missing predictions".to_string(),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| Error::Recognition(format!("Invalid response from recognizer: {}", e)))
}

/// Hosted recognizer client
pub struct RecognizerClient {
    client: reqwest::Client,
    config: RecognizerConfig,
    api_key: String,
    connected: AtomicBool,
}

impl RecognizerClient {
    /// Create from configuration; the API key is required
    pub fn from_config(config: RecognizerConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::ConfigurationMissing("RECOGNIZER_API_KEY is not set".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            api_key,
            connected: AtomicBool::new(false),
        })
    }

    /// Inference endpoint (without query string)
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model_id,
            self.config.model_version
        )
    }

    /// Check that the recognizer host answers at all
    pub async fn health_check(&self) -> Result<bool> {
        match self.client.get(&self.config.base_url).send().await {
            Ok(resp) => Ok(!resp.status().is_server_error()),
            Err(_) => Ok(false),
        }
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    async fn post_frame(&self, image_jpeg: Vec<u8>) -> Result<RecognitionResult> {
        let body = STANDARD.encode(&image_jpeg);

        let resp = self
            .client
            .post(self.endpoint())
            .query(&[("api_key", self.api_key.as_str()), ("name", "capture.jpg")])
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Recognition(format!("Recognizer unreachable: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Recognition(format!("Failed to read recognizer response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Recognition(format!(
                "Recognizer request failed: {} - {}",
                status, text
            )));
        }

        parse_response(&text)
    }
}

impl Recognizer for RecognizerClient {
    async fn detect(&self, image_jpeg: Vec<u8>) -> Result<RecognitionResult> {
        let bytes = image_jpeg.len();
        let started = std::time::Instant::now();

        let result = self.post_frame(image_jpeg).await;
        self.connected.store(result.is_ok(), Ordering::Relaxed);

        match &result {
            Ok(r) => tracing::info!(
                bytes = bytes,
                predictions = r.predictions.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Recognition completed"
            ),
            Err(e) => tracing::warn!(bytes = bytes, error = %e, "Recognition failed"),
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Recognizer as configured at startup
///
/// A missing configuration is reported on every capture instead of stopping
/// the session; map viewing keeps working without a recognizer.
pub enum RecognizerSlot {
    Ready(RecognizerClient),
    Missing(String),
}

impl RecognizerSlot {
    pub fn from_config(config: RecognizerConfig) -> Self {
        match RecognizerClient::from_config(config) {
            Ok(client) => RecognizerSlot::Ready(client),
            Err(e) => {
                tracing::error!(error = %e, "Recognizer not configured; captures disabled");
                RecognizerSlot::Missing(match e {
                    Error::ConfigurationMissing(reason) => reason,
                    other => other.to_string(),
                })
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, RecognizerSlot::Ready(_))
    }

    pub async fn health_check(&self) -> bool {
        match self {
            RecognizerSlot::Ready(client) => client.health_check().await.unwrap_or(false),
            RecognizerSlot::Missing(_) => false,
        }
    }
}

impl Recognizer for RecognizerSlot {
    async fn detect(&self, image_jpeg: Vec<u8>) -> Result<RecognitionResult> {
        match self {
            RecognizerSlot::Ready(client) => client.detect(image_jpeg).await,
            RecognizerSlot::Missing(reason) => Err(Error::ConfigurationMissing(reason.clone())),
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            RecognizerSlot::Ready(client) => client.is_connected(),
            RecognizerSlot::Missing(_) => false,
        }
    }
}
