//! OCR capability for extracting text from rendered page images.
//!
//! The pipeline talks to a remote OCR service through the [`OcrReader`]
//! trait; tests inject deterministic fakes. Per-image failures degrade to an
//! empty string in batch mode so later stages always see a stable page count.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::OcrSettings;

/// Errors from a single OCR extraction.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-image text extraction capability.
#[async_trait]
pub trait OcrReader: Send + Sync {
    /// Extract text from one page image.
    async fn extract(&self, image_path: &Path) -> Result<String, OcrError>;

    /// Health probe for the backing service.
    async fn ready(&self) -> bool;

    /// Extract text from every image, preserving order.
    ///
    /// A failed image yields an empty string rather than aborting the batch;
    /// the orchestrator decides whether an all-empty result is fatal.
    async fn extract_batch(&self, image_paths: &[std::path::PathBuf]) -> Vec<String> {
        let mut results = Vec::with_capacity(image_paths.len());
        for (idx, path) in image_paths.iter().enumerate() {
            match self.extract(path).await {
                Ok(text) => results.push(text),
                Err(e) => {
                    warn!("OCR failed for page {}: {}", idx + 1, e);
                    results.push(String::new());
                }
            }
        }
        results
    }
}

/// Retry `attempt` with exponential backoff, but only for transport errors.
///
/// A service that answered with an API or parse error will answer the same
/// way again, so those are returned immediately.
pub async fn with_backoff<T, F, Fut>(
    max_retries: u32,
    base_delay_secs: f64,
    mut attempt: F,
) -> Result<T, OcrError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OcrError>>,
{
    let mut last_err = None;

    for round in 0..=max_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(OcrError::Connection(msg)) => {
                warn!("OCR attempt {}/{} failed: {}", round + 1, max_retries + 1, msg);
                last_err = Some(OcrError::Connection(msg));
                if round < max_retries {
                    let delay = base_delay_secs * 2f64.powi(round as i32);
                    debug!("Retrying OCR after {:.2}s", delay);
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| OcrError::Connection("retries exhausted".to_string())))
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: String,
}

/// HTTP OCR client with retry and exponential backoff on transport errors.
pub struct HttpOcrReader {
    settings: OcrSettings,
    client: reqwest::Client,
}

impl HttpOcrReader {
    pub fn new(settings: OcrSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { settings, client })
    }

    async fn extract_once(&self, image_path: &Path) -> Result<String, OcrError> {
        let bytes = std::fs::read(image_path)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let url = format!("{}/ocr", self.settings.endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "image": encoded,
                "preserve_layout": true,
                "detect_tables": true,
                "language": "en",
            }))
            .send()
            .await
            .map_err(|e| OcrError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(OcrError::Api(format!("HTTP {}: {}", status, body)));
        }

        let parsed: OcrResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Parse(e.to_string()))?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl OcrReader for HttpOcrReader {
    async fn extract(&self, image_path: &Path) -> Result<String, OcrError> {
        let text = with_backoff(
            self.settings.max_retries,
            self.settings.retry_delay_secs,
            || self.extract_once(image_path),
        )
        .await?;
        info!(
            "OCR extracted {} characters from {}",
            text.len(),
            image_path.display()
        );
        Ok(text)
    }

    async fn ready(&self) -> bool {
        let url = format!("{}/health", self.settings.endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
