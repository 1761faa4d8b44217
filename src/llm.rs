//! LLM completion capability.
//!
//! The pipeline agents go through the [`TextCompleter`] trait; the shipped
//! implementation speaks the Ollama generate API. Completions never surface
//! as `Err`: model-side failures come back as `Completion { ok: false, .. }`
//! so the orchestrator can attribute them to a stage.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmSettings;
use crate::models::TokenUsage;

/// A single completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Optional image as a `data:image/png;base64,...` URL for vision models.
    pub image: Option<String>,
    /// When set, ask the backend for JSON-only output.
    pub json_mode: bool,
    /// Override the configured max tokens for this call.
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, data_url: impl Into<String>) -> Self {
        self.image = Some(data_url.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Result envelope for a completion call.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub ok: bool,
    pub content: String,
    pub tokens: TokenUsage,
    /// Classified error message when `ok` is false.
    pub error: Option<String>,
}

impl Completion {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Prompt-based completion capability.
#[async_trait]
pub trait TextCompleter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Completion;

    /// Whether the backing service is reachable.
    async fn is_available(&self) -> bool;

    /// Model identifier for logging and persisted metadata.
    fn model_id(&self) -> String;
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
    stop: Vec<String>,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: i64,
    #[serde(default)]
    eval_count: i64,
}

/// Completion client for an Ollama-compatible endpoint.
pub struct OllamaCompleter {
    settings: LlmSettings,
    client: reqwest::Client,
}

impl OllamaCompleter {
    pub fn new(settings: LlmSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { settings, client })
    }

    /// Stop sequences that cut off the trailing commentary some models add.
    fn stop_sequences() -> Vec<String> {
        ["\n\n---", "Note:", "Summary:"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn call_once(&self, request: &CompletionRequest) -> Result<Completion, String> {
        let images = request.image.as_ref().map(|data_url| {
            // The wire payload wants bare base64, not the data-URL wrapper.
            let raw = data_url
                .split_once(',')
                .map(|(_, b64)| b64)
                .unwrap_or(data_url);
            vec![raw.to_string()]
        });

        let payload = OllamaRequest {
            model: self.settings.model.clone(),
            prompt: request.prompt.clone(),
            stream: false,
            images,
            format: request.json_mode.then(|| "json".to_string()),
            options: OllamaOptions {
                temperature: self.settings.temperature,
                num_predict: request.max_tokens.unwrap_or(self.settings.max_tokens),
                stop: Self::stop_sequences(),
            },
        };

        let url = format!(
            "{}/api/generate",
            self.settings.endpoint.trim_end_matches('/')
        );

        let mut req = self.client.post(&url).json(&payload);
        if !self.settings.api_key.is_empty() {
            req = req.bearer_auth(&self.settings.api_key);
        }

        // Transport errors are the retryable kind; everything past this point
        // is a definitive answer from the service.
        let resp = req.send().await.map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Ok(Completion::failure(format!(
                "LLM API error: HTTP {}: {}",
                status, body
            )));
        }

        let parsed: OllamaResponse = match resp.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(Completion::failure(format!(
                    "LLM response parse error: {}",
                    e
                )))
            }
        };

        Ok(Completion {
            ok: true,
            content: parsed.response,
            tokens: TokenUsage {
                prompt: parsed.prompt_eval_count,
                completion: parsed.eval_count,
                total: parsed.prompt_eval_count + parsed.eval_count,
            },
            error: None,
        })
    }
}

#[async_trait]
impl TextCompleter for OllamaCompleter {
    async fn complete(&self, request: CompletionRequest) -> Completion {
        debug!(
            "Sending completion request, prompt length: {}",
            request.prompt.len()
        );

        let mut last_error = String::new();
        for attempt in 0..=self.settings.max_retries {
            match self.call_once(&request).await {
                Ok(completion) => return completion,
                Err(transport_err) => {
                    warn!(
                        "LLM call attempt {}/{} failed: {}",
                        attempt + 1,
                        self.settings.max_retries + 1,
                        transport_err
                    );
                    last_error = transport_err;
                    if attempt < self.settings.max_retries {
                        let delay = self.settings.retry_delay_secs * 2f64.powi(attempt as i32);
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    }
                }
            }
        }

        Completion::failure(format!("LLM connection error: {}", last_error))
    }

    async fn is_available(&self) -> bool {
        let url = format!(
            "{}/api/version",
            self.settings.endpoint.trim_end_matches('/')
        );
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model_id(&self) -> String {
        self.settings.model.clone()
    }
}

/// Encode raw image bytes as a PNG data URL for vision prompts.
pub fn image_to_data_url(bytes: &[u8]) -> String {
    use base64::Engine;
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_envelope() {
        let c = Completion::failure("boom");
        assert!(!c.ok);
        assert_eq!(c.error.as_deref(), Some("boom"));
        assert!(c.content.is_empty());
        assert_eq!(c.tokens, TokenUsage::default());
    }

    #[test]
    fn test_request_builders() {
        let req = CompletionRequest::text("hello").json().with_image("data:image/png;base64,AAAA");
        assert!(req.json_mode);
        assert_eq!(req.image.as_deref(), Some("data:image/png;base64,AAAA"));
        assert_eq!(req.prompt, "hello");
    }

    #[test]
    fn test_image_to_data_url() {
        let url = image_to_data_url(b"\x89PNG");
        assert!(url.starts_with("data:image/png;base64,"));
    }
}
