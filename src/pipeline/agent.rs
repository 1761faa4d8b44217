//! Uniform execution of LLM-driven pipeline stages.
//!
//! Every agent stage follows the same path: build a prompt, call the
//! completer, shape the response. Failures never propagate as errors; they
//! shape the outcome so the orchestrator can attribute them to the stage.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use super::json_extract::extract_json_object;
use crate::llm::{CompletionRequest, TextCompleter};
use crate::models::TokenUsage;

/// Expected response shape of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    /// Return the completion content verbatim.
    Text,
    /// Extract and parse the outermost balanced JSON object.
    Json,
}

/// Outcome of one agent stage.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub data: Value,
    pub success: bool,
    pub error: Option<String>,
    pub tokens: TokenUsage,
    pub duration_seconds: f64,
}

impl AgentOutcome {
    /// The stage's text payload, for `ExpectedShape::Text` stages.
    pub fn text(&self) -> &str {
        self.data.as_str().unwrap_or("")
    }
}

/// Executes agent stages against a [`TextCompleter`].
#[derive(Clone)]
pub struct AgentRunner {
    completer: Arc<dyn TextCompleter>,
}

impl AgentRunner {
    pub fn new(completer: Arc<dyn TextCompleter>) -> Self {
        Self { completer }
    }

    pub fn model_id(&self) -> String {
        self.completer.model_id()
    }

    /// Run one stage: prompt in, shaped outcome out.
    pub async fn run(
        &self,
        stage: &str,
        prompt: String,
        image: Option<String>,
        shape: ExpectedShape,
    ) -> AgentOutcome {
        let started = Instant::now();

        let mut request = CompletionRequest::text(prompt);
        if let Some(data_url) = image {
            request = request.with_image(data_url);
        }
        if shape == ExpectedShape::Json {
            request = request.json();
        }

        let completion = self.completer.complete(request).await;
        let duration_seconds = started.elapsed().as_secs_f64();

        if !completion.ok {
            let error = completion
                .error
                .unwrap_or_else(|| "unknown completion error".to_string());
            debug!("Stage {} completion failed: {}", stage, error);
            return AgentOutcome {
                data: Value::Null,
                success: false,
                error: Some(error),
                tokens: completion.tokens,
                duration_seconds,
            };
        }

        let data = match shape {
            ExpectedShape::Text => Value::String(completion.content),
            ExpectedShape::Json => extract_json_object(&completion.content),
        };

        AgentOutcome {
            data,
            success: true,
            error: None,
            tokens: completion.tokens,
            duration_seconds,
        }
    }
}

/// Document-type classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// One of bank_statement, invoice, receipt, generic.
    pub document_type: String,
    pub confidence: f64,
    pub reasoning: String,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            document_type: "generic".to_string(),
            confidence: 0.0,
            reasoning: String::new(),
        }
    }
}

impl AgentRunner {
    /// Classify a document from its first page image.
    ///
    /// Best-effort: completion or parse failures degrade to `generic` with
    /// zero confidence instead of failing the caller.
    pub async fn classify(&self, image_data_url: String) -> Classification {
        let outcome = self
            .run(
                "classify",
                super::prompts::classification_prompt(),
                Some(image_data_url),
                ExpectedShape::Json,
            )
            .await;

        if !outcome.success {
            return Classification {
                reasoning: format!(
                    "Classification failed: {}",
                    outcome.error.unwrap_or_default()
                ),
                ..Default::default()
            };
        }

        let document_type = outcome.data["document_type"]
            .as_str()
            .filter(|t| ["bank_statement", "invoice", "receipt", "generic"].contains(t))
            .unwrap_or("generic")
            .to_string();

        Classification {
            document_type,
            confidence: outcome.data["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0),
            reasoning: outcome.data["reasoning"].as_str().unwrap_or("").to_string(),
        }
    }
}
