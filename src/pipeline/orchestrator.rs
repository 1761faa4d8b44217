//! Pipeline orchestration.
//!
//! Drives one statement through rasterize -> ocr -> cleanup -> extract ->
//! normalize -> postnorm, enforcing the contract between each pair of stages
//! and appending a processing log entry per transition. The orchestrator is
//! pure with respect to persistence: it returns an outcome envelope and the
//! job controller decides what to write.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::info;

use super::agent::{AgentRunner, ExpectedShape};
use super::confidence::ConfidenceScorer;
use super::normalize::Normalizer;
use super::prompts;
use crate::config::Settings;
use crate::llm::TextCompleter;
use crate::models::{ProcessingLogEntry, TokenUsage};
use crate::ocr::OcrReader;
use crate::pdf::PageRasterizer;

/// Sentinel joining per-page OCR text before cleanup.
pub const PAGE_BREAK: &str = "\n\n--- PAGE BREAK ---\n\n";

/// Aggregate figures for a finished (or failed) run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineMetadata {
    pub pdf_pages: i32,
    pub transactions_found: i32,
    pub overall_confidence: f64,
    pub total_duration: f64,
    pub tokens: TokenUsage,
    pub model: String,
}

/// Result envelope for one pipeline run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineOutcome {
    pub success: bool,
    /// Canonical extraction tree after normalization and postnorm.
    pub final_data: Value,
    pub validation_results: Value,
    /// Stage log entries in real-time order.
    pub logs: Vec<ProcessingLogEntry>,
    pub metadata: PipelineMetadata,
    pub errors: Vec<String>,
}

/// The five-stage extraction pipeline.
pub struct Pipeline {
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Arc<dyn OcrReader>,
    runner: AgentRunner,
    normalizer: Normalizer,
    scorer: ConfidenceScorer,
    cleanup_temp_files: bool,
}

impl Pipeline {
    pub fn new(
        settings: &Settings,
        rasterizer: Arc<dyn PageRasterizer>,
        ocr: Arc<dyn OcrReader>,
        completer: Arc<dyn TextCompleter>,
    ) -> Self {
        let normalizer = Normalizer::new(
            true,
            crate::pipeline::MaskOptions {
                mask_char: settings.pii.mask_char,
                show_last: settings.pii.show_last,
            },
        );
        Self {
            rasterizer,
            ocr,
            runner: AgentRunner::new(completer),
            normalizer,
            scorer: ConfidenceScorer::new(&settings.confidence),
            cleanup_temp_files: settings.storage.cleanup_temp_files,
        }
    }

    /// Run the full pipeline for one PDF, rendering page images into
    /// `work_dir`.
    pub async fn run(&self, pdf_path: &Path, work_dir: &Path) -> PipelineOutcome {
        let started = Instant::now();
        let mut logs = Vec::new();
        let mut tokens = TokenUsage::default();
        let mut images: Vec<PathBuf> = Vec::new();
        let mut pdf_pages = 0i32;

        let result = self
            .execute(pdf_path, work_dir, &mut logs, &mut tokens, &mut images, &mut pdf_pages)
            .await;

        if self.cleanup_temp_files && !images.is_empty() {
            self.rasterizer.cleanup(&images);
        }

        let total_duration = started.elapsed().as_secs_f64();

        match result {
            Ok((final_data, validation_results, overall_confidence)) => {
                let transactions_found = final_data["transactions"]
                    .as_array()
                    .map(|a| a.len() as i32)
                    .unwrap_or(0);
                info!(
                    "Pipeline complete in {:.2}s: {} transactions, confidence {:.2}",
                    total_duration, transactions_found, overall_confidence
                );
                PipelineOutcome {
                    success: true,
                    final_data,
                    validation_results,
                    logs,
                    metadata: PipelineMetadata {
                        pdf_pages,
                        transactions_found,
                        overall_confidence,
                        total_duration,
                        tokens,
                        model: self.runner.model_id(),
                    },
                    errors: Vec::new(),
                }
            }
            Err(error) => PipelineOutcome {
                success: false,
                final_data: json!({}),
                validation_results: json!({}),
                logs,
                metadata: PipelineMetadata {
                    pdf_pages,
                    transactions_found: 0,
                    overall_confidence: 0.0,
                    total_duration,
                    tokens,
                    model: self.runner.model_id(),
                },
                errors: vec![error],
            },
        }
    }

    async fn execute(
        &self,
        pdf_path: &Path,
        work_dir: &Path,
        logs: &mut Vec<ProcessingLogEntry>,
        tokens: &mut TokenUsage,
        images: &mut Vec<PathBuf>,
        pdf_pages: &mut i32,
    ) -> Result<(Value, Value, f64), String> {
        // Stage 1: rasterize. Atomic: any page that fails to render fails
        // the run.
        let stage_start = Instant::now();
        logs.push(ProcessingLogEntry::new("pdf_rasterize", "started"));

        let metadata = self
            .rasterizer
            .metadata(pdf_path)
            .await
            .map_err(|e| self.fail(logs, "pdf_rasterize", stage_start, e.to_string()))?;
        let rendered = self
            .rasterizer
            .rasterize(pdf_path, work_dir)
            .await
            .map_err(|e| self.fail(logs, "pdf_rasterize", stage_start, e.to_string()))?;

        if rendered.is_empty() {
            return Err(self.fail(
                logs,
                "pdf_rasterize",
                stage_start,
                "no pages rendered".to_string(),
            ));
        }

        *pdf_pages = rendered.len() as i32;
        *images = rendered;
        logs.push(
            ProcessingLogEntry::new("pdf_rasterize", "completed")
                .with_duration(stage_start.elapsed().as_secs_f64())
                .with_metadata(json!({
                    "page_count": *pdf_pages,
                    "title": metadata.title,
                    "producer": metadata.producer,
                })),
        );

        // Stage 2: OCR. Exactly one string per page; individual failures
        // degraded to empty strings by the capability.
        let stage_start = Instant::now();
        logs.push(ProcessingLogEntry::new("ocr", "started"));

        let page_texts = self.ocr.extract_batch(images).await;
        debug_assert_eq!(page_texts.len(), images.len());

        if page_texts.iter().all(|t| t.trim().is_empty()) {
            return Err(self.fail(
                logs,
                "ocr",
                stage_start,
                "OCR produced no text on any page; the document may be blank or the OCR service is misconfigured".to_string(),
            ));
        }

        let combined = page_texts.join(PAGE_BREAK);
        logs.push(
            ProcessingLogEntry::new("ocr", "completed")
                .with_duration(stage_start.elapsed().as_secs_f64())
                .with_metadata(json!({
                    "pages_processed": page_texts.len(),
                    "total_characters": combined.len(),
                })),
        );

        // Stage 3: cleanup agent. Must produce non-empty text.
        let stage_start = Instant::now();
        logs.push(ProcessingLogEntry::new("cleanup", "started"));

        let outcome = self
            .runner
            .run("cleanup", prompts::cleanup_prompt(&combined), None, ExpectedShape::Text)
            .await;
        tokens.add(&outcome.tokens);

        if !outcome.success {
            let error = outcome.error.unwrap_or_default();
            return Err(self.fail(logs, "cleanup", stage_start, error));
        }
        let cleaned_text = outcome.text().to_string();
        if cleaned_text.trim().is_empty() {
            return Err(self.fail(
                logs,
                "cleanup",
                stage_start,
                "cleanup returned empty text".to_string(),
            ));
        }

        logs.push(
            ProcessingLogEntry::new("cleanup", "completed")
                .with_duration(stage_start.elapsed().as_secs_f64())
                .with_metadata(json!({
                    "input_length": combined.len(),
                    "output_length": cleaned_text.len(),
                    "tokens": outcome.tokens,
                    "model": self.runner.model_id(),
                })),
        );

        // Stage 4: extraction agent. The tree must contain at least one
        // recognizable statement group.
        let stage_start = Instant::now();
        logs.push(ProcessingLogEntry::new("extract", "started"));

        let outcome = self
            .runner
            .run("extract", prompts::extraction_prompt(&cleaned_text), None, ExpectedShape::Json)
            .await;
        tokens.add(&outcome.tokens);

        if !outcome.success {
            let error = outcome.error.unwrap_or_default();
            return Err(self.fail(logs, "extract", stage_start, error));
        }
        let extracted = outcome.data;
        let has_group = ["account", "period", "bank", "balances", "transactions"]
            .iter()
            .any(|group| extracted.get(group).is_some());
        if !has_group {
            return Err(self.fail(
                logs,
                "extract",
                stage_start,
                "extraction produced no recognizable statement structure".to_string(),
            ));
        }

        let txn_count = extracted["transactions"].as_array().map(|a| a.len()).unwrap_or(0);
        logs.push(
            ProcessingLogEntry::new("extract", "completed")
                .with_duration(stage_start.elapsed().as_secs_f64())
                .with_metadata(json!({
                    "transactions_count": txn_count,
                    "tokens": outcome.tokens,
                    "model": self.runner.model_id(),
                })),
        );

        // Stage 5: normalization agent.
        let stage_start = Instant::now();
        logs.push(ProcessingLogEntry::new("normalize", "started"));

        let outcome = self
            .runner
            .run(
                "normalize",
                prompts::normalization_prompt(&extracted),
                None,
                ExpectedShape::Json,
            )
            .await;
        tokens.add(&outcome.tokens);

        if !outcome.success {
            let error = outcome.error.unwrap_or_default();
            return Err(self.fail(logs, "normalize", stage_start, error));
        }
        let is_empty = outcome.data.as_object().map(|m| m.is_empty()).unwrap_or(true);
        if is_empty {
            return Err(self.fail(
                logs,
                "normalize",
                stage_start,
                "normalization returned no parseable JSON".to_string(),
            ));
        }

        // The model sometimes returns validation without repeating the data;
        // fall back to the extracted tree in that case.
        let normalized_data = match outcome.data.get("normalized_data") {
            Some(data) if data.is_object() => data.clone(),
            _ => extracted.clone(),
        };
        let mut validation_results = outcome
            .data
            .get("validation_results")
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| json!({"overall_confidence": 0.0, "issues": []}));
        if validation_results.get("overall_confidence").is_none() {
            validation_results["overall_confidence"] = json!(0.0);
        }
        if validation_results.get("issues").is_none() {
            validation_results["issues"] = json!([]);
        }

        logs.push(
            ProcessingLogEntry::new("normalize", "completed")
                .with_duration(stage_start.elapsed().as_secs_f64())
                .with_metadata(json!({
                    "issues_count": validation_results["issues"].as_array().map(|a| a.len()).unwrap_or(0),
                    "tokens": outcome.tokens,
                    "model": self.runner.model_id(),
                })),
        );

        // Postnorm: guarantee canonical dates/amounts even where the model
        // missed some.
        let final_data = self.normalizer.normalize_tree(&normalized_data, None);

        // Document score: the field-object mean, pulled toward the
        // validator's self-reported figure when one exists. Per-field
        // confidences don't move when validation finds issues, so the mean
        // alone would hide a failed balance check.
        let field_mean = self.scorer.overall_confidence(&final_data, None);
        let model_overall = validation_results
            .get("overall_confidence")
            .and_then(Value::as_f64)
            .filter(|c| *c > 0.0);
        let (w_h, w_m) = self.scorer.weights();
        let overall = match model_overall {
            Some(model) => (w_h * field_mean + w_m * model).clamp(0.0, 1.0),
            None => field_mean,
        };

        let flagged = self.scorer.fields_below_threshold(&final_data);
        validation_results["fields_below_threshold"] = json!(flagged);

        Ok((final_data, validation_results, overall))
    }

    /// Append a failed-stage log entry and produce the joined error string.
    fn fail(
        &self,
        logs: &mut Vec<ProcessingLogEntry>,
        step: &str,
        started: Instant,
        error: String,
    ) -> String {
        logs.push(
            ProcessingLogEntry::new(step, "failed")
                .with_duration(started.elapsed().as_secs_f64())
                .with_message(error.clone()),
        );
        format!("{}: {}", step, error)
    }
}
