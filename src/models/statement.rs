//! Statement models for upload tracking and extraction results.
//!
//! A `Statement` is one processing job: the uploaded PDF, its content hash,
//! and the lifecycle state of the background pipeline run. Extracted data
//! hangs off the statement as customer/bank/transaction rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle state of a statement job.
///
/// States advance monotonically: `Pending -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

/// Token accounting for a single LLM call or a whole pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: i64,
    pub completion: i64,
    pub total: i64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

/// An uploaded bank statement and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Original upload filename.
    pub filename: String,
    /// Path of the stored blob.
    pub file_path: String,
    /// SHA-256 hash of the content, hex-encoded.
    pub file_hash: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Current lifecycle state.
    pub status: JobStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    /// Joined stage errors when the run failed.
    pub processing_error: Option<String>,
    pub page_count: i32,
    pub total_transactions: i32,
    pub overall_confidence: Option<f64>,
    pub tokens: TokenUsage,
    pub processing_time_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Statement {
    /// Compute SHA-256 hash of content.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Create a new pending statement for an uploaded file.
    pub fn new(filename: String, file_path: String, file_hash: String, file_size: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename,
            file_path,
            file_hash,
            file_size,
            status: JobStatus::Pending,
            processing_started_at: None,
            processing_completed_at: None,
            processing_error: None,
            page_count: 0,
            total_transactions: 0,
            overall_confidence: None,
            tokens: TokenUsage::default(),
            processing_time_seconds: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Account-holder details extracted from a statement. 1:1 with `Statement`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub account_holder_name: Option<String>,
    /// PII-safe masked form; the raw account number is never persisted.
    pub account_number_masked: Option<String>,
    pub account_type: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Per-field combined confidence, keyed by field name.
    pub confidence_scores: serde_json::Value,
}

/// Bank, period, and balance details. 1:1 with `Statement`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankDetails {
    pub bank_name: Option<String>,
    pub branch_name: Option<String>,
    /// ISO 4217 code, defaulting to USD when the document never names one.
    pub currency: String,
    pub period_start_date: Option<String>,
    pub period_end_date: Option<String>,
    pub opening_balance: Option<f64>,
    pub closing_balance: Option<f64>,
    pub total_debits: Option<f64>,
    pub total_credits: Option<f64>,
    pub confidence_scores: serde_json::Value,
}

impl Default for BankDetails {
    fn default() -> Self {
        Self {
            bank_name: None,
            branch_name: None,
            currency: "USD".to_string(),
            period_start_date: None,
            period_end_date: None,
            opening_balance: None,
            closing_balance: None,
            total_debits: None,
            total_credits: None,
            confidence_scores: serde_json::Value::Object(Default::default()),
        }
    }
}

/// One ledger row. 1:N with `Statement`, ordered by date on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    /// ISO 8601 date (YYYY-MM-DD) after normalization.
    pub date: Option<String>,
    pub description: Option<String>,
    pub debit: Option<f64>,
    pub credit: Option<f64>,
    pub balance: Option<f64>,
    pub transaction_type: Option<String>,
    pub reference_number: Option<String>,
    pub check_number: Option<String>,
    pub category: Option<String>,
    pub page_number: Option<i32>,
    /// Bounding box [x, y, width, height] when the extractor reported one.
    pub bbox: Option<serde_json::Value>,
    pub confidence: Option<f64>,
    pub confidence_scores: serde_json::Value,
    /// Every column seen in the source row, including bank-specific ones.
    pub raw_data: serde_json::Value,
}

/// One append-only pipeline stage record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    /// Stage name: pdf_rasterize, ocr, cleanup, extract, normalize, persist.
    pub step: String,
    /// started, completed, or failed.
    pub status: String,
    pub message: Option<String>,
    pub duration_seconds: Option<f64>,
    /// Free-form context: tokens, model id, error details.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLogEntry {
    pub fn new(step: &str, status: &str) -> Self {
        Self {
            step: step.to_string(),
            status: status.to_string(),
            message: None,
            duration_seconds: None,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Everything persisted for a completed run, written in one transaction.
#[derive(Debug, Clone, Default)]
pub struct StatementRecordSet {
    pub customer: Option<CustomerDetails>,
    pub bank: Option<BankDetails>,
    pub transactions: Vec<Transaction>,
}
