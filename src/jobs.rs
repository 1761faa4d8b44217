//! Job intake, background scheduling, and state persistence.
//!
//! The controller owns the user-visible job lifecycle: it validates and
//! stores uploads, coalesces duplicates by content hash, hands pipeline runs
//! to the background, and converts each run's outcome into exactly one state
//! transition. Query paths (status, get, list, export, delete) only touch
//! the repository.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::llm::TextCompleter;
use crate::models::{
    BankDetails, CustomerDetails, JobStatus, ProcessingLogEntry, Statement, StatementRecordSet,
    Transaction,
};
use crate::ocr::OcrReader;
use crate::pdf::PageRasterizer;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::repository::{DieselStatementRepository, FullStatement};
use crate::storage::{BlobStore, PutOptions};

/// Upload rejections, surfaced as 4xx before any job row exists.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Only PDF files are allowed")]
    InvalidExtension,

    #[error("File exceeds the maximum upload size of {0} bytes")]
    TooLarge(u64),

    #[error("Uploaded file is empty")]
    Empty,

    #[error("File content is not a valid PDF")]
    NotAPdf,

    #[error("PDF is unreadable: {0}")]
    UnreadablePdf(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SubmitError {
    /// Whether this rejection is the client's fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

/// Response to a submission: the job to poll, which may be pre-existing.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub duplicate: bool,
}

/// Errors from the CSV export path.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Statement not found")]
    NotFound,

    #[error("Statement processing not completed")]
    NotCompleted,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coordinates uploads, background pipeline runs, and queries.
pub struct JobController {
    settings: Settings,
    repo: DieselStatementRepository,
    blobs: BlobStore,
    rasterizer: Arc<dyn PageRasterizer>,
    pipeline: Arc<Pipeline>,
}

impl JobController {
    pub fn new(
        settings: Settings,
        repo: DieselStatementRepository,
        blobs: BlobStore,
        rasterizer: Arc<dyn PageRasterizer>,
        ocr: Arc<dyn OcrReader>,
        completer: Arc<dyn TextCompleter>,
    ) -> Self {
        let pipeline = Arc::new(Pipeline::new(
            &settings,
            rasterizer.clone(),
            ocr,
            completer,
        ));
        Self {
            settings,
            repo,
            blobs,
            rasterizer,
            pipeline,
        }
    }

    pub fn repo(&self) -> &DieselStatementRepository {
        &self.repo
    }

    /// Accept an upload, returning immediately with the job to poll.
    ///
    /// Duplicate content (by SHA-256) returns the existing job untouched:
    /// no new blob, no new row, no new pipeline run.
    pub async fn submit(
        self: &Arc<Self>,
        filename: &str,
        content: &[u8],
    ) -> Result<SubmitOutcome, SubmitError> {
        if !self.settings.extension_allowed(filename) {
            return Err(SubmitError::InvalidExtension);
        }
        if content.is_empty() {
            return Err(SubmitError::Empty);
        }
        if content.len() as u64 > self.settings.storage.max_upload_size {
            return Err(SubmitError::TooLarge(self.settings.storage.max_upload_size));
        }
        let looks_like_pdf = infer::get(content)
            .map(|kind| kind.mime_type() == "application/pdf")
            .unwrap_or(false);
        if !looks_like_pdf {
            return Err(SubmitError::NotAPdf);
        }

        let blob = self
            .blobs
            .put(content, filename, PutOptions::default())
            .map_err(|e| SubmitError::Internal(e.into()))?;

        if blob.duplicate {
            if let Some(existing) = self
                .repo
                .get_by_hash(&blob.hash)
                .await
                .map_err(|e| SubmitError::Internal(e.into()))?
            {
                info!(
                    "Duplicate upload coalesced onto statement {} ({})",
                    existing.id,
                    existing.status.as_str()
                );
                return Ok(SubmitOutcome {
                    job_id: existing.id,
                    status: existing.status,
                    duplicate: true,
                });
            }
            // Orphan blob with no job row; fall through and adopt it.
        }

        // Reject unreadable PDFs before a job row exists.
        if let Err(e) = self.rasterizer.metadata(&blob.path).await {
            if !blob.duplicate {
                let _ = self.blobs.delete(&blob.path);
            }
            return Err(SubmitError::UnreadablePdf(e.to_string()));
        }

        let statement = Statement::new(
            filename.to_string(),
            blob.path.display().to_string(),
            blob.hash,
            blob.size as i64,
        );
        self.repo
            .insert(&statement)
            .await
            .map_err(|e| SubmitError::Internal(e.into()))?;

        let controller = Arc::clone(self);
        let job_id = statement.id.clone();
        let file_path = PathBuf::from(&statement.file_path);
        tokio::spawn(async move {
            controller.run_job(&job_id, &file_path).await;
        });

        info!("Statement {} created, processing queued", statement.id);
        Ok(SubmitOutcome {
            job_id: statement.id,
            status: JobStatus::Pending,
            duplicate: false,
        })
    }

    /// Background half of a submission: drive the pipeline and persist its
    /// outcome as exactly one terminal transition.
    async fn run_job(&self, job_id: &str, file_path: &Path) {
        match self.repo.mark_processing(job_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Statement {} was not pending; skipping run", job_id);
                return;
            }
            Err(e) => {
                error!("Failed to mark statement {} processing: {}", job_id, e);
                return;
            }
        }

        let work_dir = self.settings.temp_image_dir().join(job_id);
        let outcome = self.pipeline.run(file_path, &work_dir).await;

        if outcome.success {
            self.persist_success(job_id, outcome).await;
        } else {
            let error = outcome.errors.join("; ");
            match self.repo.fail_job(job_id, &error, &outcome.logs).await {
                Ok(_) => error!("Statement {} processing failed: {}", job_id, error),
                Err(e) => error!("Failed to record failure for {}: {}", job_id, e),
            }
        }
    }

    async fn persist_success(&self, job_id: &str, outcome: PipelineOutcome) {
        let records = map_record_set(&outcome.final_data);

        let mut logs = outcome.logs;
        logs.push(ProcessingLogEntry::new("persist", "started"));

        let stats = crate::repository::CompletionStats {
            page_count: outcome.metadata.pdf_pages,
            total_transactions: records.transactions.len() as i32,
            overall_confidence: outcome.metadata.overall_confidence,
            processing_time_seconds: outcome.metadata.total_duration,
            tokens: outcome.metadata.tokens,
        };

        // The completed-persist entry rides in the same transaction: it is
        // only visible if the write it describes committed.
        let mut logs_on_success = logs.clone();
        logs_on_success.push(ProcessingLogEntry::new("persist", "completed"));

        match self
            .repo
            .complete_job(job_id, &records, &logs_on_success, &stats)
            .await
        {
            Ok(true) => info!("Statement {} processed successfully", job_id),
            Ok(false) => warn!(
                "Statement {} left processing before completion write",
                job_id
            ),
            Err(e) => {
                error!("Failed to persist results for {}: {}", job_id, e);
                logs.push(
                    ProcessingLogEntry::new("persist", "failed").with_message(e.to_string()),
                );
                let _ = self
                    .repo
                    .fail_job(job_id, &format!("persist: {}", e), &logs)
                    .await;
            }
        }
    }

    /// Current status and progress for a job.
    pub async fn status(&self, id: &str) -> anyhow::Result<Option<Statement>> {
        Ok(self.repo.get(id).await?)
    }

    /// Full record: statement plus extracted customer/bank/transactions.
    pub async fn get(&self, id: &str) -> anyhow::Result<Option<FullStatement>> {
        Ok(self.repo.get_full(id).await?)
    }

    /// Paginated listing, newest first.
    pub async fn list(&self, skip: i64, limit: i64) -> anyhow::Result<(i64, Vec<Statement>)> {
        Ok(self.repo.list(skip, limit.clamp(1, 100)).await?)
    }

    /// Delete a statement, its extracted rows (cascade), and its blob.
    pub async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let Some(statement) = self.repo.get(id).await? else {
            return Ok(false);
        };
        let _ = self.blobs.delete(Path::new(&statement.file_path));
        Ok(self.repo.delete(id).await?)
    }

    /// Export a completed statement as CSV. Returns (filename, body).
    pub async fn export_csv(&self, id: &str) -> Result<(String, String), ExportError> {
        let full = self
            .repo
            .get_full(id)
            .await
            .map_err(|e| ExportError::Internal(e.into()))?
            .ok_or(ExportError::NotFound)?;

        if full.statement.status != JobStatus::Completed {
            return Err(ExportError::NotCompleted);
        }

        let filename = format!(
            "statement_{}_{}.csv",
            full.statement.id,
            full.statement.created_at.format("%Y%m%d")
        );
        Ok((filename, render_csv(&full)))
    }

    /// Startup sweep: fail any job left `Processing` by a previous process.
    pub async fn recover_interrupted(&self) -> anyhow::Result<usize> {
        let swept = self.repo.recover_interrupted().await?;
        if swept > 0 {
            warn!("Marked {} interrupted statements as failed", swept);
        }
        Ok(swept)
    }
}

/// Extract `group.field.value` as a trimmed string.
fn field_str(tree: &Value, group: &str, field: &str) -> Option<String> {
    tree.get(group)?
        .get(field)?
        .get("value")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract `group.field.value` as a number.
fn field_f64(tree: &Value, group: &str, field: &str) -> Option<f64> {
    tree.get(group)?.get(field)?.get("value")?.as_f64()
}

/// Per-field confidence map for one group of field objects.
fn confidence_map(tree: &Value, group: &str) -> Value {
    let mut map = serde_json::Map::new();
    if let Some(Value::Object(fields)) = tree.get(group) {
        for (name, field) in fields {
            if let Some(c) = field.get("confidence").and_then(Value::as_f64) {
                map.insert(name.clone(), serde_json::json!(c));
            }
        }
    }
    Value::Object(map)
}

/// Map the canonical extraction tree onto the persisted record set.
fn map_record_set(final_data: &Value) -> StatementRecordSet {
    let mut records = StatementRecordSet::default();

    if final_data.get("account").is_some() {
        records.customer = Some(CustomerDetails {
            account_holder_name: field_str(final_data, "account", "account_holder"),
            account_number_masked: field_str(final_data, "account", "account_number"),
            account_type: field_str(final_data, "account", "account_type"),
            address: field_str(final_data, "account", "address"),
            email: field_str(final_data, "account", "email"),
            phone: field_str(final_data, "account", "phone"),
            confidence_scores: confidence_map(final_data, "account"),
        });
    }

    let has_bank_groups = ["bank", "period", "balances"]
        .iter()
        .any(|g| final_data.get(g).is_some());
    if has_bank_groups {
        let mut scores = serde_json::Map::new();
        for group in ["bank", "period", "balances"] {
            if let Value::Object(fields) = confidence_map(final_data, group) {
                scores.extend(fields);
            }
        }
        records.bank = Some(BankDetails {
            bank_name: field_str(final_data, "bank", "bank_name"),
            branch_name: field_str(final_data, "bank", "branch_name"),
            currency: field_str(final_data, "bank", "currency").unwrap_or_else(|| "USD".to_string()),
            period_start_date: field_str(final_data, "period", "start_date"),
            period_end_date: field_str(final_data, "period", "end_date"),
            opening_balance: field_f64(final_data, "balances", "opening_balance"),
            closing_balance: field_f64(final_data, "balances", "closing_balance"),
            total_debits: field_f64(final_data, "balances", "total_debits"),
            total_credits: field_f64(final_data, "balances", "total_credits"),
            confidence_scores: Value::Object(scores),
        });
    }

    if let Some(items) = final_data.get("transactions").and_then(Value::as_array) {
        for item in items {
            records.transactions.push(map_transaction(item));
        }
    }

    records
}

fn map_transaction(item: &Value) -> Transaction {
    let get_str = |field: &str| -> Option<String> {
        item.get(field)?
            .get("value")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let get_f64 = |field: &str| -> Option<f64> { item.get(field)?.get("value")?.as_f64() };

    let mut scores = serde_json::Map::new();
    if let Value::Object(fields) = item {
        for (name, field) in fields {
            if let Some(c) = field.get("confidence").and_then(Value::as_f64) {
                scores.insert(name.clone(), serde_json::json!(c));
            }
        }
    }

    Transaction {
        date: get_str("date"),
        description: get_str("description"),
        debit: get_f64("debit"),
        credit: get_f64("credit"),
        balance: get_f64("balance"),
        transaction_type: get_str("transaction_type").or_else(|| get_str("type")),
        reference_number: get_str("reference_number"),
        check_number: get_str("check_number").or_else(|| get_str("cheque_number")),
        category: get_str("category"),
        page_number: item
            .get("page")
            .and_then(Value::as_i64)
            .or_else(|| item.get("date")?.get("page")?.as_i64())
            .map(|p| p as i32),
        bbox: item.get("bbox").cloned(),
        confidence: item
            .get("date")
            .and_then(|d| d.get("confidence"))
            .and_then(Value::as_f64),
        confidence_scores: Value::Object(scores),
        raw_data: item.clone(),
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_row(fields: &[&str]) -> String {
    let mut row = fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
    row.push_str("\r\n");
    row
}

fn money(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "N/A".to_string())
}

/// Render the export CSV in the layout downstream tooling expects.
fn render_csv(full: &FullStatement) -> String {
    let mut out = String::new();
    out.push_str(&csv_row(&["Bank Statement Export"]));
    out.push_str("\r\n");

    if let Some(bank) = &full.bank {
        out.push_str(&csv_row(&[
            "Bank Name:",
            bank.bank_name.as_deref().unwrap_or("N/A"),
        ]));
        out.push_str(&csv_row(&[
            "Branch:",
            bank.branch_name.as_deref().unwrap_or("N/A"),
        ]));
        out.push_str(&csv_row(&["Currency:", &bank.currency]));
        out.push_str("\r\n");
    }

    if let Some(customer) = &full.customer {
        out.push_str(&csv_row(&[
            "Account Holder:",
            customer.account_holder_name.as_deref().unwrap_or("N/A"),
        ]));
        out.push_str(&csv_row(&[
            "Account Number:",
            customer.account_number_masked.as_deref().unwrap_or("N/A"),
        ]));
        out.push_str(&csv_row(&[
            "Account Type:",
            customer.account_type.as_deref().unwrap_or("N/A"),
        ]));
        out.push_str("\r\n");
    }

    if let Some(bank) = &full.bank {
        let period = format!(
            "{} to {}",
            bank.period_start_date.as_deref().unwrap_or("N/A"),
            bank.period_end_date.as_deref().unwrap_or("N/A"),
        );
        out.push_str(&csv_row(&["Statement Period:", &period]));
        out.push_str(&csv_row(&["Opening Balance:", &money(bank.opening_balance)]));
        out.push_str(&csv_row(&["Closing Balance:", &money(bank.closing_balance)]));
        out.push_str("\r\n");
    }

    out.push_str(&csv_row(&["TRANSACTIONS"]));
    out.push_str(&csv_row(&["Date", "Description", "Debit", "Credit", "Balance"]));
    for txn in &full.transactions {
        let debit = format!("{:.2}", txn.debit.unwrap_or(0.0));
        let credit = format!("{:.2}", txn.credit.unwrap_or(0.0));
        let balance = txn.balance.map(|b| format!("{:.2}", b)).unwrap_or_default();
        out.push_str(&csv_row(&[
            txn.date.as_deref().unwrap_or(""),
            txn.description.as_deref().unwrap_or(""),
            &debit,
            &credit,
            &balance,
        ]));
    }

    out.push_str("\r\n");
    if let Some(bank) = &full.bank {
        let zero = |v: Option<f64>| format!("{:.2}", v.unwrap_or(0.0));
        out.push_str(&csv_row(&["SUMMARY"]));
        out.push_str(&csv_row(&["Total Debits:", &zero(bank.total_debits)]));
        out.push_str(&csv_row(&["Total Credits:", &zero(bank.total_credits)]));
        out.push_str(&csv_row(&["Final Balance:", &zero(bank.closing_balance)]));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_record_set_full_tree() {
        let tree = json!({
            "account": {
                "account_holder": {"value": "John Doe", "confidence": 0.87},
                "account_number": {"value": "XXXXXXXX9012", "confidence": 0.92},
                "account_type": {"value": "Savings", "confidence": 0.85}
            },
            "bank": {
                "bank_name": {"value": "Example Bank", "confidence": 0.98},
                "currency": {"value": "USD", "confidence": 0.99}
            },
            "period": {
                "start_date": {"value": "2025-01-01", "confidence": 0.95},
                "end_date": {"value": "2025-01-31", "confidence": 0.94}
            },
            "balances": {
                "opening_balance": {"value": 17500.0, "confidence": 0.95},
                "closing_balance": {"value": 15000.0, "confidence": 0.95},
                "total_debits": {"value": 5500.0, "confidence": 0.92},
                "total_credits": {"value": 3000.0, "confidence": 0.91}
            },
            "transactions": [
                {
                    "date": {"value": "2025-01-02", "confidence": 0.98},
                    "description": {"value": "ATM Withdrawal", "confidence": 0.93},
                    "debit": {"value": 2500.0, "confidence": 0.98},
                    "credit": {"value": 0.0, "confidence": 0.98},
                    "balance": {"value": 15000.0, "confidence": 0.90},
                    "cheque_number": {"value": "001122", "confidence": 0.8}
                }
            ]
        });

        let records = map_record_set(&tree);

        let customer = records.customer.unwrap();
        assert_eq!(customer.account_holder_name.as_deref(), Some("John Doe"));
        assert_eq!(customer.account_number_masked.as_deref(), Some("XXXXXXXX9012"));
        assert_eq!(customer.confidence_scores["account_number"], 0.92);

        let bank = records.bank.unwrap();
        assert_eq!(bank.bank_name.as_deref(), Some("Example Bank"));
        assert_eq!(bank.currency, "USD");
        assert_eq!(bank.period_start_date.as_deref(), Some("2025-01-01"));
        assert_eq!(bank.opening_balance, Some(17500.0));
        assert_eq!(bank.confidence_scores["start_date"], 0.95);

        assert_eq!(records.transactions.len(), 1);
        let txn = &records.transactions[0];
        assert_eq!(txn.date.as_deref(), Some("2025-01-02"));
        assert_eq!(txn.debit, Some(2500.0));
        assert_eq!(txn.check_number.as_deref(), Some("001122"));
        assert_eq!(txn.confidence, Some(0.98));
        assert_eq!(txn.raw_data["description"]["value"], "ATM Withdrawal");
    }

    #[test]
    fn test_map_record_set_missing_groups() {
        let records = map_record_set(&json!({"transactions": []}));
        assert!(records.customer.is_none());
        assert!(records.bank.is_none());
        assert!(records.transactions.is_empty());
    }

    #[test]
    fn test_bank_defaults_currency() {
        let records = map_record_set(&json!({"balances": {
            "closing_balance": {"value": 10.0, "confidence": 0.9}
        }}));
        assert_eq!(records.bank.unwrap().currency, "USD");
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_render_csv_layout() {
        let full = FullStatement {
            statement: {
                let mut s = Statement::new(
                    "stmt.pdf".into(),
                    "/tmp/stmt.pdf".into(),
                    "hash".into(),
                    10,
                );
                s.status = JobStatus::Completed;
                s
            },
            customer: Some(CustomerDetails {
                account_holder_name: Some("John Doe".into()),
                account_number_masked: Some("XXXXXXXX9012".into()),
                account_type: Some("Savings".into()),
                ..Default::default()
            }),
            bank: Some(BankDetails {
                bank_name: Some("Example Bank".into()),
                branch_name: None,
                currency: "USD".into(),
                period_start_date: Some("2025-01-01".into()),
                period_end_date: Some("2025-01-31".into()),
                opening_balance: Some(17500.0),
                closing_balance: Some(15000.0),
                total_debits: Some(5500.0),
                total_credits: Some(3000.0),
                confidence_scores: json!({}),
            }),
            transactions: vec![Transaction {
                date: Some("2025-01-02".into()),
                description: Some("ATM Withdrawal, Branch #4".into()),
                debit: Some(2500.0),
                credit: Some(0.0),
                balance: Some(15000.0),
                ..Default::default()
            }],
        };

        let csv = render_csv(&full);
        assert!(csv.starts_with("Bank Statement Export\r\n"));
        assert!(csv.contains("Bank Name:,Example Bank\r\n"));
        assert!(csv.contains("Branch:,N/A\r\n"));
        assert!(csv.contains("Account Number:,XXXXXXXX9012\r\n"));
        assert!(csv.contains("Statement Period:,2025-01-01 to 2025-01-31\r\n"));
        assert!(csv.contains("Opening Balance:,17500.00\r\n"));
        assert!(csv.contains("TRANSACTIONS\r\nDate,Description,Debit,Credit,Balance\r\n"));
        // Description with a comma is quoted.
        assert!(csv.contains("2025-01-02,\"ATM Withdrawal, Branch #4\",2500.00,0.00,15000.00\r\n"));
        assert!(csv.contains("SUMMARY\r\nTotal Debits:,5500.00\r\nTotal Credits:,3000.00\r\nFinal Balance:,15000.00\r\n"));
    }
}
