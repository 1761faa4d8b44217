//! Shared test harness: deterministic fakes for the pipeline capabilities
//! and a controller wired against a temp database and blob store.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use bankstmt::config::Settings;
use bankstmt::jobs::JobController;
use bankstmt::llm::{Completion, CompletionRequest, TextCompleter};
use bankstmt::models::{JobStatus, TokenUsage};
use bankstmt::ocr::{with_backoff, OcrError, OcrReader};
use bankstmt::pdf::{PageRasterizer, PdfMetadata, RasterizeError};
use bankstmt::repository::{run_migrations, DieselStatementRepository, SqlitePool};
use bankstmt::storage::BlobStore;

/// Rasterizer fake: writes `pages` dummy PNG files instead of shelling out.
pub struct StubRasterizer {
    pub pages: u32,
}

#[async_trait]
impl PageRasterizer for StubRasterizer {
    async fn rasterize(
        &self,
        _pdf_path: &Path,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, RasterizeError> {
        std::fs::create_dir_all(out_dir)?;
        let mut paths = Vec::new();
        for page in 1..=self.pages {
            let path = out_dir.join(format!("page-{:02}.png", page));
            std::fs::write(&path, format!("fake image {}", page))?;
            paths.push(path);
        }
        Ok(paths)
    }

    async fn metadata(&self, _pdf_path: &Path) -> Result<PdfMetadata, RasterizeError> {
        Ok(PdfMetadata {
            page_count: self.pages,
            producer: Some("test".to_string()),
            ..Default::default()
        })
    }
}

/// OCR fake with a scripted transport layer: the first `fail_transport`
/// calls error as transport failures, then every call returns `text`.
/// Retries follow the same backoff contract as the HTTP reader.
pub struct ScriptedOcr {
    pub text: String,
    pub fail_transport: usize,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    pub fn ok(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail_transport: 0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn flaky(text: &str, fail_transport: usize) -> Self {
        Self {
            text: text.to_string(),
            fail_transport,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn all_empty() -> Self {
        Self::ok("")
    }
}

#[async_trait]
impl OcrReader for ScriptedOcr {
    async fn extract(&self, _image_path: &Path) -> Result<String, OcrError> {
        with_backoff(3, 0.001, || {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self.text.clone();
            let fail = n < self.fail_transport;
            async move {
                if fail {
                    Err(OcrError::Connection("connection reset".to_string()))
                } else {
                    Ok(text)
                }
            }
        })
        .await
    }

    async fn ready(&self) -> bool {
        true
    }
}

/// Per-stage scripted completer. Stages are recognized by markers in the
/// prompt templates.
pub struct ScriptedCompleter {
    pub cleanup: Completion,
    pub extract: Completion,
    pub normalize: Completion,
}

fn ok_completion(content: String) -> Completion {
    Completion {
        ok: true,
        content,
        tokens: TokenUsage {
            prompt: 100,
            completion: 50,
            total: 150,
        },
        error: None,
    }
}

impl ScriptedCompleter {
    /// Canned responses for the 3-transaction happy path: opening 17500,
    /// closing 15000, debits 5500, credits 3000.
    pub fn happy_path() -> Self {
        Self {
            cleanup: ok_completion("CLEANED STATEMENT TEXT\nDate  Description  Debit  Credit  Balance".to_string()),
            extract: ok_completion(happy_extraction().to_string()),
            normalize: ok_completion(
                json!({
                    "normalized_data": happy_extraction(),
                    "validation_results": happy_validation(true),
                })
                .to_string(),
            ),
        }
    }

    pub fn with_extract(mut self, completion: Completion) -> Self {
        self.extract = completion;
        self
    }

    pub fn with_normalize(mut self, completion: Completion) -> Self {
        self.normalize = completion;
        self
    }
}

#[async_trait]
impl TextCompleter for ScriptedCompleter {
    async fn complete(&self, request: CompletionRequest) -> Completion {
        if request.prompt.contains("OCR cleanup specialist") {
            self.cleanup.clone()
        } else if request.prompt.contains("expert data extractor") {
            self.extract.clone()
        } else if request.prompt.contains("expert data validator") {
            self.normalize.clone()
        } else {
            Completion::failure("unrecognized prompt in test completer")
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_id(&self) -> String {
        "scripted-test-model".to_string()
    }
}

/// Extraction tree for the happy path. Transactions are deliberately out of
/// date order, with non-ISO dates and formatted amounts, so the ordering and
/// postnorm guarantees are actually exercised.
pub fn happy_extraction() -> serde_json::Value {
    json!({
        "account": {
            "account_number": {"value": "123456789012", "confidence": 0.92},
            "account_holder": {"value": "John Doe", "confidence": 0.87},
            "account_type": {"value": "Savings", "confidence": 0.85}
        },
        "period": {
            "start_date": {"value": "2025-01-01", "confidence": 0.95},
            "end_date": {"value": "2025-01-31", "confidence": 0.94}
        },
        "bank": {
            "bank_name": {"value": "Example Bank", "confidence": 0.98},
            "branch_name": {"value": "Main Branch", "confidence": 0.90},
            "currency": {"value": "USD", "confidence": 0.99}
        },
        "balances": {
            "opening_balance": {"value": "17,500.00", "confidence": 0.95},
            "closing_balance": {"value": 15000.00, "confidence": 0.95},
            "total_debits": {"value": 5500.00, "confidence": 0.92},
            "total_credits": {"value": 3000.00, "confidence": 0.91}
        },
        "schema_info": {
            "detected_columns": ["date", "description", "debit", "credit", "balance"],
            "column_mapping": {
                "date": "Date",
                "description": "Particulars",
                "debit": "Withdrawal",
                "credit": "Deposit",
                "balance": "Balance"
            }
        },
        "transactions": [
            {
                "date": {"value": "20-Jan-2025", "confidence": 0.97},
                "description": {"value": "Utility Bill", "confidence": 0.91},
                "debit": {"value": "3,000.00", "confidence": 0.96},
                "credit": {"value": 0.00, "confidence": 0.96},
                "balance": {"value": 15000.00, "confidence": 0.90}
            },
            {
                "date": {"value": "02-Jan-2025", "confidence": 0.98},
                "description": {"value": "ATM Withdrawal", "confidence": 0.93},
                "debit": {"value": 2500.00, "confidence": 0.98},
                "credit": {"value": 0.00, "confidence": 0.98},
                "balance": {"value": 15000.00, "confidence": 0.90}
            },
            {
                "date": {"value": "05-Jan-2025", "confidence": 0.98},
                "description": {"value": "Salary", "confidence": 0.95},
                "debit": {"value": 0.00, "confidence": 0.97},
                "credit": {"value": 3000.00, "confidence": 0.97},
                "balance": {"value": 18000.00, "confidence": 0.91}
            }
        ]
    })
}

pub fn happy_validation(matches: bool) -> serde_json::Value {
    if matches {
        json!({
            "balance_verification": {
                "calculated_closing": 15000.00,
                "stated_closing": 15000.00,
                "matches": true,
                "confidence": 0.98
            },
            "date_validation": {
                "all_dates_valid": true,
                "chronological": true,
                "within_period": true,
                "confidence": 0.95
            },
            "amount_validation": {
                "all_amounts_valid": true,
                "running_balance_correct": true,
                "confidence": 0.93
            },
            "issues": [],
            "overall_confidence": 0.94
        })
    } else {
        json!({
            "balance_verification": {
                "calculated_closing": 130.00,
                "stated_closing": 140.00,
                "matches": false,
                "confidence": 0.40
            },
            "issues": ["Stated closing balance 140.00 does not match calculated 130.00"],
            "overall_confidence": 0.55
        })
    }
}

/// Minimal bytes that `infer` identifies as a PDF.
pub fn pdf_bytes(seed: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% test fixture {}\n%%EOF\n", seed).into_bytes()
}

/// A controller wired to a temp DB/blob dir and the given fakes.
pub struct Harness {
    pub controller: Arc<JobController>,
    pub repo: DieselStatementRepository,
    pub upload_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new(
        pages: u32,
        ocr: ScriptedOcr,
        completer: ScriptedCompleter,
    ) -> Self {
        Self::with_settings(pages, ocr, completer, |_| {}).await
    }

    pub async fn with_settings(
        pages: u32,
        ocr: ScriptedOcr,
        completer: ScriptedCompleter,
        tweak: impl FnOnce(&mut Settings),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let upload_dir = dir.path().join("uploads");

        let db_url = format!("sqlite:{}", db_path.display());
        run_migrations(&db_url).await.unwrap();

        let mut settings = Settings::default();
        settings.storage.database_url = db_url;
        settings.storage.upload_dir = upload_dir.clone();
        tweak(&mut settings);

        let repo = DieselStatementRepository::new(SqlitePool::from_path(&db_path));
        let blobs = BlobStore::new(&upload_dir).unwrap();

        let controller = Arc::new(JobController::new(
            settings,
            repo.clone(),
            blobs,
            Arc::new(StubRasterizer { pages }),
            Arc::new(ocr),
            Arc::new(completer),
        ));

        Self {
            controller,
            repo,
            upload_dir,
            _dir: dir,
        }
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait_terminal(&self, id: &str) -> JobStatus {
        for _ in 0..200 {
            let status = self
                .repo
                .get(id)
                .await
                .unwrap()
                .expect("job row exists")
                .status;
            if matches!(status, JobStatus::Completed | JobStatus::Failed) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    /// Count blobs stored under the date shards.
    pub fn blob_count(&self) -> usize {
        fn walk(dir: &Path, acc: &mut usize) {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        walk(&path, acc);
                    } else if path.is_file() {
                        *acc += 1;
                    }
                }
            }
        }
        let mut count = 0;
        // Skip the tmp/ work dir; only date shards hold blobs.
        if let Ok(entries) = std::fs::read_dir(&self.upload_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && path.file_name().is_some_and(|n| n != "tmp") {
                    walk(&path, &mut count);
                }
            }
        }
        count
    }
}
