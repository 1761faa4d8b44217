//! End-to-end job lifecycle tests against fake capabilities.

mod common;

use bankstmt::jobs::SubmitError;
use bankstmt::llm::Completion;
use bankstmt::models::JobStatus;
use common::*;
use serde_json::json;

#[tokio::test]
async fn happy_path_completes_with_ordered_transactions() {
    let harness = Harness::new(
        2,
        ScriptedOcr::ok("raw ocr text with numbers 17500"),
        ScriptedCompleter::happy_path(),
    )
    .await;

    let outcome = harness
        .controller
        .submit("statement.pdf", &pdf_bytes("happy"))
        .await
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Pending);
    assert!(!outcome.duplicate);

    assert_eq!(harness.wait_terminal(&outcome.job_id).await, JobStatus::Completed);

    let statement = harness.repo.get(&outcome.job_id).await.unwrap().unwrap();
    assert_eq!(statement.page_count, 2);
    assert_eq!(statement.total_transactions, 3);
    assert!(statement.overall_confidence.unwrap() > 0.7);
    assert!(statement.processing_started_at.is_some());
    assert!(statement.processing_completed_at.is_some());
    assert!(statement.processing_error.is_none());
    assert!(statement.tokens.total > 0);

    // Full record: transactions come back ordered by date even though the
    // extraction listed them out of order, and postnorm canonicalized the
    // DD-MMM-YYYY dates.
    let full = harness.repo.get_full(&outcome.job_id).await.unwrap().unwrap();
    let dates: Vec<_> = full
        .transactions
        .iter()
        .map(|t| t.date.clone().unwrap())
        .collect();
    assert_eq!(dates, vec!["2025-01-02", "2025-01-05", "2025-01-20"]);

    let bank = full.bank.unwrap();
    assert_eq!(bank.opening_balance, Some(17500.0));
    assert_eq!(bank.closing_balance, Some(15000.0));
    assert_eq!(bank.total_debits, Some(5500.0));
    assert_eq!(bank.total_credits, Some(3000.0));
    // opening + credits - debits = closing within a cent
    let arithmetic = bank.opening_balance.unwrap() + bank.total_credits.unwrap()
        - bank.total_debits.unwrap();
    assert!((arithmetic - bank.closing_balance.unwrap()).abs() < 0.01);

    // PII: only the masked account number is persisted.
    let customer = full.customer.unwrap();
    assert_eq!(customer.account_number_masked.as_deref(), Some("XXXXXXXX9012"));

    // CSV export: filename and summary rows.
    let (filename, csv) = harness.controller.export_csv(&outcome.job_id).await.unwrap();
    let expected = format!(
        "statement_{}_{}.csv",
        outcome.job_id,
        statement.created_at.format("%Y%m%d")
    );
    assert_eq!(filename, expected);
    assert!(csv.starts_with("Bank Statement Export"));
    assert!(csv.contains("Final Balance:,15000.00"));
    assert!(csv.contains("2025-01-02,ATM Withdrawal,2500.00,0.00,15000.00"));

    // Stage log covers every stage in order.
    let logs = harness.repo.get_logs(&outcome.job_id).await.unwrap();
    let steps: Vec<_> = logs
        .iter()
        .map(|l| format!("{}:{}", l.step, l.status))
        .collect();
    for expected in [
        "pdf_rasterize:started",
        "pdf_rasterize:completed",
        "ocr:started",
        "ocr:completed",
        "cleanup:started",
        "cleanup:completed",
        "extract:started",
        "extract:completed",
        "normalize:started",
        "normalize:completed",
        "persist:started",
        "persist:completed",
    ] {
        assert!(steps.contains(&expected.to_string()), "missing {}", expected);
    }
}

#[tokio::test]
async fn duplicate_upload_coalesces_onto_existing_job() {
    let harness = Harness::new(
        1,
        ScriptedOcr::ok("text"),
        ScriptedCompleter::happy_path(),
    )
    .await;

    let bytes = pdf_bytes("dup");
    let first = harness.controller.submit("a.pdf", &bytes).await.unwrap();
    harness.wait_terminal(&first.job_id).await;

    let second = harness.controller.submit("b.pdf", &bytes).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(second.status, JobStatus::Completed);

    // Exactly one blob, exactly one row.
    assert_eq!(harness.blob_count(), 1);
    let (total, _) = harness.repo.list(0, 10).await.unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn ocr_transient_failures_recover_within_retry_limit() {
    // Two transport failures, success on the third attempt of page one.
    let harness = Harness::new(
        2,
        ScriptedOcr::flaky("recovered ocr text", 2),
        ScriptedCompleter::happy_path(),
    )
    .await;

    let outcome = harness
        .controller
        .submit("flaky.pdf", &pdf_bytes("flaky"))
        .await
        .unwrap();
    assert_eq!(harness.wait_terminal(&outcome.job_id).await, JobStatus::Completed);

    let logs = harness.repo.get_logs(&outcome.job_id).await.unwrap();
    let ocr_statuses: Vec<_> = logs
        .iter()
        .filter(|l| l.step == "ocr")
        .map(|l| l.status.clone())
        .collect();
    assert_eq!(ocr_statuses, vec!["started", "completed"]);
}

#[tokio::test]
async fn extraction_without_json_fails_job_and_writes_nothing() {
    let completer = ScriptedCompleter::happy_path().with_extract(Completion {
        ok: true,
        content: "I am sorry, I could not find any structured data.".to_string(),
        tokens: Default::default(),
        error: None,
    });
    let harness = Harness::new(1, ScriptedOcr::ok("text"), completer).await;

    let outcome = harness
        .controller
        .submit("degraded.pdf", &pdf_bytes("degraded"))
        .await
        .unwrap();
    assert_eq!(harness.wait_terminal(&outcome.job_id).await, JobStatus::Failed);

    let statement = harness.repo.get(&outcome.job_id).await.unwrap().unwrap();
    let error = statement.processing_error.unwrap();
    assert!(error.contains("extract"), "error was: {}", error);

    // No partial extraction rows on the failure path.
    let full = harness.repo.get_full(&outcome.job_id).await.unwrap().unwrap();
    assert!(full.customer.is_none());
    assert!(full.bank.is_none());
    assert!(full.transactions.is_empty());

    let logs = harness.repo.get_logs(&outcome.job_id).await.unwrap();
    assert!(logs.iter().any(|l| l.step == "extract" && l.status == "failed"));
}

#[tokio::test]
async fn all_empty_ocr_fails_the_run() {
    let harness = Harness::new(
        2,
        ScriptedOcr::all_empty(),
        ScriptedCompleter::happy_path(),
    )
    .await;

    let outcome = harness
        .controller
        .submit("blank.pdf", &pdf_bytes("blank"))
        .await
        .unwrap();
    assert_eq!(harness.wait_terminal(&outcome.job_id).await, JobStatus::Failed);

    let statement = harness.repo.get(&outcome.job_id).await.unwrap().unwrap();
    let error = statement.processing_error.unwrap();
    assert!(error.contains("ocr"), "error was: {}", error);
    assert!(error.contains("no text"), "error was: {}", error);
}

#[tokio::test]
async fn balance_mismatch_is_advisory_not_blocking() {
    let extraction = json!({
        "balances": {
            "opening_balance": {"value": 100.00, "confidence": 0.9},
            "closing_balance": {"value": 140.00, "confidence": 0.9},
            "total_debits": {"value": 20.00, "confidence": 0.9},
            "total_credits": {"value": 50.00, "confidence": 0.9}
        },
        "transactions": []
    });
    let completer = ScriptedCompleter::happy_path()
        .with_extract(Completion {
            ok: true,
            content: extraction.to_string(),
            tokens: Default::default(),
            error: None,
        })
        .with_normalize(Completion {
            ok: true,
            content: json!({
                "normalized_data": extraction,
                "validation_results": happy_validation(false),
            })
            .to_string(),
            tokens: Default::default(),
            error: None,
        });
    let harness = Harness::new(1, ScriptedOcr::ok("text"), completer).await;

    let outcome = harness
        .controller
        .submit("mismatch.pdf", &pdf_bytes("mismatch"))
        .await
        .unwrap();
    // Validation issues annotate the record; they never block completion.
    assert_eq!(harness.wait_terminal(&outcome.job_id).await, JobStatus::Completed);

    let statement = harness.repo.get(&outcome.job_id).await.unwrap().unwrap();
    assert!(statement.overall_confidence.unwrap() < 0.9);

    let full = harness.repo.get_full(&outcome.job_id).await.unwrap().unwrap();
    assert_eq!(full.bank.unwrap().closing_balance, Some(140.0));
}

#[tokio::test]
async fn upload_boundaries() {
    let harness = Harness::with_settings(
        1,
        ScriptedOcr::ok("text"),
        ScriptedCompleter::happy_path(),
        |settings| settings.storage.max_upload_size = 64,
    )
    .await;

    // Wrong extension is rejected before anything is written.
    let err = harness
        .controller
        .submit("statement.png", &pdf_bytes("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::InvalidExtension));

    // Non-PDF content is rejected.
    let err = harness
        .controller
        .submit("fake.pdf", b"just plain text, no magic")
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::NotAPdf));

    // Empty payload is rejected.
    let err = harness.controller.submit("empty.pdf", b"").await.unwrap_err();
    assert!(matches!(err, SubmitError::Empty));

    // Exactly the cap passes; one byte over is rejected.
    let mut exact = pdf_bytes("cap");
    exact.resize(64, b' ');
    assert!(harness.controller.submit("exact.pdf", &exact).await.is_ok());

    let mut over = pdf_bytes("cap2");
    over.resize(65, b' ');
    let err = harness.controller.submit("over.pdf", &over).await.unwrap_err();
    assert!(matches!(err, SubmitError::TooLarge(64)));

    // Nothing was stored for the rejected uploads: one accepted blob only.
    assert_eq!(harness.blob_count(), 1);
    let (total, _) = harness.repo.list(0, 10).await.unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn delete_removes_rows_and_blob() {
    let harness = Harness::new(
        1,
        ScriptedOcr::ok("text"),
        ScriptedCompleter::happy_path(),
    )
    .await;

    let outcome = harness
        .controller
        .submit("gone.pdf", &pdf_bytes("gone"))
        .await
        .unwrap();
    harness.wait_terminal(&outcome.job_id).await;
    assert_eq!(harness.blob_count(), 1);

    assert!(harness.controller.delete(&outcome.job_id).await.unwrap());
    assert_eq!(harness.blob_count(), 0);
    assert!(harness.repo.get(&outcome.job_id).await.unwrap().is_none());
    // Cascade removed the children too.
    assert!(harness
        .repo
        .get_logs(&outcome.job_id)
        .await
        .unwrap()
        .is_empty());

    // Deleting again reports not-found.
    assert!(!harness.controller.delete(&outcome.job_id).await.unwrap());
}

#[tokio::test]
async fn crash_recovery_sweeps_processing_rows() {
    let harness = Harness::new(
        1,
        ScriptedOcr::ok("text"),
        ScriptedCompleter::happy_path(),
    )
    .await;

    // Simulate a crash: a row stuck in processing from a previous run.
    let statement = bankstmt::models::Statement::new(
        "stuck.pdf".to_string(),
        "/nowhere/stuck.pdf".to_string(),
        "deadbeef".repeat(8),
        10,
    );
    harness.repo.insert(&statement).await.unwrap();
    assert!(harness.repo.mark_processing(&statement.id).await.unwrap());

    let swept = harness.controller.recover_interrupted().await.unwrap();
    assert_eq!(swept, 1);

    let recovered = harness.repo.get(&statement.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Failed);
    assert_eq!(recovered.processing_error.as_deref(), Some("interrupted"));
}

#[tokio::test]
async fn state_transitions_are_guarded() {
    let harness = Harness::new(
        1,
        ScriptedOcr::ok("text"),
        ScriptedCompleter::happy_path(),
    )
    .await;

    let outcome = harness
        .controller
        .submit("guard.pdf", &pdf_bytes("guard"))
        .await
        .unwrap();
    assert_eq!(harness.wait_terminal(&outcome.job_id).await, JobStatus::Completed);

    // A completed job cannot regress: the guarded updates refuse to touch it.
    assert!(!harness.repo.mark_processing(&outcome.job_id).await.unwrap());
    assert!(!harness
        .repo
        .fail_job(&outcome.job_id, "late failure", &[])
        .await
        .unwrap());

    let statement = harness.repo.get(&outcome.job_id).await.unwrap().unwrap();
    assert_eq!(statement.status, JobStatus::Completed);
    assert!(statement.processing_error.is_none());
}
