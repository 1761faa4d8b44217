//! API endpoint handlers.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;

use super::AppState;
use crate::jobs::ExportError;
use crate::models::Statement;
use crate::repository::FullStatement;

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Pagination parameters for the listing endpoint.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> axum::response::Response {
    (status, axum::Json(serde_json::json!({ "detail": detail.into() }))).into_response()
}

/// POST /statements/upload - accept a PDF and queue it for processing.
pub async fn upload_statement(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut filename = String::new();
    let mut content: Option<Vec<u8>> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                filename = field.file_name().unwrap_or("upload.pdf").to_string();
                match field.bytes().await {
                    Ok(bytes) => content = Some(bytes.to_vec()),
                    Err(e) => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            format!("Failed to read upload: {}", e),
                        )
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid multipart body: {}", e),
                )
            }
        }
    }

    let Some(content) = content else {
        return error_response(StatusCode::BAD_REQUEST, "No file field in upload");
    };

    match state.controller.submit(&filename, &content).await {
        Ok(outcome) => {
            let message = if outcome.duplicate {
                "Duplicate file detected. Using existing statement."
            } else {
                "File uploaded successfully. Processing started in background."
            };
            axum::Json(serde_json::json!({
                "job_id": outcome.job_id,
                "filename": filename,
                "status": outcome.status.as_str(),
                "message": message,
            }))
            .into_response()
        }
        Err(e) if e.is_client_error() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::error!("Upload failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /statements/:id/status - processing status and progress.
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.status(&id).await {
        Ok(Some(statement)) => axum::Json(serde_json::json!({
            "id": statement.id,
            "status": statement.status.as_str(),
            "progress": {
                "page_count": statement.page_count,
                "total_transactions": statement.total_transactions,
                "overall_confidence": statement.overall_confidence,
                "processing_time": statement.processing_time_seconds,
            },
            "error": statement.processing_error,
        }))
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Statement not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn statement_summary(statement: &Statement) -> serde_json::Value {
    serde_json::json!({
        "id": statement.id,
        "filename": statement.filename,
        "status": statement.status.as_str(),
        "page_count": statement.page_count,
        "total_transactions": statement.total_transactions,
        "overall_confidence": statement.overall_confidence,
        "created_at": statement.created_at.to_rfc3339(),
    })
}

fn full_statement_json(full: &FullStatement) -> serde_json::Value {
    let mut body = statement_summary(&full.statement);

    body["customer_details"] = full
        .customer
        .as_ref()
        .map(|c| {
            serde_json::json!({
                "account_holder_name": c.account_holder_name,
                "account_number_masked": c.account_number_masked,
                "account_type": c.account_type,
                "address": c.address,
                "email": c.email,
                "phone": c.phone,
                "confidence_scores": c.confidence_scores,
            })
        })
        .unwrap_or(serde_json::Value::Null);

    body["bank_details"] = full
        .bank
        .as_ref()
        .map(|b| {
            serde_json::json!({
                "bank_name": b.bank_name,
                "branch_name": b.branch_name,
                "currency": b.currency,
                "period_start_date": b.period_start_date,
                "period_end_date": b.period_end_date,
                "opening_balance": b.opening_balance,
                "closing_balance": b.closing_balance,
                "total_debits": b.total_debits,
                "total_credits": b.total_credits,
                "confidence_scores": b.confidence_scores,
            })
        })
        .unwrap_or(serde_json::Value::Null);

    body["transactions"] = full
        .transactions
        .iter()
        .map(|t| {
            serde_json::json!({
                "date": t.date,
                "description": t.description,
                "debit": t.debit,
                "credit": t.credit,
                "balance": t.balance,
                "transaction_type": t.transaction_type,
                "reference_number": t.reference_number,
                "check_number": t.check_number,
                "category": t.category,
                "page_number": t.page_number,
                "confidence": t.confidence,
                "raw_data": t.raw_data,
            })
        })
        .collect();

    body
}

/// GET /statements/:id - full record with extracted details.
pub async fn get_statement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.get(&id).await {
        Ok(Some(full)) => axum::Json(full_statement_json(&full)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Statement not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /statements - paginated listing, newest first.
pub async fn list_statements(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(10);

    match state.controller.list(skip, limit).await {
        Ok((total, statements)) => axum::Json(serde_json::json!({
            "total": total,
            "statements": statements.iter().map(statement_summary).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// DELETE /statements/:id - remove the statement, its rows, and its blob.
pub async fn delete_statement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.delete(&id).await {
        Ok(true) => axum::Json(serde_json::json!({
            "message": "Statement deleted successfully"
        }))
        .into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Statement not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /statements/:id/csv - export a completed statement.
pub async fn export_csv(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.export_csv(&id).await {
        Ok((filename, body)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename={}", filename),
                ),
            ],
            body,
        )
            .into_response(),
        Err(ExportError::NotFound) => error_response(StatusCode::NOT_FOUND, "Statement not found"),
        Err(ExportError::NotCompleted) => {
            error_response(StatusCode::BAD_REQUEST, "Statement processing not completed")
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
