//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations
//! and convert to/from the domain models in `crate::models`.

use diesel::prelude::*;

use crate::models::{
    BankDetails, CustomerDetails, JobStatus, ProcessingLogEntry, Statement, TokenUsage,
    Transaction,
};
use crate::schema;

use super::{format_datetime, parse_datetime};

/// Statement row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::statements)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StatementRecord {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub file_hash: String,
    pub file_size: i32,
    pub status: String,
    pub processing_started_at: Option<String>,
    pub processing_completed_at: Option<String>,
    pub processing_error: Option<String>,
    pub page_count: i32,
    pub total_transactions: i32,
    pub overall_confidence: Option<f64>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub processing_time_seconds: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl StatementRecord {
    pub fn into_model(self) -> Statement {
        Statement {
            id: self.id,
            filename: self.filename,
            file_path: self.file_path,
            file_hash: self.file_hash,
            file_size: self.file_size as i64,
            status: JobStatus::from_str(&self.status).unwrap_or(JobStatus::Failed),
            processing_started_at: self.processing_started_at.as_deref().and_then(parse_datetime),
            processing_completed_at: self
                .processing_completed_at
                .as_deref()
                .and_then(parse_datetime),
            processing_error: self.processing_error,
            page_count: self.page_count,
            total_transactions: self.total_transactions,
            overall_confidence: self.overall_confidence,
            tokens: TokenUsage {
                prompt: self.prompt_tokens as i64,
                completion: self.completion_tokens as i64,
                total: self.total_tokens as i64,
            },
            processing_time_seconds: self.processing_time_seconds,
            created_at: parse_datetime(&self.created_at).unwrap_or_default(),
            updated_at: parse_datetime(&self.updated_at).unwrap_or_default(),
        }
    }
}

/// New statement for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::statements)]
pub struct NewStatement {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub file_hash: String,
    pub file_size: i32,
    pub status: String,
    pub page_count: i32,
    pub total_transactions: i32,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl NewStatement {
    pub fn from_model(statement: &Statement) -> Self {
        Self {
            id: statement.id.clone(),
            filename: statement.filename.clone(),
            file_path: statement.file_path.clone(),
            file_hash: statement.file_hash.clone(),
            file_size: statement.file_size as i32,
            status: statement.status.as_str().to_string(),
            page_count: statement.page_count,
            total_transactions: statement.total_transactions,
            prompt_tokens: statement.tokens.prompt as i32,
            completion_tokens: statement.tokens.completion as i32,
            total_tokens: statement.tokens.total as i32,
            created_at: format_datetime(&statement.created_at),
            updated_at: format_datetime(&statement.updated_at),
        }
    }
}

/// Customer details row.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::customer_details)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CustomerDetailsRecord {
    pub id: String,
    pub statement_id: String,
    pub account_holder_name: Option<String>,
    pub account_number_masked: Option<String>,
    pub account_type: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub confidence_scores: String,
}

impl CustomerDetailsRecord {
    pub fn from_model(statement_id: &str, customer: &CustomerDetails) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            statement_id: statement_id.to_string(),
            account_holder_name: customer.account_holder_name.clone(),
            account_number_masked: customer.account_number_masked.clone(),
            account_type: customer.account_type.clone(),
            address: customer.address.clone(),
            email: customer.email.clone(),
            phone: customer.phone.clone(),
            confidence_scores: customer.confidence_scores.to_string(),
        }
    }

    pub fn into_model(self) -> CustomerDetails {
        CustomerDetails {
            account_holder_name: self.account_holder_name,
            account_number_masked: self.account_number_masked,
            account_type: self.account_type,
            address: self.address,
            email: self.email,
            phone: self.phone,
            confidence_scores: serde_json::from_str(&self.confidence_scores)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Bank details row.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::bank_details)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BankDetailsRecord {
    pub id: String,
    pub statement_id: String,
    pub bank_name: Option<String>,
    pub branch_name: Option<String>,
    pub currency: String,
    pub period_start_date: Option<String>,
    pub period_end_date: Option<String>,
    pub opening_balance: Option<f64>,
    pub closing_balance: Option<f64>,
    pub total_debits: Option<f64>,
    pub total_credits: Option<f64>,
    pub confidence_scores: String,
}

impl BankDetailsRecord {
    pub fn from_model(statement_id: &str, bank: &BankDetails) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            statement_id: statement_id.to_string(),
            bank_name: bank.bank_name.clone(),
            branch_name: bank.branch_name.clone(),
            currency: bank.currency.clone(),
            period_start_date: bank.period_start_date.clone(),
            period_end_date: bank.period_end_date.clone(),
            opening_balance: bank.opening_balance,
            closing_balance: bank.closing_balance,
            total_debits: bank.total_debits,
            total_credits: bank.total_credits,
            confidence_scores: bank.confidence_scores.to_string(),
        }
    }

    pub fn into_model(self) -> BankDetails {
        BankDetails {
            bank_name: self.bank_name,
            branch_name: self.branch_name,
            currency: self.currency,
            period_start_date: self.period_start_date,
            period_end_date: self.period_end_date,
            opening_balance: self.opening_balance,
            closing_balance: self.closing_balance,
            total_debits: self.total_debits,
            total_credits: self.total_credits,
            confidence_scores: serde_json::from_str(&self.confidence_scores)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Transaction row.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TransactionRecord {
    pub id: String,
    pub statement_id: String,
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
    pub bbox: Option<String>,
    pub confidence: Option<f64>,
    pub confidence_scores: String,
    pub raw_data: String,
}

impl TransactionRecord {
    pub fn from_model(statement_id: &str, txn: &Transaction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            statement_id: statement_id.to_string(),
            date: txn.date.clone(),
            description: txn.description.clone(),
            debit: txn.debit,
            credit: txn.credit,
            balance: txn.balance,
            transaction_type: txn.transaction_type.clone(),
            reference_number: txn.reference_number.clone(),
            check_number: txn.check_number.clone(),
            category: txn.category.clone(),
            page_number: txn.page_number,
            bbox: txn.bbox.as_ref().map(|b| b.to_string()),
            confidence: txn.confidence,
            confidence_scores: txn.confidence_scores.to_string(),
            raw_data: txn.raw_data.to_string(),
        }
    }

    pub fn into_model(self) -> Transaction {
        Transaction {
            date: self.date,
            description: self.description,
            debit: self.debit,
            credit: self.credit,
            balance: self.balance,
            transaction_type: self.transaction_type,
            reference_number: self.reference_number,
            check_number: self.check_number,
            category: self.category,
            page_number: self.page_number,
            bbox: self.bbox.and_then(|b| serde_json::from_str(&b).ok()),
            confidence: self.confidence,
            confidence_scores: serde_json::from_str(&self.confidence_scores)
                .unwrap_or(serde_json::Value::Null),
            raw_data: serde_json::from_str(&self.raw_data).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Processing log row (id assigned by the database).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::processing_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProcessingLogRecord {
    pub id: i32,
    pub statement_id: String,
    pub step: String,
    pub status: String,
    pub message: Option<String>,
    pub duration_seconds: Option<f64>,
    pub metadata: String,
    pub created_at: String,
}

impl ProcessingLogRecord {
    pub fn into_model(self) -> ProcessingLogEntry {
        ProcessingLogEntry {
            step: self.step,
            status: self.status,
            message: self.message,
            duration_seconds: self.duration_seconds,
            metadata: serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null),
            created_at: parse_datetime(&self.created_at).unwrap_or_default(),
        }
    }
}

/// New processing log for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::processing_logs)]
pub struct NewProcessingLog {
    pub statement_id: String,
    pub step: String,
    pub status: String,
    pub message: Option<String>,
    pub duration_seconds: Option<f64>,
    pub metadata: String,
    pub created_at: String,
}

impl NewProcessingLog {
    pub fn from_model(statement_id: &str, entry: &ProcessingLogEntry) -> Self {
        Self {
            statement_id: statement_id.to_string(),
            step: entry.step.clone(),
            status: entry.status.clone(),
            message: entry.message.clone(),
            duration_seconds: entry.duration_seconds,
            metadata: entry.metadata.to_string(),
            created_at: format_datetime(&entry.created_at),
        }
    }
}
