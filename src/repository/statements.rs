//! Statement repository: CRUD, state transitions, and transactional result
//! writes.
//!
//! State transitions are guarded in SQL (`WHERE status = ...`) so a job can
//! never move backwards, and the success-path writes happen inside a single
//! transaction with the final state change.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::models::{
    JobStatus, ProcessingLogEntry, Statement, StatementRecordSet, TokenUsage, Transaction,
};
use crate::schema::{bank_details, customer_details, processing_logs, statements, transactions};

use super::pool::{DieselError, SqlitePool};
use super::records::{
    BankDetailsRecord, CustomerDetailsRecord, NewProcessingLog, NewStatement,
    ProcessingLogRecord, StatementRecord, TransactionRecord,
};
use super::format_datetime;

/// A statement joined with everything extracted from it.
#[derive(Debug, Clone)]
pub struct FullStatement {
    pub statement: Statement,
    pub customer: Option<crate::models::CustomerDetails>,
    pub bank: Option<crate::models::BankDetails>,
    pub transactions: Vec<Transaction>,
}

/// Aggregates written alongside the `Completed` transition.
#[derive(Debug, Clone, Default)]
pub struct CompletionStats {
    pub page_count: i32,
    pub total_transactions: i32,
    pub overall_confidence: f64,
    pub processing_time_seconds: f64,
    pub tokens: TokenUsage,
}

/// Diesel-backed statement repository.
#[derive(Clone)]
pub struct DieselStatementRepository {
    pool: SqlitePool,
}

impl DieselStatementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new pending statement.
    pub async fn insert(&self, statement: &Statement) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(statements::table)
            .values(NewStatement::from_model(statement))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Fetch a statement by id.
    pub async fn get(&self, id: &str) -> Result<Option<Statement>, DieselError> {
        let mut conn = self.pool.get().await?;
        let record: Option<StatementRecord> = statements::table
            .find(id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(StatementRecord::into_model))
    }

    /// Fetch a statement by content hash.
    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<Statement>, DieselError> {
        let mut conn = self.pool.get().await?;
        let record: Option<StatementRecord> = statements::table
            .filter(statements::file_hash.eq(hash))
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(StatementRecord::into_model))
    }

    /// List statements newest-first with the total row count.
    pub async fn list(&self, skip: i64, limit: i64) -> Result<(i64, Vec<Statement>), DieselError> {
        let mut conn = self.pool.get().await?;
        let total: i64 = statements::table.count().get_result(&mut conn).await?;
        let records: Vec<StatementRecord> = statements::table
            .order(statements::created_at.desc())
            .offset(skip)
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok((
            total,
            records.into_iter().map(StatementRecord::into_model).collect(),
        ))
    }

    /// Statement counts per state.
    pub async fn counts_by_status(&self) -> Result<Vec<(String, i64)>, DieselError> {
        use diesel::dsl::count_star;
        let mut conn = self.pool.get().await?;
        statements::table
            .group_by(statements::status)
            .select((statements::status, count_star()))
            .load(&mut conn)
            .await
    }

    /// Transition `Pending -> Processing`, stamping the start time.
    ///
    /// Returns false when the row was not pending (already picked up,
    /// deleted, or in a terminal state).
    pub async fn mark_processing(&self, id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = format_datetime(&Utc::now());
        let updated = diesel::update(
            statements::table
                .find(id)
                .filter(statements::status.eq(JobStatus::Pending.as_str())),
        )
        .set((
            statements::status.eq(JobStatus::Processing.as_str()),
            statements::processing_started_at.eq(&now),
            statements::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    /// Persist a successful run: extracted rows, stage logs, aggregates and
    /// the `Processing -> Completed` transition, all in one transaction.
    ///
    /// Returns false (writing nothing) when the job is no longer in
    /// `Processing`.
    pub async fn complete_job(
        &self,
        id: &str,
        records: &StatementRecordSet,
        logs: &[ProcessingLogEntry],
        stats: &CompletionStats,
    ) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let id = id.to_string();
        let records = records.clone();
        let logs = logs.to_vec();
        let stats = stats.clone();

        conn.transaction::<_, DieselError, _>(|conn| {
            async move {
                let now = format_datetime(&Utc::now());
                let updated = diesel::update(
                    statements::table
                        .find(&id)
                        .filter(statements::status.eq(JobStatus::Processing.as_str())),
                )
                .set((
                    statements::status.eq(JobStatus::Completed.as_str()),
                    statements::processing_completed_at.eq(&now),
                    statements::updated_at.eq(&now),
                    statements::page_count.eq(stats.page_count),
                    statements::total_transactions.eq(stats.total_transactions),
                    statements::overall_confidence.eq(stats.overall_confidence),
                    statements::processing_time_seconds.eq(stats.processing_time_seconds),
                    statements::prompt_tokens.eq(stats.tokens.prompt as i32),
                    statements::completion_tokens.eq(stats.tokens.completion as i32),
                    statements::total_tokens.eq(stats.tokens.total as i32),
                ))
                .execute(conn)
                .await?;

                if updated != 1 {
                    return Ok(false);
                }

                if let Some(customer) = &records.customer {
                    diesel::insert_into(customer_details::table)
                        .values(CustomerDetailsRecord::from_model(&id, customer))
                        .execute(conn)
                        .await?;
                }

                if let Some(bank) = &records.bank {
                    diesel::insert_into(bank_details::table)
                        .values(BankDetailsRecord::from_model(&id, bank))
                        .execute(conn)
                        .await?;
                }

                for txn in &records.transactions {
                    diesel::insert_into(transactions::table)
                        .values(TransactionRecord::from_model(&id, txn))
                        .execute(conn)
                        .await?;
                }

                for entry in &logs {
                    diesel::insert_into(processing_logs::table)
                        .values(NewProcessingLog::from_model(&id, entry))
                        .execute(conn)
                        .await?;
                }

                Ok(true)
            }
            .scope_boxed()
        })
        .await
    }

    /// Persist a failed run: stage logs plus the `Processing -> Failed`
    /// transition with the joined error string.
    pub async fn fail_job(
        &self,
        id: &str,
        error: &str,
        logs: &[ProcessingLogEntry],
    ) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let id = id.to_string();
        let error = error.to_string();
        let logs = logs.to_vec();

        conn.transaction::<_, DieselError, _>(|conn| {
            async move {
                let now = format_datetime(&Utc::now());
                let updated = diesel::update(
                    statements::table
                        .find(&id)
                        .filter(statements::status.eq(JobStatus::Processing.as_str())),
                )
                .set((
                    statements::status.eq(JobStatus::Failed.as_str()),
                    statements::processing_completed_at.eq(&now),
                    statements::updated_at.eq(&now),
                    statements::processing_error.eq(&error),
                ))
                .execute(conn)
                .await?;

                if updated != 1 {
                    return Ok(false);
                }

                for entry in &logs {
                    diesel::insert_into(processing_logs::table)
                        .values(NewProcessingLog::from_model(&id, entry))
                        .execute(conn)
                        .await?;
                }

                Ok(true)
            }
            .scope_boxed()
        })
        .await
    }

    /// Delete a statement; child rows cascade.
    pub async fn delete(&self, id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(statements::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    /// Fetch a statement with customer, bank, and date-ordered transactions.
    pub async fn get_full(&self, id: &str) -> Result<Option<FullStatement>, DieselError> {
        let Some(statement) = self.get(id).await? else {
            return Ok(None);
        };

        let mut conn = self.pool.get().await?;

        let customer: Option<CustomerDetailsRecord> = customer_details::table
            .filter(customer_details::statement_id.eq(id))
            .first(&mut conn)
            .await
            .optional()?;

        let bank: Option<BankDetailsRecord> = bank_details::table
            .filter(bank_details::statement_id.eq(id))
            .first(&mut conn)
            .await
            .optional()?;

        let txns: Vec<TransactionRecord> = transactions::table
            .filter(transactions::statement_id.eq(id))
            .order(transactions::date.asc())
            .load(&mut conn)
            .await?;

        Ok(Some(FullStatement {
            statement,
            customer: customer.map(CustomerDetailsRecord::into_model),
            bank: bank.map(BankDetailsRecord::into_model),
            transactions: txns.into_iter().map(TransactionRecord::into_model).collect(),
        }))
    }

    /// Fetch the stage log for a statement in append order.
    pub async fn get_logs(&self, id: &str) -> Result<Vec<ProcessingLogEntry>, DieselError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<ProcessingLogRecord> = processing_logs::table
            .filter(processing_logs::statement_id.eq(id))
            .order(processing_logs::id.asc())
            .load(&mut conn)
            .await?;
        Ok(records
            .into_iter()
            .map(ProcessingLogRecord::into_model)
            .collect())
    }

    /// Crash-recovery sweep: mark every `Processing` row as failed.
    ///
    /// Run once at startup; anything still `Processing` then was interrupted
    /// by a previous shutdown.
    pub async fn recover_interrupted(&self) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = format_datetime(&Utc::now());
        diesel::update(
            statements::table.filter(statements::status.eq(JobStatus::Processing.as_str())),
        )
        .set((
            statements::status.eq(JobStatus::Failed.as_str()),
            statements::processing_error.eq("interrupted"),
            statements::processing_completed_at.eq(&now),
            statements::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await
    }
}
