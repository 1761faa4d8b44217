//! Domain models for statements and their extracted records.

mod statement;

pub use statement::{
    BankDetails, CustomerDetails, JobStatus, ProcessingLogEntry, Statement, StatementRecordSet,
    TokenUsage, Transaction,
};
