//! Durable storage for statements and extraction results.

mod migrations;
mod pool;
mod records;
mod statements;

pub use migrations::run_migrations;
pub use pool::{DieselError, SqlitePool};
pub use statements::{CompletionStats, DieselStatementRepository, FullStatement};

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp stored as text.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a timestamp for text storage.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
