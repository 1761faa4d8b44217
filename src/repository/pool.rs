//! SQLite connection handling.
//!
//! diesel-async has no native SQLite driver, so connections go through
//! `SyncConnectionWrapper`. The pool is lightweight: SQLite connections are
//! cheap to open, so one is established per operation rather than held.

use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl};

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// SQLite connection pool (creates connections on demand).
#[derive(Clone)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    /// Create a new pool. A `sqlite:` prefix on the URL is optional.
    pub fn new(database_url: &str) -> Self {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    /// Create a pool from a file path.
    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// Get a connection with foreign keys and a busy timeout enabled.
    pub async fn get(&self) -> Result<SqliteConn, DieselError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(|e| {
                DieselError::DatabaseError(
                    diesel::result::DatabaseErrorKind::UnableToSendCommand,
                    Box::new(e.to_string()),
                )
            })?;

        // Cascading deletes depend on foreign_keys being on per-connection.
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(&mut conn)
            .await?;
        diesel::sql_query("PRAGMA busy_timeout = 5000")
            .execute(&mut conn)
            .await?;

        Ok(conn)
    }

    /// Get the database URL (without the sqlite: prefix).
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_stripped() {
        assert_eq!(SqlitePool::new("sqlite:/tmp/db.sqlite").database_url(), "/tmp/db.sqlite");
        assert_eq!(SqlitePool::new("/tmp/db.sqlite").database_url(), "/tmp/db.sqlite");
    }
}
