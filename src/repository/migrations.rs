//! Embedded schema migrations.
//!
//! The migration SQL is compiled into the binary and applied before the
//! server or CLI touches the statement database. diesel's migration harness
//! is synchronous, so the work runs on a blocking thread.

use diesel::{Connection, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use super::pool::DieselError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

/// Bring the database at `database_url` up to the current schema.
pub async fn run_migrations(database_url: &str) -> Result<(), DieselError> {
    // The pool accepts an optional sqlite: scheme; diesel's sync connection
    // wants the bare filesystem path.
    let path = database_url
        .strip_prefix("sqlite:")
        .unwrap_or(database_url)
        .to_string();

    let applied = tokio::task::spawn_blocking(move || -> Result<Vec<String>, DieselError> {
        let mut conn = SqliteConnection::establish(&path).map_err(|e| {
            DieselError::DatabaseError(
                diesel::result::DatabaseErrorKind::UnableToSendCommand,
                Box::new(format!("cannot open statement database {}: {}", path, e)),
            )
        })?;

        let versions = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(DieselError::QueryBuilderError)?
            .iter()
            .map(|version| version.to_string())
            .collect();
        Ok(versions)
    })
    .await
    .map_err(|e| DieselError::QueryBuilderError(Box::new(e)))??;

    if applied.is_empty() {
        info!("Statement schema is current");
    } else {
        info!(
            "Migrated statement schema ({}): {}",
            applied.len(),
            applied.join(", ")
        );
    }

    Ok(())
}
