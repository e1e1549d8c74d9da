//! Embedded migration utilities.

use std::{error::Error as StdError, fmt, time::Duration};

use diesel::result::{Error as DieselError, QueryResult};
use diesel_migrations::MigrationHarness;
use tokio::time::timeout;
use tracing::info;

use super::connection::{DbConnection, MIGRATIONS};

#[derive(Debug)]
struct MigrationHarnessError(Box<dyn StdError + Send + Sync>);

impl fmt::Display for MigrationHarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "migration harness error: {}", self.0)
    }
}

impl StdError for MigrationHarnessError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> { Some(&*self.0) }
}

#[derive(Debug, Clone, Copy)]
struct MigrationTimeoutError(Duration);

impl fmt::Display for MigrationTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "migration execution exceeded {:?}", self.0)
    }
}

impl StdError for MigrationTimeoutError {}

const MIGRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Run embedded database migrations.
///
/// The default section (id `0`) is created by the catalog migration, so a
/// freshly migrated database is immediately usable.
///
/// # Errors
/// Returns any error produced by Diesel while running migrations, or a
/// serialization error wrapping a timeout.
#[must_use = "handle the result"]
pub async fn run_migrations(conn: &mut DbConnection) -> QueryResult<()> {
    timeout(
        MIGRATION_TIMEOUT,
        conn.spawn_blocking(|c| {
            if let Ok(false) = c.has_pending_migration(MIGRATIONS) {
                info!("no pending migrations; skipping apply");
                return Ok(());
            }
            info!("applying pending migrations");
            c.run_pending_migrations(MIGRATIONS)
                .map(|_| ())
                .map_err(|e: Box<dyn StdError + Send + Sync>| {
                    DieselError::SerializationError(Box::new(MigrationHarnessError(e)))
                })
        }),
    )
    .await
    .map_err(|_| {
        DieselError::SerializationError(Box::new(MigrationTimeoutError(MIGRATION_TIMEOUT)))
    })??;
    Ok(())
}
