//! Connection and pool helpers for database access.

use diesel::{
    ConnectionError,
    ConnectionResult,
    connection::{AnsiTransactionManager, TransactionManager},
    sqlite::SqliteConnection,
};
use diesel_async::{
    AsyncConnection,
    SimpleAsyncConnection,
    pooled_connection::{AsyncDieselConnectionManager, ManagerConfig, PoolError, bb8::Pool},
    scoped_futures::ScopedBoxFuture,
    sync_connection_wrapper::SyncConnectionWrapper,
};
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use futures_util::FutureExt;
use tracing::warn;

/// Embedded database migrations for `SQLite`.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
/// Connection type for `SQLite` database access.
pub type DbConnection = SyncConnectionWrapper<SqliteConnection>;
/// Connection pool type for `SQLite`.
pub type DbPool = Pool<DbConnection>;

// Writers wait up to five seconds for the lock instead of failing at once.
const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;";

/// Open a single connection with the pragmas every pooled connection gets.
///
/// # Errors
/// Returns an error if the database cannot be opened or configured.
pub async fn establish_connection(database_url: &str) -> ConnectionResult<DbConnection> {
    let mut conn = DbConnection::establish(database_url).await?;
    conn.batch_execute(CONNECTION_PRAGMAS)
        .await
        .map_err(ConnectionError::CouldntSetupConfiguration)?;
    Ok(conn)
}

/// Create a pooled connection to the configured database.
///
/// # Examples
///
/// ```no_run
/// use libra::db::establish_pool;
/// async fn example() {
///     let pool = establish_pool("libra.db")
///         .await
///         .expect("failed to build pool");
/// }
/// ```
///
/// # Errors
/// Returns any error reported by the underlying connection pool builder.
pub async fn establish_pool(database_url: &str) -> Result<DbPool, PoolError> {
    let mut setup = ManagerConfig::<DbConnection>::default();
    setup.custom_setup = Box::new(|url| establish_connection(url).boxed());
    let config = AsyncDieselConnectionManager::<DbConnection>::new_with_config(database_url, setup);
    Pool::builder().build(config).await
}

/// Run `callback` inside a `BEGIN IMMEDIATE` transaction.
///
/// The write lock is taken before the first statement, so concurrent
/// writers queue on the busy timeout and each sees the others' committed
/// rows.
///
/// # Errors
/// Returns the callback's error after rolling back, or a storage error from
/// `BEGIN`/`COMMIT`.
pub async fn write_transaction<'a, R, E, F>(conn: &mut DbConnection, callback: F) -> Result<R, E>
where
    F: for<'r> FnOnce(&'r mut DbConnection) -> ScopedBoxFuture<'a, 'r, Result<R, E>> + Send + 'a,
    E: From<diesel::result::Error> + Send,
    R: Send,
{
    conn.spawn_blocking(|inner| AnsiTransactionManager::begin_transaction_sql(inner, "BEGIN IMMEDIATE"))
        .await?;
    match callback(&mut *conn).await {
        Ok(value) => {
            conn.spawn_blocking(AnsiTransactionManager::commit_transaction)
                .await?;
            Ok(value)
        }
        Err(err) => {
            let rollback = conn
                .spawn_blocking(AnsiTransactionManager::rollback_transaction)
                .await;
            if let Err(rollback) = rollback {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
