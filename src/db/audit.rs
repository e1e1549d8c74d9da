//! Backend feature audits ensure required DB capabilities are available.

use diesel::{
    QueryableByName,
    result::{Error as DieselError, QueryResult},
    sql_query,
    sql_types::Text,
};
use diesel_async::RunQueryDsl;

use super::connection::DbConnection;

/// Oldest `SQLite` release with `RETURNING` support.
const MIN_SQLITE: (u32, u32) = (3, 35);

#[derive(QueryableByName)]
struct SqliteVersion {
    #[diesel(sql_type = Text)]
    version: String,
}

/// Verify that `SQLite` supports features required by the application.
///
/// Inserts rely on `RETURNING`, which needs `SQLite` 3.35 or newer.
///
/// # Errors
/// Returns any error produced by the version query, or a query-builder error
/// if the version is too old or cannot be parsed.
#[must_use = "handle the result"]
pub async fn audit_sqlite_features(conn: &mut DbConnection) -> QueryResult<()> {
    let row: SqliteVersion = sql_query("SELECT sqlite_version() AS version")
        .get_result(conn)
        .await?;

    match parse_version(&row.version) {
        Some(found) if found >= MIN_SQLITE => Ok(()),
        Some(_) => Err(DieselError::QueryBuilderError(
            format!(
                "SQLite {} is too old; {}.{} or newer is required",
                row.version, MIN_SQLITE.0, MIN_SQLITE.1
            )
            .into(),
        )),
        None => Err(DieselError::QueryBuilderError(
            format!("unrecognised SQLite version '{}'", row.version).into(),
        )),
    }
}

fn parse_version(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}
