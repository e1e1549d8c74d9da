//! Reader, librarian and visit-history helpers.

use chrono::{NaiveDate, NaiveDateTime};
use diesel::{prelude::*, result::QueryResult};
use diesel_async::RunQueryDsl;

use super::connection::DbConnection;
use crate::models::{Librarian, NewLibrarian, NewUser, NewVisit, ProfileUpdate, User};

/// Look up a reader by email.
///
/// # Errors
/// Returns any error produced by the underlying database query.
#[must_use = "handle the result"]
pub async fn get_user(conn: &mut DbConnection, address: &str) -> QueryResult<Option<User>> {
    use crate::schema::users::dsl::{email, users};
    users
        .filter(email.eq(address))
        .select(User::as_select())
        .first(conn)
        .await
        .optional()
}

/// Insert a new reader record.
///
/// # Errors
/// Returns any error produced by the insertion query, including a unique
/// violation when the email is taken.
#[must_use = "handle the result"]
pub async fn create_user(conn: &mut DbConnection, user: &NewUser<'_>) -> QueryResult<usize> {
    use crate::schema::users::dsl::users;
    diesel::insert_into(users).values(user).execute(conn).await
}

/// List every reader ordered by email.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn list_users(conn: &mut DbConnection) -> QueryResult<Vec<User>> {
    use crate::schema::users::dsl::{email, users};
    users
        .order(email.asc())
        .select(User::as_select())
        .load(conn)
        .await
}

/// Overwrite the editable profile columns of a reader.
///
/// # Errors
/// Returns any error produced by the update query.
#[must_use = "handle the result"]
pub async fn update_profile(
    conn: &mut DbConnection,
    address: &str,
    update: &ProfileUpdate<'_>,
) -> QueryResult<usize> {
    use crate::schema::users::dsl::{email, users};
    diesel::update(users.filter(email.eq(address)))
        .set(update)
        .execute(conn)
        .await
}

/// Stamp (or clear, with `None`) a reader's last activity time.
///
/// # Errors
/// Returns any error produced by the update query.
#[must_use = "handle the result"]
pub async fn set_last_active(
    conn: &mut DbConnection,
    address: &str,
    at: Option<NaiveDateTime>,
) -> QueryResult<usize> {
    use crate::schema::users::dsl::{email, last_active_at, users};
    diesel::update(users.filter(email.eq(address)))
        .set(last_active_at.eq(at))
        .execute(conn)
        .await
}

/// Readers whose last recorded activity is at or after `since`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn active_users(conn: &mut DbConnection, since: NaiveDateTime) -> QueryResult<Vec<User>> {
    use crate::schema::users::dsl::{email, last_active_at, users};
    users
        .filter(last_active_at.ge(since))
        .order(email.asc())
        .select(User::as_select())
        .load(conn)
        .await
}

/// Record that a reader visited on `day`. Repeat visits on the same day are
/// ignored.
///
/// # Errors
/// Returns any error produced by the insertion query.
#[must_use = "handle the result"]
pub async fn record_visit(conn: &mut DbConnection, address: &str, day: NaiveDate) -> QueryResult<bool> {
    use crate::schema::visits::dsl::visits;
    diesel::insert_into(visits)
        .values(&NewVisit {
            user_email: address,
            visited_on: day,
        })
        .on_conflict_do_nothing()
        .execute(conn)
        .await
        .map(|rows| rows > 0)
}

/// Emails of readers with a visit recorded on `day`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn visitors_on(conn: &mut DbConnection, day: NaiveDate) -> QueryResult<Vec<String>> {
    use crate::schema::visits::dsl::{user_email, visited_on, visits};
    visits
        .filter(visited_on.eq(day))
        .select(user_email)
        .distinct()
        .load(conn)
        .await
}

/// Number of days in `[from, to]` on which the reader visited.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn count_visits(
    conn: &mut DbConnection,
    address: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> QueryResult<i64> {
    use crate::schema::visits::dsl::{user_email, visited_on, visits};
    visits
        .filter(user_email.eq(address))
        .filter(visited_on.ge(from))
        .filter(visited_on.le(to))
        .count()
        .get_result(conn)
        .await
}

/// Look up a librarian by username.
///
/// # Errors
/// Returns any error produced by the underlying database query.
#[must_use = "handle the result"]
pub async fn get_librarian(conn: &mut DbConnection, name: &str) -> QueryResult<Option<Librarian>> {
    use crate::schema::librarians::dsl::{librarians, username};
    librarians
        .filter(username.eq(name))
        .select(Librarian::as_select())
        .first(conn)
        .await
        .optional()
}

/// The first librarian account, used as the recipient of monthly reports.
///
/// # Errors
/// Returns any error produced by the underlying database query.
#[must_use = "handle the result"]
pub async fn first_librarian(conn: &mut DbConnection) -> QueryResult<Option<Librarian>> {
    use crate::schema::librarians::dsl::{librarians, username};
    librarians
        .order(username.asc())
        .select(Librarian::as_select())
        .first(conn)
        .await
        .optional()
}

/// Insert a new librarian record.
///
/// # Errors
/// Returns any error produced by the insertion query.
#[must_use = "handle the result"]
pub async fn create_librarian(
    conn: &mut DbConnection,
    librarian: &NewLibrarian<'_>,
) -> QueryResult<usize> {
    use crate::schema::librarians::dsl::librarians;
    diesel::insert_into(librarians)
        .values(librarian)
        .execute(conn)
        .await
}
