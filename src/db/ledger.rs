//! Borrow requests, ownership, read-marks and feedback.
//!
//! These tables reference users and books by key only; rows here never
//! decide the lifecycle of either.

use std::collections::HashMap;

use chrono::NaiveDate;
use diesel::{prelude::*, result::QueryResult};
use diesel_async::RunQueryDsl;

use super::connection::DbConnection;
use crate::models::{
    Book,
    Feedback,
    FeedbackView,
    NewFeedback,
    NewOwner,
    NewRead,
    NewRequest,
    Request,
    RequestOutcome,
    RequestView,
};

/// The open request `email` has for `book`, if any.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn pending_request_for(
    conn: &mut DbConnection,
    email: &str,
    book: i32,
) -> QueryResult<Option<Request>> {
    use crate::schema::requests::dsl::{book_id, pending, requests, user_email};
    requests
        .filter(user_email.eq(email))
        .filter(book_id.eq(book))
        .filter(pending.eq(true))
        .select(Request::as_select())
        .first(conn)
        .await
        .optional()
}

/// Open a new pending request.
///
/// # Errors
/// Returns any error produced by the insertion query.
#[must_use = "handle the result"]
pub async fn open_request(conn: &mut DbConnection, request: &NewRequest<'_>) -> QueryResult<Request> {
    use crate::schema::requests::dsl::requests;
    diesel::insert_into(requests)
        .values(request)
        .returning(Request::as_returning())
        .get_result(conn)
        .await
}

/// Close a request if, and only if, it is still pending.
///
/// The state check and the write are a single statement, so two concurrent
/// closers cannot both succeed. Returns the closed row, or `None` when the
/// request does not exist or was already closed.
///
/// # Errors
/// Returns any error produced by the update query.
#[must_use = "handle the result"]
pub async fn close_request(
    conn: &mut DbConnection,
    request: i32,
    outcome: RequestOutcome,
    on: NaiveDate,
) -> QueryResult<Option<Request>> {
    use crate::schema::requests::dsl::{closed_on, id, outcome as outcome_col, pending, requests};
    diesel::update(requests.filter(id.eq(request)).filter(pending.eq(true)))
        .set((
            pending.eq(false),
            closed_on.eq(Some(on)),
            outcome_col.eq(Some(outcome.as_str())),
        ))
        .returning(Request::as_returning())
        .get_result(conn)
        .await
        .optional()
}

/// Every pending request, oldest first.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn list_pending(conn: &mut DbConnection) -> QueryResult<Vec<Request>> {
    use crate::schema::requests::dsl::{id, pending, requests};
    requests
        .filter(pending.eq(true))
        .order(id.asc())
        .select(Request::as_select())
        .load(conn)
        .await
}

/// Every request ever made, oldest first.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn list_requests(conn: &mut DbConnection) -> QueryResult<Vec<Request>> {
    use crate::schema::requests::dsl::{id, requests};
    requests
        .order(id.asc())
        .select(Request::as_select())
        .load(conn)
        .await
}

/// Requests opened within `[from, to]`, optionally restricted to one user.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn requests_opened_between(
    conn: &mut DbConnection,
    email: Option<&str>,
    from: NaiveDate,
    to: NaiveDate,
) -> QueryResult<Vec<Request>> {
    use crate::schema::requests::dsl::{id, opened_on, requests, user_email};
    let mut query = requests
        .filter(opened_on.ge(from))
        .filter(opened_on.le(to))
        .order(id.asc())
        .select(Request::as_select())
        .into_boxed();
    if let Some(address) = email {
        query = query.filter(user_email.eq(address));
    }
    query.load(conn).await
}

/// Number of requests, optionally restricted to one closing outcome.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn count_requests(
    conn: &mut DbConnection,
    outcome: Option<RequestOutcome>,
) -> QueryResult<i64> {
    use crate::schema::requests::dsl::{outcome as outcome_col, requests};
    match outcome {
        Some(wanted) => {
            requests
                .filter(outcome_col.eq(wanted.as_str()))
                .count()
                .get_result(conn)
                .await
        }
        None => requests.count().get_result(conn).await,
    }
}

/// Attach the current holder of each request's book.
///
/// Requests whose book has been deleted get an empty `held_by`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn request_views(
    conn: &mut DbConnection,
    rows: Vec<Request>,
) -> QueryResult<Vec<RequestView>> {
    use crate::schema::books::dsl::{books, holder, id};
    let ids: Vec<i32> = rows.iter().map(|r| r.book_id).collect();
    let holders: HashMap<i32, Option<String>> = books
        .filter(id.eq_any(&ids))
        .select((id, holder))
        .load::<(i32, Option<String>)>(conn)
        .await?
        .into_iter()
        .collect();
    Ok(rows
        .into_iter()
        .map(|request| {
            let held_by = holders
                .get(&request.book_id)
                .cloned()
                .flatten()
                .unwrap_or_default();
            RequestView { request, held_by }
        })
        .collect())
}

/// Whether `email` has purchased `book`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn owns(conn: &mut DbConnection, email: &str, book: i32) -> QueryResult<bool> {
    use crate::schema::owners::dsl::{book_id, owners, user_email};
    diesel::select(diesel::dsl::exists(
        owners.filter(user_email.eq(email)).filter(book_id.eq(book)),
    ))
    .get_result(conn)
    .await
}

/// Ids of every book `email` has purchased.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn owned_book_ids(conn: &mut DbConnection, email: &str) -> QueryResult<Vec<i32>> {
    use crate::schema::owners::dsl::{book_id, owners, user_email};
    owners
        .filter(user_email.eq(email))
        .select(book_id)
        .load(conn)
        .await
}

/// Record a purchase.
///
/// # Errors
/// Returns any error produced by the insertion query, including a unique
/// violation for a repeat purchase.
#[must_use = "handle the result"]
pub async fn add_owner(conn: &mut DbConnection, owner: &NewOwner<'_>) -> QueryResult<usize> {
    use crate::schema::owners::dsl::owners;
    diesel::insert_into(owners).values(owner).execute(conn).await
}

/// Whether `email` has marked `book` as read.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn has_read(conn: &mut DbConnection, email: &str, book: i32) -> QueryResult<bool> {
    use crate::schema::reads::dsl::{book_id, reads, user_email};
    diesel::select(diesel::dsl::exists(
        reads.filter(user_email.eq(email)).filter(book_id.eq(book)),
    ))
    .get_result(conn)
    .await
}

/// Record a read-mark.
///
/// # Errors
/// Returns any error produced by the insertion query.
#[must_use = "handle the result"]
pub async fn add_read(conn: &mut DbConnection, read: &NewRead<'_>) -> QueryResult<usize> {
    use crate::schema::reads::dsl::reads;
    diesel::insert_into(reads).values(read).execute(conn).await
}

/// Books `email` has marked as read, with the date of each mark.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn reads_for_user(
    conn: &mut DbConnection,
    email: &str,
) -> QueryResult<Vec<(Book, NaiveDate)>> {
    use crate::schema::{books, reads};
    reads::table
        .inner_join(books::table)
        .filter(reads::user_email.eq(email))
        .order(reads::read_on.asc())
        .select((Book::as_select(), reads::read_on))
        .load(conn)
        .await
}

/// Books `email` marked as read within `[from, to]`, oldest mark first.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn reads_between(
    conn: &mut DbConnection,
    email: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> QueryResult<Vec<(Book, NaiveDate)>> {
    use crate::schema::{books, reads};
    reads::table
        .inner_join(books::table)
        .filter(reads::user_email.eq(email))
        .filter(reads::read_on.between(from, to))
        .order(reads::read_on.asc())
        .select((Book::as_select(), reads::read_on))
        .load(conn)
        .await
}

/// Whether `email` already left feedback on `book`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn has_feedback(conn: &mut DbConnection, email: &str, book: i32) -> QueryResult<bool> {
    use crate::schema::feedback::dsl::{book_id, feedback, user_email};
    diesel::select(diesel::dsl::exists(
        feedback.filter(user_email.eq(email)).filter(book_id.eq(book)),
    ))
    .get_result(conn)
    .await
}

/// Store a feedback row.
///
/// # Errors
/// Returns any error produced by the insertion query.
#[must_use = "handle the result"]
pub async fn add_feedback(conn: &mut DbConnection, row: &NewFeedback<'_>) -> QueryResult<usize> {
    use crate::schema::feedback::dsl::feedback;
    diesel::insert_into(feedback).values(row).execute(conn).await
}

/// Every rating left on any of `book_ids`, keyed by book.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn ratings_for_books(
    conn: &mut DbConnection,
    book_ids: &[i32],
) -> QueryResult<HashMap<i32, Vec<i32>>> {
    use crate::schema::feedback::dsl::{book_id, feedback, rating};
    let rows: Vec<(i32, i32)> = feedback
        .filter(book_id.eq_any(book_ids))
        .select((book_id, rating))
        .load(conn)
        .await?;
    let mut grouped: HashMap<i32, Vec<i32>> = HashMap::new();
    for (book, score) in rows {
        grouped.entry(book).or_default().push(score);
    }
    Ok(grouped)
}

/// Feedback rows with their book titles, optionally filtered by book and by
/// the date range `[from, to]`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn feedback_views(
    conn: &mut DbConnection,
    book: Option<i32>,
    range: Option<(NaiveDate, NaiveDate)>,
) -> QueryResult<Vec<FeedbackView>> {
    use crate::schema::{books, feedback};
    let mut query = feedback::table
        .inner_join(books::table)
        .order(feedback::id.asc())
        .select((Feedback::as_select(), books::title))
        .into_boxed();
    if let Some(wanted) = book {
        query = query.filter(feedback::book_id.eq(wanted));
    }
    if let Some((from, to)) = range {
        query = query
            .filter(feedback::given_on.ge(from))
            .filter(feedback::given_on.le(to));
    }
    let rows: Vec<(Feedback, String)> = query.load(conn).await?;
    Ok(rows
        .into_iter()
        .map(|(row, title)| FeedbackView {
            id: row.id,
            book_name: title,
            rating: row.rating,
            feedback: row.comment,
            user_name: row.user_email,
            on: row.given_on,
        })
        .collect())
}
