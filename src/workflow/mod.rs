//! Borrow-request and book-possession state machine.
//!
//! For every `(user, book)` pair the lifecycle is
//! `NONE -> REQUESTED -> POSSESSED -> NONE`, with `REQUESTED -> REJECTED`
//! as an informational side branch from which the user may request again.
//! This module is the only writer of the possession columns on `books`
//! (`holder`, `issue_date`, `due_date`). Every operation runs inside a
//! single statement or an immediate write transaction, so racing callers
//! are serialized on the database lock; callers invalidate caches only
//! after it returns `Ok`.
//!
//! Purchases, read-marks and feedback share the same precondition style and
//! live here as well.

use chrono::{Days, NaiveDate};
use diesel::{prelude::*, result::QueryResult};
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::{
    db::{DbConnection, catalog, ledger, write_transaction},
    error::{Entity, LibraryError, PolicyViolation},
    models::{Book, NewFeedback, NewOwner, NewRead, NewRequest, Request, RequestOutcome},
};


/// Books a single user may hold at once.
pub const MAX_BOOKS_IN_POSSESSION: i64 = 5;

/// Loan period applied on approval.
pub const LOAN_DAYS: u64 = 7;

/// A feedback submission.
#[derive(Clone, Copy, Debug)]
pub struct FeedbackInput<'a> {
    /// Integer score.
    pub rating: i32,
    /// Free-text comment.
    pub comment: &'a str,
}

/// Open a borrow request for `book` on behalf of `user`.
///
/// Checks run in order: the book must exist, the user must not already hold
/// it, the user must hold fewer than [`MAX_BOOKS_IN_POSSESSION`] books, and
/// no request for the same pair may be pending.
///
/// # Errors
/// [`LibraryError::NotFound`] for an unknown book, [`LibraryError::Policy`]
/// for a failed precondition, or a storage error.
#[must_use = "handle the result"]
pub async fn request(
    conn: &mut DbConnection,
    user: &str,
    book: i32,
    today: NaiveDate,
) -> Result<Request, LibraryError> {
    write_transaction::<_, LibraryError, _>(conn, |conn| {
        Box::pin(async move {
            let found = catalog::get_book(conn, book)
                .await?
                .ok_or(LibraryError::NotFound(Entity::Book))?;
            if found.holder.as_deref() == Some(user) {
                return Err(PolicyViolation::AlreadyInPossession.into());
            }
            if catalog::count_held_by(conn, user).await? >= MAX_BOOKS_IN_POSSESSION {
                return Err(PolicyViolation::MaxBooksInPossession.into());
            }
            if ledger::pending_request_for(conn, user, book).await?.is_some() {
                return Err(PolicyViolation::AlreadyRequested.into());
            }
            let opened = ledger::open_request(
                conn,
                &NewRequest {
                    user_email: user,
                    book_id: book,
                    pending: true,
                    opened_on: today,
                },
            )
            .await?;
            debug!(request = opened.id, user, book, "borrow request opened");
            Ok(opened)
        })
    })
    .await
}

/// Approve a pending request: issue the book to the requester for
/// [`LOAN_DAYS`] days and close the request as accepted.
///
/// The close is a conditional update on `pending`, so a second approval (or
/// a racing rejection) observes `NotFound` and changes nothing.
///
/// # Errors
/// [`LibraryError::NotFound`] when the request is missing or already
/// closed, or when its book no longer exists;
/// [`PolicyViolation::HeldByAnother`] when somebody else holds the book.
#[must_use = "handle the result"]
pub async fn approve(
    conn: &mut DbConnection,
    request: i32,
    today: NaiveDate,
) -> Result<Book, LibraryError> {
    write_transaction::<_, LibraryError, _>(conn, |conn| {
        Box::pin(async move {
            let closed =
                ledger::close_request(conn, request, RequestOutcome::Accepted, today)
                    .await?
                    .ok_or(LibraryError::NotFound(Entity::Request))?;
            let found = catalog::get_book(conn, closed.book_id)
                .await?
                .ok_or(LibraryError::NotFound(Entity::Book))?;
            if found
                .holder
                .as_deref()
                .is_some_and(|current| current != closed.user_email)
            {
                return Err(PolicyViolation::HeldByAnother.into());
            }
            let issued = issue(conn, closed.book_id, &closed.user_email, today).await?;
            debug!(request, book = issued.id, holder = %closed.user_email, "request approved");
            Ok(issued)
        })
    })
    .await
}

/// Reject a pending request. The book is not touched.
///
/// # Errors
/// [`LibraryError::NotFound`] when the request is missing or already
/// closed, or a storage error.
#[must_use = "handle the result"]
pub async fn reject(
    conn: &mut DbConnection,
    request: i32,
    today: NaiveDate,
) -> Result<Request, LibraryError> {
    let closed = ledger::close_request(conn, request, RequestOutcome::Rejected, today)
        .await?
        .ok_or(LibraryError::NotFound(Entity::Request))?;
    debug!(request, "request rejected");
    Ok(closed)
}

/// Give a book back. Only the current holder may return it.
///
/// # Errors
/// [`PolicyViolation::NotHolder`] when `user` does not hold `book` (including
/// when the book does not exist), or a storage error.
#[must_use = "handle the result"]
pub async fn return_book(conn: &mut DbConnection, user: &str, book: i32) -> Result<(), LibraryError> {
    use crate::schema::books::dsl::{books, due_date, holder, id, issue_date};

    let cleared = diesel::update(books.filter(id.eq(book)).filter(holder.eq(user)))
        .set((
            holder.eq(None::<String>),
            issue_date.eq(None::<NaiveDate>),
            due_date.eq(None::<NaiveDate>),
        ))
        .execute(conn)
        .await?;
    if cleared == 0 {
        return Err(PolicyViolation::NotHolder.into());
    }
    debug!(user, book, "book returned");
    Ok(())
}

/// Take a book back from whoever holds it.
///
/// Returns the email of the previous holder.
///
/// # Errors
/// [`LibraryError::NotFound`] for an unknown book, [`LibraryError::NotHeld`]
/// when nobody holds it, or a storage error.
#[must_use = "handle the result"]
pub async fn revoke(conn: &mut DbConnection, book: i32) -> Result<String, LibraryError> {
    use crate::schema::books::dsl::{books, due_date, holder, id, issue_date};

    write_transaction::<_, LibraryError, _>(conn, |conn| {
        Box::pin(async move {
            let found = catalog::get_book(conn, book)
                .await?
                .ok_or(LibraryError::NotFound(Entity::Book))?;
            let previous = found.holder.ok_or(LibraryError::NotHeld)?;
            diesel::update(books.filter(id.eq(book)).filter(holder.is_not_null()))
                .set((
                    holder.eq(None::<String>),
                    issue_date.eq(None::<NaiveDate>),
                    due_date.eq(None::<NaiveDate>),
                ))
                .execute(conn)
                .await?;
            debug!(book, holder = %previous, "book revoked");
            Ok(previous)
        })
    })
    .await
}

/// Held books whose due date is `today` or earlier.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn due_books(conn: &mut DbConnection, today: NaiveDate) -> QueryResult<Vec<Book>> {
    use crate::schema::books::dsl::{books, due_date, holder, id};
    books
        .filter(holder.is_not_null())
        .filter(due_date.le(today))
        .order(id.asc())
        .select(Book::as_select())
        .load(conn)
        .await
}

/// Record that `user` bought `book`.
///
/// # Errors
/// [`LibraryError::NotFound`] for an unknown book,
/// [`PolicyViolation::AlreadyOwned`] for a repeat purchase, or a storage
/// error.
#[must_use = "handle the result"]
pub async fn purchase(conn: &mut DbConnection, user: &str, book: i32) -> Result<(), LibraryError> {
    write_transaction::<_, LibraryError, _>(conn, |conn| {
        Box::pin(async move {
            if catalog::get_book(conn, book).await?.is_none() {
                return Err(LibraryError::NotFound(Entity::Book));
            }
            if ledger::owns(conn, user, book).await? {
                return Err(PolicyViolation::AlreadyOwned.into());
            }
            ledger::add_owner(
                conn,
                &NewOwner {
                    user_email: user,
                    book_id: book,
                },
            )
            .await?;
            Ok(())
        })
    })
    .await
}

/// Mark a held book as read.
///
/// # Errors
/// [`LibraryError::NotFound`] for an unknown book,
/// [`PolicyViolation::NoAccess`] when `user` is not the holder,
/// [`PolicyViolation::AlreadyMarkedRead`] for a repeat mark, or a storage
/// error.
#[must_use = "handle the result"]
pub async fn mark_read(
    conn: &mut DbConnection,
    user: &str,
    book: i32,
    today: NaiveDate,
) -> Result<(), LibraryError> {
    write_transaction::<_, LibraryError, _>(conn, |conn| {
        Box::pin(async move {
            let found = catalog::get_book(conn, book)
                .await?
                .ok_or(LibraryError::NotFound(Entity::Book))?;
            if found.holder.as_deref() != Some(user) {
                return Err(PolicyViolation::NoAccess.into());
            }
            if ledger::has_read(conn, user, book).await? {
                return Err(PolicyViolation::AlreadyMarkedRead.into());
            }
            ledger::add_read(
                conn,
                &NewRead {
                    user_email: user,
                    book_id: book,
                    read_on: today,
                },
            )
            .await?;
            Ok(())
        })
    })
    .await
}

/// Leave feedback on a book. At most one per `(user, book)`.
///
/// # Errors
/// [`LibraryError::NotFound`] for an unknown book,
/// [`PolicyViolation::FeedbackExists`] for a repeat submission, or a storage
/// error.
#[must_use = "handle the result"]
pub async fn submit_feedback(
    conn: &mut DbConnection,
    user: &str,
    book: i32,
    input: FeedbackInput<'_>,
    today: NaiveDate,
) -> Result<(), LibraryError> {
    write_transaction::<_, LibraryError, _>(conn, |conn| {
        Box::pin(async move {
            if catalog::get_book(conn, book).await?.is_none() {
                return Err(LibraryError::NotFound(Entity::Book));
            }
            if ledger::has_feedback(conn, user, book).await? {
                return Err(PolicyViolation::FeedbackExists.into());
            }
            ledger::add_feedback(
                conn,
                &NewFeedback {
                    book_id: book,
                    user_email: user,
                    rating: input.rating,
                    comment: input.comment,
                    given_on: today,
                },
            )
            .await?;
            Ok(())
        })
    })
    .await
}

async fn issue(
    conn: &mut DbConnection,
    book: i32,
    user: &str,
    today: NaiveDate,
) -> QueryResult<Book> {
    use crate::schema::books::dsl::{books, due_date, holder, issue_date};

    diesel::update(books.find(book))
        .set((
            holder.eq(Some(user)),
            issue_date.eq(Some(today)),
            due_date.eq(Some(today + Days::new(LOAN_DAYS))),
        ))
        .returning(Book::as_returning())
        .get_result(conn)
        .await
}
