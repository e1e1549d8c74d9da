//! Book and section helpers.
//!
//! Possession columns on `books` (`holder`, `issue_date`, `due_date`) are only
//! read here; the borrow workflow is the single writer.

use diesel::{prelude::*, result::QueryResult};
use diesel_async::RunQueryDsl;

use super::connection::{DbConnection, write_transaction};
use crate::models::{Book, BookUpdate, NewBook, NewSection, Section, SectionUpdate};

/// Identifier of the section that always exists and adopts orphaned books.
pub const DEFAULT_SECTION_ID: i32 = 0;

/// Column matched by a book search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookSearchField {
    /// Match against the title.
    Title,
    /// Match against the author list.
    Author,
    /// Match against the current holder's email.
    Holder,
}

/// Look up a single book.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn get_book(conn: &mut DbConnection, book: i32) -> QueryResult<Option<Book>> {
    use crate::schema::books::dsl::books;
    books
        .find(book)
        .select(Book::as_select())
        .first(conn)
        .await
        .optional()
}

/// List every book ordered by id.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn list_books(conn: &mut DbConnection) -> QueryResult<Vec<Book>> {
    use crate::schema::books::dsl::{books, id};
    books.order(id.asc()).select(Book::as_select()).load(conn).await
}

/// Books currently issued to `email`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn books_held_by(conn: &mut DbConnection, email: &str) -> QueryResult<Vec<Book>> {
    use crate::schema::books::dsl::{books, holder, id};
    books
        .filter(holder.eq(email))
        .order(id.asc())
        .select(Book::as_select())
        .load(conn)
        .await
}

/// Number of books currently issued to `email`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn count_held_by(conn: &mut DbConnection, email: &str) -> QueryResult<i64> {
    use crate::schema::books::dsl::{books, holder};
    books.filter(holder.eq(email)).count().get_result(conn).await
}

/// Substring search over one book column.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn search_books(
    conn: &mut DbConnection,
    field: BookSearchField,
    key: &str,
) -> QueryResult<Vec<Book>> {
    use crate::schema::books::dsl::{author, books, holder, id, title};
    let pattern = format!("%{key}%");
    let query = books.order(id.asc()).select(Book::as_select()).into_boxed();
    let query = match field {
        BookSearchField::Title => query.filter(title.like(pattern)),
        BookSearchField::Author => query.filter(author.like(pattern)),
        BookSearchField::Holder => query.filter(holder.like(pattern)),
    };
    query.load(conn).await
}

/// Insert a book and return the stored row.
///
/// # Errors
/// Returns any error produced by the insertion query.
#[must_use = "handle the result"]
pub async fn create_book(conn: &mut DbConnection, book: &NewBook<'_>) -> QueryResult<Book> {
    use crate::schema::books::dsl::books;
    diesel::insert_into(books)
        .values(book)
        .returning(Book::as_returning())
        .get_result(conn)
        .await
}

/// Apply librarian edits to a book, returning the updated row if it exists.
///
/// # Errors
/// Returns any error produced by the update query.
#[must_use = "handle the result"]
pub async fn update_book(
    conn: &mut DbConnection,
    book: i32,
    update: &BookUpdate<'_>,
) -> QueryResult<Option<Book>> {
    use crate::schema::books::dsl::books;
    let untouched = update.title.is_none()
        && update.author.is_none()
        && update.content.is_none()
        && update.section_id.is_none();
    if untouched {
        return get_book(conn, book).await;
    }
    diesel::update(books.find(book))
        .set(update)
        .returning(Book::as_returning())
        .get_result(conn)
        .await
        .optional()
}

/// Record the stored artifact name for a book.
///
/// # Errors
/// Returns any error produced by the update query.
#[must_use = "handle the result"]
pub async fn set_book_file(conn: &mut DbConnection, book: i32, name: &str) -> QueryResult<usize> {
    use crate::schema::books::dsl::{books, file_name};
    diesel::update(books.find(book))
        .set(file_name.eq(name))
        .execute(conn)
        .await
}

/// Delete a book together with its feedback, ownership and read rows.
///
/// Borrow requests are kept as history. Returns the deleted row, or `None`
/// when the book did not exist.
///
/// # Errors
/// Returns any error produced by the database; nothing is deleted on error.
#[must_use = "handle the result"]
pub async fn delete_book(conn: &mut DbConnection, book: i32) -> QueryResult<Option<Book>> {
    use crate::schema::{books::dsl as b, feedback::dsl as f, owners::dsl as o, reads::dsl as r};

    write_transaction::<_, diesel::result::Error, _>(conn, |conn| {
        Box::pin(async move {
            let Some(found) = get_book(conn, book).await? else {
                return Ok(None);
            };
            diesel::delete(f::feedback.filter(f::book_id.eq(book)))
                .execute(conn)
                .await?;
            diesel::delete(o::owners.filter(o::book_id.eq(book)))
                .execute(conn)
                .await?;
            diesel::delete(r::reads.filter(r::book_id.eq(book)))
                .execute(conn)
                .await?;
            diesel::delete(b::books.find(book)).execute(conn).await?;
            Ok(Some(found))
        })
    })
    .await
}

/// Total number of books.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn count_books(conn: &mut DbConnection) -> QueryResult<i64> {
    use crate::schema::books::dsl::books;
    books.count().get_result(conn).await
}

/// Number of books that are currently issued.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn count_issued_books(conn: &mut DbConnection) -> QueryResult<i64> {
    use crate::schema::books::dsl::{books, holder};
    books.filter(holder.is_not_null()).count().get_result(conn).await
}

/// Look up a single section.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn get_section(conn: &mut DbConnection, section: i32) -> QueryResult<Option<Section>> {
    use crate::schema::sections::dsl::sections;
    sections
        .find(section)
        .select(Section::as_select())
        .first(conn)
        .await
        .optional()
}

/// List every section ordered by id.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn list_sections(conn: &mut DbConnection) -> QueryResult<Vec<Section>> {
    use crate::schema::sections::dsl::{id, sections};
    sections
        .order(id.asc())
        .select(Section::as_select())
        .load(conn)
        .await
}

/// Sections whose name contains `key`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn search_sections(conn: &mut DbConnection, key: &str) -> QueryResult<Vec<Section>> {
    use crate::schema::sections::dsl::{id, name, sections};
    sections
        .filter(name.like(format!("%{key}%")))
        .order(id.asc())
        .select(Section::as_select())
        .load(conn)
        .await
}

/// Books filed under `section`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn books_in_section(conn: &mut DbConnection, section: i32) -> QueryResult<Vec<Book>> {
    use crate::schema::books::dsl::{books, id, section_id};
    books
        .filter(section_id.eq(section))
        .order(id.asc())
        .select(Book::as_select())
        .load(conn)
        .await
}

/// Insert a section and return the stored row.
///
/// # Errors
/// Returns any error produced by the insertion query.
#[must_use = "handle the result"]
pub async fn create_section(conn: &mut DbConnection, section: &NewSection<'_>) -> QueryResult<Section> {
    use crate::schema::sections::dsl::sections;
    diesel::insert_into(sections)
        .values(section)
        .returning(Section::as_returning())
        .get_result(conn)
        .await
}

/// Rename or re-describe a section, returning the updated row if it exists.
///
/// # Errors
/// Returns any error produced by the update query.
#[must_use = "handle the result"]
pub async fn update_section(
    conn: &mut DbConnection,
    section: i32,
    update: &SectionUpdate<'_>,
) -> QueryResult<Option<Section>> {
    use crate::schema::sections::dsl::sections;
    diesel::update(sections.find(section))
        .set(update)
        .returning(Section::as_returning())
        .get_result(conn)
        .await
        .optional()
}

/// Move every book of `section` into the default section and delete it.
///
/// Returns the number of books reassigned, or `None` when the section did
/// not exist.
///
/// # Errors
/// Returns any error produced by the database; nothing changes on error.
#[must_use = "handle the result"]
pub async fn delete_section(conn: &mut DbConnection, section: i32) -> QueryResult<Option<usize>> {
    use crate::schema::{books::dsl as b, sections::dsl as s};

    write_transaction::<_, diesel::result::Error, _>(conn, |conn| {
        Box::pin(async move {
            if get_section(conn, section).await?.is_none() {
                return Ok(None);
            }
            let moved = diesel::update(b::books.filter(b::section_id.eq(section)))
                .set(b::section_id.eq(DEFAULT_SECTION_ID))
                .execute(conn)
                .await?;
            diesel::delete(s::sections.find(section)).execute(conn).await?;
            Ok(Some(moved))
        })
    })
    .await
}

/// Total number of sections.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn count_sections(conn: &mut DbConnection) -> QueryResult<i64> {
    use crate::schema::sections::dsl::sections;
    sections.count().get_result(conn).await
}
