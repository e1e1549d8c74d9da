use chrono::NaiveDate;
use diesel_async::AsyncConnection;
use rstest::{fixture, rstest};

use super::*;
use crate::models::{
    BookUpdate,
    NewBook,
    NewFeedback,
    NewOwner,
    NewRead,
    NewRequest,
    NewSection,
    NewUser,
    RequestOutcome,
};

fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date") }

#[fixture]
async fn migrated_conn() -> DbConnection {
    let mut conn = DbConnection::establish(":memory:")
        .await
        .expect("failed to create in-memory connection");
    run_migrations(&mut conn)
        .await
        .expect("failed to apply migrations");
    conn
}

async fn seed_book(conn: &mut DbConnection, title: &str, author: &str) -> i32 {
    catalog::create_book(
        conn,
        &NewBook {
            title,
            author,
            content: "text",
            file_name: None,
            section_id: DEFAULT_SECTION_ID,
        },
    )
    .await
    .expect("failed to create book")
    .id
}

#[rstest]
#[tokio::test]
async fn default_section_is_seeded(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    let section = catalog::get_section(&mut conn, DEFAULT_SECTION_ID)
        .await
        .expect("lookup failed")
        .expect("default section missing");
    assert_eq!(section.name, "Default");
}

#[rstest]
#[tokio::test]
async fn create_and_get_user(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    let new_user = NewUser {
        email: "alice@example.com",
        nick_name: "alice",
        first_name: "Alice",
        last_name: None,
        phone: "555",
        password: "hash",
    };
    identity::create_user(&mut conn, &new_user)
        .await
        .expect("failed to create user");
    let fetched = identity::get_user(&mut conn, "alice@example.com")
        .await
        .expect("lookup failed")
        .expect("user not found");
    assert_eq!(fetched.nick_name, "alice");
    assert_eq!(fetched.password, "hash");
    assert!(identity::create_user(&mut conn, &new_user).await.is_err());
}

#[rstest]
#[tokio::test]
async fn repeat_visits_on_one_day_are_ignored(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    assert!(identity::record_visit(&mut conn, "a@x.io", day(1)).await.expect("visit"));
    assert!(!identity::record_visit(&mut conn, "a@x.io", day(1)).await.expect("visit"));
    assert!(identity::record_visit(&mut conn, "a@x.io", day(2)).await.expect("visit"));
    let visitors = identity::visitors_on(&mut conn, day(1)).await.expect("visitors");
    assert_eq!(visitors, vec!["a@x.io".to_owned()]);
    let days = identity::count_visits(&mut conn, "a@x.io", day(1), day(31))
        .await
        .expect("count");
    assert_eq!(days, 2);
}

#[rstest]
#[tokio::test]
async fn search_matches_substrings(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    seed_book(&mut conn, "The Rust Book", "Klabnik").await;
    seed_book(&mut conn, "Dune", "Herbert").await;
    let by_title = catalog::search_books(&mut conn, BookSearchField::Title, "Rust")
        .await
        .expect("search");
    assert_eq!(by_title.len(), 1);
    let by_author = catalog::search_books(&mut conn, BookSearchField::Author, "erb")
        .await
        .expect("search");
    assert_eq!(by_author.first().map(|b| b.title.as_str()), Some("Dune"));
    let by_holder = catalog::search_books(&mut conn, BookSearchField::Holder, "x")
        .await
        .expect("search");
    assert!(by_holder.is_empty());
}

#[rstest]
#[tokio::test]
async fn empty_book_update_leaves_row_untouched(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    let id = seed_book(&mut conn, "Dune", "Herbert").await;
    let unchanged = catalog::update_book(&mut conn, id, &BookUpdate::default())
        .await
        .expect("update")
        .expect("book exists");
    assert_eq!(unchanged.title, "Dune");
    let renamed = catalog::update_book(
        &mut conn,
        id,
        &BookUpdate {
            title: Some("Dune Messiah"),
            ..BookUpdate::default()
        },
    )
    .await
    .expect("update")
    .expect("book exists");
    assert_eq!(renamed.title, "Dune Messiah");
    assert_eq!(renamed.author, "Herbert");
    assert!(
        catalog::update_book(&mut conn, 999, &BookUpdate::default())
            .await
            .expect("update")
            .is_none()
    );
}

#[rstest]
#[tokio::test]
async fn deleting_book_removes_dependents_but_keeps_requests(
    #[future] migrated_conn: DbConnection,
) {
    let mut conn = migrated_conn.await;
    let id = seed_book(&mut conn, "Dune", "Herbert").await;
    ledger::add_owner(&mut conn, &NewOwner { user_email: "a@x.io", book_id: id })
        .await
        .expect("owner");
    ledger::add_feedback(
        &mut conn,
        &NewFeedback {
            book_id: id,
            user_email: "a@x.io",
            rating: 4,
            comment: "good",
            given_on: day(3),
        },
    )
    .await
    .expect("feedback");
    let request = ledger::open_request(
        &mut conn,
        &NewRequest {
            user_email: "a@x.io",
            book_id: id,
            pending: true,
            opened_on: day(3),
        },
    )
    .await
    .expect("request");

    let deleted = catalog::delete_book(&mut conn, id).await.expect("delete");
    assert!(deleted.is_some());
    assert!(!ledger::owns(&mut conn, "a@x.io", id).await.expect("owns"));
    assert!(!ledger::has_feedback(&mut conn, "a@x.io", id).await.expect("feedback"));

    let views = ledger::request_views(&mut conn, vec![request])
        .await
        .expect("views");
    assert_eq!(views.first().map(|v| v.held_by.as_str()), Some(""));
    assert!(catalog::delete_book(&mut conn, id).await.expect("delete").is_none());
}

#[rstest]
#[tokio::test]
async fn deleting_section_moves_books_to_default(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    let section = catalog::create_section(
        &mut conn,
        &NewSection {
            name: "Fiction",
            description: "made up",
            created_on: day(1),
        },
    )
    .await
    .expect("section");
    let book = catalog::create_book(
        &mut conn,
        &NewBook {
            title: "Dune",
            author: "Herbert",
            content: "spice",
            file_name: None,
            section_id: section.id,
        },
    )
    .await
    .expect("book");

    let moved = catalog::delete_section(&mut conn, section.id)
        .await
        .expect("delete");
    assert_eq!(moved, Some(1));
    let book = catalog::get_book(&mut conn, book.id)
        .await
        .expect("lookup")
        .expect("book survives");
    assert_eq!(book.section_id, DEFAULT_SECTION_ID);
}

#[rstest]
#[tokio::test]
async fn failed_write_transaction_rolls_back(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    let failed = write_transaction::<(), diesel::result::Error, _>(&mut conn, |conn| {
        Box::pin(async move {
            seed_book(conn, "Dune", "Herbert").await;
            Err(diesel::result::Error::RollbackTransaction)
        })
    })
    .await;
    assert!(matches!(failed, Err(diesel::result::Error::RollbackTransaction)));
    assert_eq!(catalog::count_books(&mut conn).await.expect("count"), 0);

    let id = write_transaction::<_, diesel::result::Error, _>(&mut conn, |conn| {
        Box::pin(async move { Ok(seed_book(conn, "Emma", "Austen").await) })
    })
    .await
    .expect("commit");
    assert!(catalog::get_book(&mut conn, id).await.expect("lookup").is_some());
}

#[rstest]
#[tokio::test]
async fn closing_request_only_succeeds_once(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    let id = seed_book(&mut conn, "Dune", "Herbert").await;
    let request = ledger::open_request(
        &mut conn,
        &NewRequest {
            user_email: "a@x.io",
            book_id: id,
            pending: true,
            opened_on: day(1),
        },
    )
    .await
    .expect("request");

    let closed = ledger::close_request(&mut conn, request.id, RequestOutcome::Rejected, day(2))
        .await
        .expect("close")
        .expect("was pending");
    assert_eq!(closed.outcome(), Some(RequestOutcome::Rejected));
    assert_eq!(closed.closed_on, Some(day(2)));
    let again = ledger::close_request(&mut conn, request.id, RequestOutcome::Accepted, day(2))
        .await
        .expect("close");
    assert!(again.is_none());
    assert_eq!(
        ledger::count_requests(&mut conn, Some(RequestOutcome::Rejected))
            .await
            .expect("count"),
        1
    );
}

#[rstest]
#[tokio::test]
async fn reads_are_bounded_by_month(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    let dune = seed_book(&mut conn, "Dune", "Herbert").await;
    let emma = seed_book(&mut conn, "Emma", "Austen").await;
    let odes = seed_book(&mut conn, "Odes", "Keats").await;
    for (book, on) in [(dune, day(1)), (emma, day(31)), (odes, day(2))] {
        ledger::add_read(
            &mut conn,
            &NewRead {
                user_email: "a@x.io",
                book_id: book,
                read_on: on,
            },
        )
        .await
        .expect("read");
    }
    ledger::add_read(
        &mut conn,
        &NewRead {
            user_email: "b@x.io",
            book_id: odes,
            read_on: day(3),
        },
    )
    .await
    .expect("read");

    let window = ledger::reads_between(&mut conn, "a@x.io", day(2), day(31))
        .await
        .expect("reads");
    let titles: Vec<_> = window.iter().map(|(b, on)| (b.title.as_str(), *on)).collect();
    assert_eq!(titles, vec![("Odes", day(2)), ("Emma", day(31))]);
}

#[rstest]
#[tokio::test]
async fn ratings_are_grouped_by_book(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    let first = seed_book(&mut conn, "Dune", "Herbert").await;
    let second = seed_book(&mut conn, "Emma", "Austen").await;
    for (user, rating) in [("a@x.io", 3), ("b@x.io", 5)] {
        ledger::add_feedback(
            &mut conn,
            &NewFeedback {
                book_id: first,
                user_email: user,
                rating,
                comment: "",
                given_on: day(1),
            },
        )
        .await
        .expect("feedback");
    }
    let ratings = ledger::ratings_for_books(&mut conn, &[first, second])
        .await
        .expect("ratings");
    let mut scores = ratings.get(&first).cloned().unwrap_or_default();
    scores.sort_unstable();
    assert_eq!(scores, vec![3, 5]);
    assert!(!ratings.contains_key(&second));

    let views = ledger::feedback_views(&mut conn, Some(first), None)
        .await
        .expect("views");
    assert_eq!(views.len(), 2);
    assert!(views.iter().all(|v| v.book_name == "Dune"));
}

#[rstest]
#[tokio::test]
async fn audit_accepts_bundled_sqlite(#[future] migrated_conn: DbConnection) {
    let mut conn = migrated_conn.await;
    audit_sqlite_features(&mut conn)
        .await
        .expect("sqlite feature audit failed");
}
