//! Selection of readers who need a daily reminder.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use diesel::result::QueryResult;

use crate::{
    db::{DbConnection, identity},
    models::{Book, User},
    workflow,
};

/// Readers with no visit recorded on `today`.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn unvisited_today(conn: &mut DbConnection, today: NaiveDate) -> QueryResult<Vec<User>> {
    let visitors: HashSet<String> = identity::visitors_on(conn, today)
        .await?
        .into_iter()
        .collect();
    Ok(identity::list_users(conn)
        .await?
        .into_iter()
        .filter(|user| !visitors.contains(&user.email))
        .collect())
}

/// Held books due on or before `today`, grouped by holder email.
///
/// # Errors
/// Returns any error produced by the database.
#[must_use = "handle the result"]
pub async fn due_today_or_overdue(
    conn: &mut DbConnection,
    today: NaiveDate,
) -> QueryResult<BTreeMap<String, Vec<Book>>> {
    Ok(group_by_holder(workflow::due_books(conn, today).await?))
}

/// Group held books by holder. Unheld books are skipped.
#[must_use]
pub fn group_by_holder(books: Vec<Book>) -> BTreeMap<String, Vec<Book>> {
    let mut grouped: BTreeMap<String, Vec<Book>> = BTreeMap::new();
    for book in books {
        if let Some(holder) = book.holder.clone() {
            grouped.entry(holder).or_default().push(book);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use diesel_async::AsyncConnection;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        db::{DEFAULT_SECTION_ID, catalog, run_migrations},
        models::{NewBook, NewUser},
    };

    fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 6, d).expect("valid date") }

    fn held(id: i32, holder: Option<&str>) -> Book {
        Book {
            id,
            title: format!("Book {id}"),
            author: "Anon".to_owned(),
            content: String::new(),
            file_name: None,
            section_id: 0,
            holder: holder.map(str::to_owned),
            issue_date: None,
            due_date: None,
        }
    }

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

    async fn add_user(conn: &mut DbConnection, email: &str) {
        identity::create_user(
            conn,
            &NewUser {
                email,
                nick_name: email,
                first_name: "Reader",
                last_name: None,
                phone: "0",
                password: "x",
            },
        )
        .await
        .expect("create user");
    }

    #[test]
    fn grouping_collects_books_per_holder() {
        let grouped = group_by_holder(vec![
            held(1, Some("b@x.io")),
            held(2, None),
            held(3, Some("a@x.io")),
            held(4, Some("b@x.io")),
        ]);
        let summary: Vec<(String, Vec<i32>)> = grouped
            .into_iter()
            .map(|(holder, books)| (holder, books.iter().map(|b| b.id).collect()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a@x.io".to_owned(), vec![3]),
                ("b@x.io".to_owned(), vec![1, 4]),
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn readers_without_visit_today_are_selected(#[future] migrated_conn: DbConnection) {
        let mut conn = migrated_conn.await;
        for email in ["a@x.io", "b@x.io", "c@x.io"] {
            add_user(&mut conn, email).await;
        }
        identity::record_visit(&mut conn, "a@x.io", day(2))
            .await
            .expect("visit");
        identity::record_visit(&mut conn, "b@x.io", day(1))
            .await
            .expect("visit");

        let pending: Vec<String> = unvisited_today(&mut conn, day(2))
            .await
            .expect("select")
            .into_iter()
            .map(|u| u.email)
            .collect();
        assert_eq!(pending, vec!["b@x.io".to_owned(), "c@x.io".to_owned()]);
    }

    #[rstest]
    #[tokio::test]
    async fn overdue_loans_are_grouped(#[future] migrated_conn: DbConnection) {
        let mut conn = migrated_conn.await;
        add_user(&mut conn, "a@x.io").await;
        let book = catalog::create_book(
            &mut conn,
            &NewBook {
                title: "Dune",
                author: "Herbert",
                content: "",
                file_name: None,
                section_id: DEFAULT_SECTION_ID,
            },
        )
        .await
        .expect("book");
        let opened = workflow::request(&mut conn, "a@x.io", book.id, day(1))
            .await
            .expect("request");
        workflow::approve(&mut conn, opened.id, day(1))
            .await
            .expect("approve");

        assert!(due_today_or_overdue(&mut conn, day(7)).await.expect("due").is_empty());
        let due = due_today_or_overdue(&mut conn, day(9)).await.expect("due");
        assert_eq!(due.get("a@x.io").map(Vec::len), Some(1));
    }
}
