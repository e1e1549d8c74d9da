use argon2::{Algorithm, Params, Version};
use diesel_async::SimpleAsyncConnection;
use futures_util::future::join_all;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::{
    db::{DEFAULT_SECTION_ID, establish_pool, run_migrations},
    error::PolicyViolation,
};

struct Harness {
    library: Library,
    _dir: TempDir,
}

#[fixture]
async fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("libra.db");
    let pool = establish_pool(db.to_str().expect("utf8 path"))
        .await
        .expect("pool");
    {
        let mut conn = pool.get().await.expect("connection");
        run_migrations(&mut conn).await.expect("migrations");
    }
    let settings = LibrarySettings {
        data_dir: dir.path().join("data"),
        utc_offset: FixedOffset::east_opt(0).expect("offset"),
        cache_capacity: 100,
        argon2: Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            Params::new(1024, 1, 1, None).expect("params"),
        ),
        jwt_secret: b"library-tests".to_vec(),
    };
    let renderer = Renderer::new(None).expect("templates");
    Harness {
        library: Library::new(pool, renderer, settings),
        _dir: dir,
    }
}

fn signup(email: &str) -> Signup<'_> {
    Signup {
        email,
        first_name: "Ada",
        last_name: None,
        phone: "555",
        nick_name: "ada",
        password: "secret",
    }
}

async fn add_book(library: &Library, title: &str) -> Book {
    library
        .add_book(BookDraft {
            title,
            author: "Anon",
            content: "text",
            section_id: DEFAULT_SECTION_ID,
        })
        .await
        .expect("add book")
}

#[rstest]
#[case(0, Some(Decision::Approve))]
#[case(1, Some(Decision::Reject))]
#[case(2, None)]
#[case(-1, None)]
fn choices_map_to_decisions(#[case] choice: i64, #[case] expected: Option<Decision>) {
    assert_eq!(Decision::from_choice(choice).ok(), expected);
}

#[rstest]
#[case("1", true, BookSearchField::Title)]
#[case("3", true, BookSearchField::Holder)]
#[case("3", false, BookSearchField::Author)]
#[case("2", true, BookSearchField::Author)]
fn search_index_selects_column(
    #[case] index: &str,
    #[case] librarian: bool,
    #[case] expected: BookSearchField,
) {
    assert_eq!(search_field(index, librarian), expected);
}

#[rstest]
#[tokio::test]
async fn signup_and_login(#[future] harness: Harness) {
    let h = harness.await;
    let details = h.library.signup(signup("ada@example.com")).await.expect("signup");
    assert_eq!(details.email, "ada@example.com");

    let again = h.library.signup(signup("ada@example.com")).await;
    assert!(matches!(
        again,
        Err(LibraryError::Policy(PolicyViolation::AccountExists))
    ));

    let wrong = h.library.login_user("ada@example.com", "nope").await;
    assert!(matches!(
        wrong,
        Err(LibraryError::Credentials(CredentialFailure::WrongPassword))
    ));
    let unknown = h.library.login_user("bob@example.com", "secret").await;
    assert!(matches!(
        unknown,
        Err(LibraryError::Credentials(CredentialFailure::UnknownAccount))
    ));

    let session = h
        .library
        .login_user("ada@example.com", "secret")
        .await
        .expect("login");
    let claims = h
        .library
        .tokens()
        .verify(&session.token, Role::User)
        .expect("token");
    assert_eq!(claims.sub, "ada@example.com");

    let active = h.library.active_users().await.expect("active");
    assert_eq!(active.len(), 1);
    h.library.logout("ada@example.com").await.expect("logout");
    assert!(h.library.active_users().await.expect("active").is_empty());
}

#[rstest]
#[tokio::test]
async fn feedback_refreshes_memoized_catalog(#[future] harness: Harness) {
    let h = harness.await;
    h.library.signup(signup("ada@example.com")).await.expect("signup");
    let book = add_book(&h.library, "Dune").await;

    let before = h.library.catalog("ada@example.com").await.expect("catalog");
    assert_eq!(before[0]["rating"], 0.0);

    h.library
        .give_feedback(
            "ada@example.com",
            book.id,
            FeedbackInput {
                rating: 4,
                comment: "good",
            },
        )
        .await
        .expect("feedback");

    let after = h.library.catalog("ada@example.com").await.expect("catalog");
    assert_eq!(after[0]["rating"], 4.0);
    let listed = h.library.feedback_for(book.id).await.expect("feedback list");
    assert_eq!(listed.len(), 1);
}

#[rstest]
#[tokio::test]
async fn approval_refreshes_accessible_books(#[future] harness: Harness) {
    let h = harness.await;
    h.library.signup(signup("ada@example.com")).await.expect("signup");
    let book = add_book(&h.library, "Dune").await;

    h.library
        .request_book("ada@example.com", book.id)
        .await
        .expect("request");
    let empty = h
        .library
        .accessible_books("ada@example.com")
        .await
        .expect("accessible");
    assert_eq!(empty, serde_json::json!([]));

    let pending = h.library.pending_requests().await.expect("pending");
    let request = pending.first().expect("one pending request").request.id;
    h.library
        .process_request(request, Decision::Approve)
        .await
        .expect("approve");

    let held = h
        .library
        .accessible_books("ada@example.com")
        .await
        .expect("accessible");
    assert_eq!(held[0]["id"], book.id);
    assert_eq!(h.library.loan_chart().await.expect("chart"), [1, 0]);

    let replay = h.library.process_request(request, Decision::Reject).await;
    assert!(matches!(replay, Err(LibraryError::NotFound(Entity::Request))));

    let stats = h.library.stats().await.expect("stats");
    assert_eq!((stats.requests, stats.arequests, stats.rrequests), (1, 1, 0));
}

#[rstest]
#[tokio::test]
async fn download_requires_purchase(#[future] harness: Harness) {
    let h = harness.await;
    h.library.signup(signup("ada@example.com")).await.expect("signup");
    let book = add_book(&h.library, "Dune").await;

    let denied = h.library.download("ada@example.com", book.id).await;
    assert!(matches!(
        denied,
        Err(LibraryError::Policy(PolicyViolation::NoAccess))
    ));

    h.library.purchase("ada@example.com", book.id).await.expect("buy");
    let repeat = h.library.purchase("ada@example.com", book.id).await;
    assert!(matches!(
        repeat,
        Err(LibraryError::Policy(PolicyViolation::AlreadyOwned))
    ));

    let doc = h
        .library
        .download("ada@example.com", book.id)
        .await
        .expect("download");
    assert_eq!(doc.content_type, "text/html");
    let html = tokio::fs::read_to_string(&doc.path).await.expect("artifact");
    assert!(html.contains("Dune"));
}

#[rstest]
#[tokio::test]
async fn sections_can_be_removed_except_default(#[future] harness: Harness) {
    let h = harness.await;
    let refused = h.library.remove_section(DEFAULT_SECTION_ID).await;
    assert!(matches!(
        refused,
        Err(LibraryError::Policy(PolicyViolation::DefaultSection))
    ));

    let section = h
        .library
        .add_section("Poetry", "verse")
        .await
        .expect("section");
    let book = h
        .library
        .add_book(BookDraft {
            title: "Odes",
            author: "Keats",
            content: "",
            section_id: section.id,
        })
        .await
        .expect("book");

    h.library.remove_section(section.id).await.expect("remove");
    let moved = h.library.book(book.id).await.expect("book survives");
    assert_eq!(moved.section_id, DEFAULT_SECTION_ID);
    let missing = h.library.section(section.id).await;
    assert!(matches!(missing, Err(LibraryError::NotFound(Entity::Section))));
}

#[rstest]
#[tokio::test]
async fn editing_text_replaces_artifact(#[future] harness: Harness) {
    let h = harness.await;
    let book = add_book(&h.library, "Dune").await;
    let old = book.file_name.clone().expect("artifact");

    let updated = h
        .library
        .modify_book(
            book.id,
            &BookUpdate {
                title: Some("Dune Messiah"),
                ..BookUpdate::default()
            },
        )
        .await
        .expect("modify");
    let new = updated.file_name.expect("new artifact");
    assert_ne!(new, old);
    let books_dir = h.library.data_dir().join(BOOKS_DIR);
    assert!(!books_dir.join(&old).exists());
    assert!(books_dir.join(&new).exists());

    let unknown = h
        .library
        .modify_book(
            book.id,
            &BookUpdate {
                section_id: Some(99),
                ..BookUpdate::default()
            },
        )
        .await;
    assert!(matches!(unknown, Err(LibraryError::NotFound(Entity::Section))));
}

async fn refuse_book_writes(library: &Library, event: &str) {
    let mut conn = library.pool().get().await.expect("connection");
    conn.batch_execute(&format!(
        "CREATE TRIGGER refuse_books BEFORE {event} ON books \
         BEGIN SELECT RAISE(ABORT, 'books are read-only'); END;"
    ))
    .await
    .expect("trigger");
}

fn artifacts(library: &Library) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(library.data_dir().join(BOOKS_DIR)) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort_unstable();
    names
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_decisions_settle_exactly_once(#[future] harness: Harness) {
    let h = harness.await;
    h.library.signup(signup("ada@example.com")).await.expect("signup");
    let book = add_book(&h.library, "Dune").await;

    for round in 0..10 {
        h.library
            .request_book("ada@example.com", book.id)
            .await
            .expect("request");
        let pending = h.library.pending_requests().await.expect("pending");
        let request = pending.first().expect("one pending request").request.id;

        let racers = [
            Decision::Approve,
            Decision::Reject,
            Decision::Approve,
            Decision::Reject,
        ]
        .into_iter()
        .map(|decision| {
            let library = h.library.clone();
            tokio::spawn(async move { library.process_request(request, decision).await })
        });
        let mut settled = 0;
        for outcome in join_all(racers).await {
            match outcome.expect("task") {
                Ok(()) => settled += 1,
                Err(LibraryError::NotFound(Entity::Request)) => {}
                Err(other) => panic!("round {round}: unexpected error {other:?}"),
            }
        }
        assert_eq!(settled, 1, "round {round}");
        assert!(h.library.pending_requests().await.expect("pending").is_empty());

        if h.library.book(book.id).await.expect("book").holder.is_some() {
            h.library
                .return_book("ada@example.com", book.id)
                .await
                .expect("return");
        }
    }
}

#[rstest]
#[tokio::test]
async fn failed_render_leaves_book_and_cache_unchanged(#[future] harness: Harness) {
    let h = harness.await;
    let book = add_book(&h.library, "Dune").await;
    let warm = h.library.librarian_books("admin").await.expect("books");
    assert_eq!(warm[0]["title"], "Dune");

    let books_dir = h.library.data_dir().join(BOOKS_DIR);
    std::fs::remove_dir_all(&books_dir).expect("remove artifacts");
    std::fs::write(&books_dir, b"").expect("block artifacts");

    let result = h
        .library
        .modify_book(
            book.id,
            &BookUpdate {
                title: Some("Arrakis"),
                ..BookUpdate::default()
            },
        )
        .await;
    assert!(matches!(result, Err(LibraryError::Report(_))));

    let stored = h.library.book(book.id).await.expect("book");
    assert_eq!(stored.title, "Dune");
    assert_eq!(stored.file_name, book.file_name);
    let cached = h.library.librarian_books("admin").await.expect("books");
    assert_eq!(cached[0]["title"], "Dune");
}

#[rstest]
#[tokio::test]
async fn failed_update_discards_new_artifact(#[future] harness: Harness) {
    let h = harness.await;
    let book = add_book(&h.library, "Dune").await;
    let before = artifacts(&h.library);
    assert_eq!(before.len(), 1);

    refuse_book_writes(&h.library, "UPDATE").await;
    let result = h
        .library
        .modify_book(
            book.id,
            &BookUpdate {
                content: Some("new text"),
                ..BookUpdate::default()
            },
        )
        .await;
    assert!(matches!(result, Err(LibraryError::Database(_))));

    assert_eq!(artifacts(&h.library), before);
    let stored = h.library.book(book.id).await.expect("book");
    assert_eq!(stored, book);
}

#[rstest]
#[tokio::test]
async fn failed_insert_leaves_no_artifact(#[future] harness: Harness) {
    let h = harness.await;
    refuse_book_writes(&h.library, "INSERT").await;

    let result = h
        .library
        .add_book(BookDraft {
            title: "Dune",
            author: "Herbert",
            content: "spice",
            section_id: DEFAULT_SECTION_ID,
        })
        .await;

    assert!(matches!(result, Err(LibraryError::Database(_))));
    assert!(artifacts(&h.library).is_empty());
}
