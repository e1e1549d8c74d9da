//! Shared helpers for HTTP integration tests.

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use axum::{
    Router,
    body::Body,
    http::{
        Method,
        Request,
        StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use chrono::FixedOffset;
use http_body_util::BodyExt;
use libra::{
    api::{self, AppState},
    db::{establish_pool, run_migrations},
    jobs::JobRegistry,
    library::{Library, LibrarySettings},
    mail::OutboxMailer,
    reports::Renderer,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

/// Signing secret shared by the test router and forged tokens.
pub const SECRET: &[u8] = b"http-tests";

/// A router over a fresh database in a temporary directory.
pub struct TestApp {
    pub router: Router,
    pub library: Library,
    pub outbox: OutboxMailer,
    _dir: TempDir,
}

impl TestApp {
    /// Build the application and seed one librarian, `admin` / `admin-pw`.
    pub async fn start() -> Self {
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
            jwt_secret: SECRET.to_vec(),
        };
        let library = Library::new(pool, Renderer::new(None).expect("templates"), settings);
        library
            .create_librarian("admin", "admin-pw", "admin@example.com")
            .await
            .expect("librarian");
        let outbox = OutboxMailer::new();
        let router = api::router(AppState {
            library: library.clone(),
            jobs: JobRegistry::new(),
            mailer: Arc::new(outbox.clone()),
        });
        Self {
            router,
            library,
            outbox,
            _dir: dir,
        }
    }

    /// Send a request and decode the JSON reply.
    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).expect("encode")))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        let response = self.router.clone().oneshot(request).await.expect("infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json reply")
        };
        (status, value)
    }

    /// `GET` with a token.
    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    /// `POST` a JSON body with a token.
    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Sign up `email` and return a reader token.
    pub async fn reader(&self, email: &str) -> String {
        let (status, _) = self
            .call(
                Method::POST,
                "/signup/user",
                None,
                Some(json!({
                    "email": email,
                    "fname": "Ada",
                    "lname": "",
                    "pnum": "555",
                    "nick_name": "ada",
                    "password": "secret",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "signup {email}");
        let (status, body) = self
            .call(
                Method::POST,
                "/login/user",
                None,
                Some(json!({ "email": email, "password": "secret" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login {email}");
        body["token"].as_str().expect("token").to_owned()
    }

    /// Log the seeded librarian in.
    pub async fn librarian(&self) -> String { self.login_librarian("admin", "admin-pw").await }

    /// Log in as the named librarian and return the token.
    pub async fn login_librarian(&self, uname: &str, upass: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/login/librarian",
                None,
                Some(json!({ "uname": uname, "upass": upass })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().expect("token").to_owned()
    }

    /// Add a book to the default section and return its id.
    pub async fn add_book(&self, librarian: &str, name: &str) -> i64 {
        let (status, body) = self
            .post(
                "/librarian/add/book",
                librarian,
                json!({ "name": name, "authors": "Anon", "content": "Once upon a time" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["book"]["id"].as_i64().expect("book id")
    }

    /// Id of the pending request for `book`.
    pub async fn pending_request(&self, librarian: &str, book: i64) -> i64 {
        let (_, body) = self.get("/librarian/requests", librarian).await;
        body.as_array()
            .expect("requests")
            .iter()
            .find(|r| r["book_id"].as_i64() == Some(book))
            .and_then(|r| r["id"].as_i64())
            .expect("pending request")
    }

    /// Request `book` as `reader` and have the librarian approve it.
    pub async fn lend(&self, reader: &str, librarian: &str, book: i64) {
        let (status, _) = self.get(&format!("/user/requestbook/{book}"), reader).await;
        assert_eq!(status, StatusCode::OK);
        let request = self.pending_request(librarian, book).await;
        let (status, _) = self
            .get(&format!("/librarian/processrequest/{request}/0"), librarian)
            .await;
        assert_eq!(status, StatusCode::OK);
    }
}
