//! HTTP surface.
//!
//! Routes mirror the reader and librarian operations of [`Library`]. Every
//! protected handler authenticates through [`extract::AuthUser`] or
//! [`extract::AuthLibrarian`] before its body is parsed.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{jobs::JobRegistry, library::Library, mail::Mailer};

pub mod error;
pub mod extract;
pub mod librarian;
pub mod user;

pub use self::error::ApiError;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Library operations.
    pub library: Library,
    /// On-demand background jobs.
    pub jobs: JobRegistry,
    /// Outbound mail for jobs started from the API.
    pub mailer: Arc<dyn Mailer>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login/user", post(user::login))
        .route("/signup/user", post(user::signup))
        .route("/user/logout", get(user::logout))
        .route("/user/books", get(user::books))
        .route("/user/accessible/books", get(user::accessible_books))
        .route("/user/sections", get(user::sections))
        .route("/user/search/books", post(user::search_books))
        .route("/user/search/accessible/books", post(user::search_accessible_books))
        .route("/user/search/sections", post(user::search_sections))
        .route("/user/readbook/{book_id}", get(user::read_book))
        .route("/user/bookread/{book_id}", get(user::mark_read))
        .route("/user/requestbook/{book_id}", get(user::request_book))
        .route("/user/returnbook/{book_id}", get(user::return_book))
        .route("/user/feedback/{book_id}", post(user::feedback))
        .route("/user/checkfeedback/{book_id}", get(user::check_feedback))
        .route("/user/profile", get(user::profile))
        .route("/user/profile/edit", post(user::edit_profile))
        .route("/user/buy/{book_id}", get(user::buy))
        .route("/user/download/{book_id}", get(user::download))
        .route("/login/librarian", post(librarian::login))
        .route("/librarian/getactiveusers", get(librarian::active_users))
        .route("/librarian/sections", get(librarian::sections))
        .route("/librarian/books", get(librarian::books))
        .route("/librarian/book/{book_id}", get(librarian::book))
        .route("/librarian/section/{section_id}", get(librarian::section))
        .route("/librarian/graph/books", get(librarian::chart))
        .route("/librarian/remove/book/{book_id}", get(librarian::remove_book))
        .route("/librarian/remove/section/{section_id}", get(librarian::remove_section))
        .route("/librarian/revoke/book/{book_id}", get(librarian::revoke_book))
        .route("/librarian/search/books", post(librarian::search_books))
        .route("/librarian/search/sections", post(librarian::search_sections))
        .route("/librarian/add/book", post(librarian::add_book))
        .route("/librarian/modify/book/{book_id}", post(librarian::modify_book))
        .route("/librarian/add/section", post(librarian::add_section))
        .route("/librarian/modify/section/{section_id}", post(librarian::modify_section))
        .route(
            "/librarian/processrequest/{request_id}/{choice}",
            get(librarian::process_request),
        )
        .route("/librarian/requests", get(librarian::requests))
        .route("/librarian/generate_report", get(librarian::generate_report))
        .route("/librarian/generate_report/status", get(librarian::report_status))
        .route("/librarian/getstats", get(librarian::stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
