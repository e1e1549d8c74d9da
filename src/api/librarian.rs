//! Librarian endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{
    AppState,
    error::ApiError,
    extract::{AuthLibrarian, ValidJson},
    user::{SearchBody, SectionSearchBody},
};
use crate::{
    db::DEFAULT_SECTION_ID,
    error::{CredentialFailure, LibraryError},
    jobs::tasks,
    library::{BookDraft, Decision},
    models::{BookUpdate, SectionUpdate},
    validation::{Validate, ValidationError, non_empty},
};

type Reply = Result<Json<Value>, ApiError>;

fn done() -> Json<Value> { Json(json!({ "message": "done" })) }

/// `POST /login/librarian`.
#[derive(Debug, Deserialize)]
pub struct LoginBody {
    uname: String,
    upass: String,
}

impl Validate for LoginBody {
    fn validate(&self) -> Result<(), ValidationError> { Ok(()) }
}

/// `POST /librarian/add/book`.
#[derive(Debug, Deserialize)]
pub struct BookBody {
    name: String,
    authors: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    section_id: Option<i32>,
}

impl Validate for BookBody {
    fn validate(&self) -> Result<(), ValidationError> {
        non_empty("name", &self.name)?;
        non_empty("authors", &self.authors)
    }
}

/// `POST /librarian/modify/book/{book_id}`. Absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BookEditBody {
    name: Option<String>,
    authors: Option<String>,
    content: Option<String>,
    section_id: Option<i32>,
}

impl Validate for BookEditBody {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            non_empty("name", name)?;
        }
        if let Some(authors) = &self.authors {
            non_empty("authors", authors)?;
        }
        Ok(())
    }
}

/// `POST /librarian/add/section` and `/librarian/modify/section/{id}`.
#[derive(Debug, Deserialize)]
pub struct SectionBody {
    name: String,
    description: String,
}

impl Validate for SectionBody {
    fn validate(&self) -> Result<(), ValidationError> {
        non_empty("name", &self.name)?;
        non_empty("description", &self.description)
    }
}

/// Query of `/librarian/generate_report/status`.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    task_id: Option<String>,
}

/// Log a librarian in.
///
/// # Errors
/// 404 for an unknown username, 403 for a wrong password.
pub async fn login(State(state): State<AppState>, ValidJson(body): ValidJson<LoginBody>) -> Reply {
    let session = match state.library.login_librarian(&body.uname, &body.upass).await {
        Ok(session) => session,
        Err(LibraryError::Credentials(CredentialFailure::UnknownAccount)) => {
            return Err(ApiError::refused(StatusCode::NOT_FOUND, "Wrong user name"));
        }
        Err(LibraryError::Credentials(CredentialFailure::WrongPassword)) => {
            return Err(ApiError::refused(StatusCode::FORBIDDEN, "wrong password"));
        }
        Err(err) => return Err(err.into()),
    };
    Ok(Json(json!({ "token": session.token, "librarian_details": session.details })))
}

/// Readers active within the last reader-token lifetime.
///
/// # Errors
/// 500 on storage failure.
pub async fn active_users(State(state): State<AppState>, AuthLibrarian(_): AuthLibrarian) -> Reply {
    Ok(Json(json!(state.library.active_users().await?)))
}

/// Every section with its books.
///
/// # Errors
/// 500 on storage failure.
pub async fn sections(State(state): State<AppState>, AuthLibrarian(name): AuthLibrarian) -> Reply {
    Ok(Json(state.library.librarian_sections(&name).await?))
}

/// Every book.
///
/// # Errors
/// 500 on storage failure.
pub async fn books(State(state): State<AppState>, AuthLibrarian(name): AuthLibrarian) -> Reply {
    Ok(Json(state.library.librarian_books(&name).await?))
}

/// One book.
///
/// # Errors
/// 404 for an unknown book.
pub async fn book(State(state): State<AppState>, AuthLibrarian(_): AuthLibrarian, Path(book): Path<i32>) -> Reply {
    Ok(Json(json!(state.library.book(book).await?)))
}

/// One section with its books.
///
/// # Errors
/// 404 for an unknown section.
pub async fn section(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    Path(section): Path<i32>,
) -> Reply {
    Ok(Json(json!(state.library.section(section).await?)))
}

/// `[issued, not issued]` counts for the loan chart.
///
/// # Errors
/// 500 on storage failure.
pub async fn chart(State(state): State<AppState>, AuthLibrarian(_): AuthLibrarian) -> Reply {
    Ok(Json(json!({ "chart_data": state.library.loan_chart().await? })))
}

/// Remove a book.
///
/// # Errors
/// 404 for an unknown book.
pub async fn remove_book(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    Path(book): Path<i32>,
) -> Reply {
    state.library.remove_book(book).await?;
    Ok(done())
}

/// Remove a section, moving its books to the default section.
///
/// # Errors
/// 404 for an unknown section, 401 for the default section.
pub async fn remove_section(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    Path(section): Path<i32>,
) -> Reply {
    state.library.remove_section(section).await?;
    Ok(done())
}

/// Take a book back from its holder.
///
/// # Errors
/// 404 for an unknown or unheld book.
pub async fn revoke_book(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    Path(book): Path<i32>,
) -> Reply {
    state.library.revoke(book).await?;
    Ok(done())
}

/// Search books by title, author or holder.
///
/// # Errors
/// 401 for a malformed body.
pub async fn search_books(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    ValidJson(body): ValidJson<SearchBody>,
) -> Reply {
    Ok(Json(json!(state.library.search_books(&body.index, &body.key).await?)))
}

/// Search sections by name.
///
/// # Errors
/// 401 for a malformed body.
pub async fn search_sections(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    ValidJson(body): ValidJson<SectionSearchBody>,
) -> Reply {
    Ok(Json(json!(state.library.search_sections(&body.key).await?)))
}

/// Add a book.
///
/// # Errors
/// 401 for blank fields, 404 for an unknown section.
pub async fn add_book(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    ValidJson(body): ValidJson<BookBody>,
) -> Reply {
    let book = state
        .library
        .add_book(BookDraft {
            title: &body.name,
            author: &body.authors,
            content: &body.content,
            section_id: body.section_id.unwrap_or(DEFAULT_SECTION_ID),
        })
        .await?;
    Ok(Json(json!({ "message": "done", "book": book })))
}

/// Edit a book.
///
/// # Errors
/// 401 for blank fields, 404 for an unknown book or section.
pub async fn modify_book(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    Path(book): Path<i32>,
    ValidJson(body): ValidJson<BookEditBody>,
) -> Reply {
    let update = BookUpdate {
        title: body.name.as_deref(),
        author: body.authors.as_deref(),
        content: body.content.as_deref(),
        section_id: body.section_id,
    };
    state.library.modify_book(book, &update).await?;
    Ok(done())
}

/// Add a section.
///
/// # Errors
/// 401 for blank fields.
pub async fn add_section(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    ValidJson(body): ValidJson<SectionBody>,
) -> Reply {
    let section = state.library.add_section(&body.name, &body.description).await?;
    Ok(Json(json!({ "message": "done", "section": section })))
}

/// Edit a section.
///
/// # Errors
/// 401 for blank fields, 404 for an unknown section.
pub async fn modify_section(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    Path(section): Path<i32>,
    ValidJson(body): ValidJson<SectionBody>,
) -> Reply {
    let update = SectionUpdate {
        name: &body.name,
        description: &body.description,
    };
    state.library.modify_section(section, &update).await?;
    Ok(done())
}

/// Approve (`0`) or reject (`1`) a pending request.
///
/// # Errors
/// 400 for another choice, 404 when the request is missing or closed.
pub async fn process_request(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    Path((request, choice)): Path<(i32, i64)>,
) -> Reply {
    let decision = Decision::from_choice(choice)?;
    state.library.process_request(request, decision).await?;
    Ok(done())
}

/// Pending requests with the current holder of each book.
///
/// # Errors
/// 500 on storage failure.
pub async fn requests(State(state): State<AppState>, AuthLibrarian(_): AuthLibrarian) -> Reply {
    Ok(Json(json!(state.library.pending_requests().await?)))
}

/// Start a CSV export mailed to the requesting librarian and return its
/// job handle.
///
/// # Errors
/// 404 when the librarian account no longer exists.
pub async fn generate_report(State(state): State<AppState>, AuthLibrarian(username): AuthLibrarian) -> Reply {
    let recipient = state.library.librarian_email(&username).await?;
    let library = state.library.clone();
    let mailer = Arc::clone(&state.mailer);
    let id = state.jobs.spawn("csv-export", async move {
        tasks::export_csv(&library, mailer.as_ref(), &recipient).await.map(drop)
    });
    Ok(Json(json!({ "message": "started", "task_id": id })))
}

/// Status of an export job.
///
/// # Errors
/// 404 for an unknown handle.
pub async fn report_status(
    State(state): State<AppState>,
    AuthLibrarian(_): AuthLibrarian,
    Query(query): Query<StatusQuery>,
) -> Reply {
    let Some(raw) = query.task_id else {
        return Ok(Json(json!({ "status": "ERROR", "message": "Task ID is required" })));
    };
    let status = Uuid::parse_str(&raw)
        .ok()
        .and_then(|id| state.jobs.status(&id))
        .ok_or_else(|| ApiError::refused(StatusCode::NOT_FOUND, "task does not exist"))?;
    Ok(Json(json!({ "status": status })))
}

/// Dashboard counters.
///
/// # Errors
/// 500 on storage failure.
pub async fn stats(State(state): State<AppState>, AuthLibrarian(_): AuthLibrarian) -> Reply {
    Ok(Json(json!(state.library.stats().await?)))
}
