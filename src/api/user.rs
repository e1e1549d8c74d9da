//! Reader endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    AppState,
    error::ApiError,
    extract::{AuthUser, ValidJson},
};
use crate::{
    error::LibraryError,
    library::Signup,
    models::ProfileUpdate,
    validation::{Validate, ValidationError, non_empty, validate_email},
    workflow::FeedbackInput,
};

type Reply = Result<Json<Value>, ApiError>;

fn message(text: &str) -> Json<Value> { Json(json!({ "message": text })) }

/// `POST /login/user`.
#[derive(Debug, Deserialize)]
pub struct LoginBody {
    email: String,
    password: String,
}

impl Validate for LoginBody {
    fn validate(&self) -> Result<(), ValidationError> { non_empty("email", &self.email) }
}

/// `POST /signup/user`.
#[derive(Debug, Deserialize)]
pub struct SignupBody {
    email: String,
    fname: String,
    lname: String,
    pnum: String,
    nick_name: String,
    password: String,
}

impl Validate for SignupBody {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_email(&self.email)?;
        non_empty("fname", &self.fname)?;
        non_empty("pnum", &self.pnum)?;
        non_empty("nick_name", &self.nick_name)?;
        non_empty("password", &self.password)
    }
}

/// Book search body; `index` selects the column.
#[derive(Debug, Deserialize)]
pub struct SearchBody {
    /// Substring to look for.
    pub key: String,
    /// `"1"` title, `"3"` holder (librarians only), anything else author.
    pub index: String,
}

impl Validate for SearchBody {
    fn validate(&self) -> Result<(), ValidationError> { Ok(()) }
}

/// Section search body.
#[derive(Debug, Deserialize)]
pub struct SectionSearchBody {
    /// Substring of the section name.
    pub key: String,
}

impl Validate for SectionSearchBody {
    fn validate(&self) -> Result<(), ValidationError> { Ok(()) }
}

/// `POST /user/feedback/{book_id}`.
#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    rating: i32,
    feedback: String,
}

impl Validate for FeedbackBody {
    fn validate(&self) -> Result<(), ValidationError> {
        if (0..=5).contains(&self.rating) {
            Ok(())
        } else {
            Err(ValidationError::InvalidChoice)
        }
    }
}

/// `POST /user/profile/edit`.
#[derive(Debug, Deserialize)]
pub struct ProfileBody {
    pname: String,
    fname: String,
    lname: String,
    cno: String,
    about: String,
}

impl Validate for ProfileBody {
    fn validate(&self) -> Result<(), ValidationError> {
        non_empty("pname", &self.pname)?;
        non_empty("fname", &self.fname)?;
        non_empty("cno", &self.cno)
    }
}

fn optional(value: &str) -> Option<&str> { Some(value).filter(|v| !v.trim().is_empty()) }

/// Log a reader in.
///
/// # Errors
/// 401 for unknown accounts or wrong passwords.
pub async fn login(State(state): State<AppState>, ValidJson(body): ValidJson<LoginBody>) -> Reply {
    let session = state.library.login_user(&body.email, &body.password).await?;
    Ok(Json(json!({ "token": session.token, "user_details": session.details })))
}

/// Register a reader.
///
/// # Errors
/// 401 when the email is already registered.
pub async fn signup(State(state): State<AppState>, ValidJson(body): ValidJson<SignupBody>) -> Reply {
    let created = state
        .library
        .signup(Signup {
            email: &body.email,
            first_name: &body.fname,
            last_name: optional(&body.lname),
            phone: &body.pnum,
            nick_name: &body.nick_name,
            password: &body.password,
        })
        .await?;
    Ok(Json(json!(created)))
}

/// End the reader session.
///
/// # Errors
/// 500 on storage failure.
pub async fn logout(State(state): State<AppState>, AuthUser(email): AuthUser) -> Reply {
    state.library.logout(&email).await?;
    Ok(message("done"))
}

/// Whole catalog with ratings.
///
/// # Errors
/// 500 on storage failure.
pub async fn books(State(state): State<AppState>, AuthUser(email): AuthUser) -> Reply {
    Ok(Json(state.library.catalog(&email).await?))
}

/// Books the reader holds.
///
/// # Errors
/// 500 on storage failure.
pub async fn accessible_books(State(state): State<AppState>, AuthUser(email): AuthUser) -> Reply {
    Ok(Json(state.library.accessible_books(&email).await?))
}

/// Sections with rated books.
///
/// # Errors
/// 500 on storage failure.
pub async fn sections(State(state): State<AppState>, AuthUser(email): AuthUser) -> Reply {
    Ok(Json(state.library.sections(&email).await?))
}

/// Search the catalog.
///
/// # Errors
/// 401 for a malformed body.
pub async fn search_books(
    State(state): State<AppState>,
    AuthUser(email): AuthUser,
    ValidJson(body): ValidJson<SearchBody>,
) -> Reply {
    let found = state.library.search_books_for(&email, &body.index, &body.key).await?;
    Ok(Json(json!(found)))
}

/// Search the books the reader holds.
///
/// # Errors
/// 401 for a malformed body.
pub async fn search_accessible_books(
    State(state): State<AppState>,
    AuthUser(email): AuthUser,
    ValidJson(body): ValidJson<SearchBody>,
) -> Reply {
    let found = state.library.search_accessible(&email, &body.index, &body.key).await?;
    Ok(Json(json!(found)))
}

/// Search sections by name.
///
/// # Errors
/// 401 for a malformed body.
pub async fn search_sections(
    State(state): State<AppState>,
    AuthUser(email): AuthUser,
    ValidJson(body): ValidJson<SectionSearchBody>,
) -> Reply {
    let found = state.library.search_sections_for(&email, &body.key).await?;
    Ok(Json(json!(found)))
}

/// Open a held book.
///
/// # Errors
/// 404 for an unknown book, 403 when the reader does not hold it.
pub async fn read_book(State(state): State<AppState>, AuthUser(email): AuthUser, Path(book): Path<i32>) -> Reply {
    let reading = state.library.read_book(&email, book).await?;
    Ok(Json(json!(reading)))
}

/// Mark a held book as read.
///
/// # Errors
/// 404 for an unknown book, 403 when not held, 401 when already marked.
pub async fn mark_read(State(state): State<AppState>, AuthUser(email): AuthUser, Path(book): Path<i32>) -> Reply {
    state.library.mark_read(&email, book).await?;
    Ok(message("done"))
}

/// Ask to borrow a book.
///
/// # Errors
/// 404 for an unknown book, 401 at the possession limit; repeats answer 200.
pub async fn request_book(
    State(state): State<AppState>,
    AuthUser(email): AuthUser,
    Path(book): Path<i32>,
) -> Reply {
    state.library.request_book(&email, book).await?;
    Ok(message("Requested"))
}

/// Return a held book.
///
/// # Errors
/// 401 when the reader does not hold the book.
pub async fn return_book(
    State(state): State<AppState>,
    AuthUser(email): AuthUser,
    Path(book): Path<i32>,
) -> Reply {
    state.library.return_book(&email, book).await?;
    Ok(message("returned"))
}

/// Leave feedback on a book.
///
/// # Errors
/// 404 for an unknown book, 401 for repeat feedback.
pub async fn feedback(
    State(state): State<AppState>,
    AuthUser(email): AuthUser,
    Path(book): Path<i32>,
    ValidJson(body): ValidJson<FeedbackBody>,
) -> Reply {
    state
        .library
        .give_feedback(
            &email,
            book,
            FeedbackInput {
                rating: body.rating,
                comment: &body.feedback,
            },
        )
        .await?;
    Ok(message("Feedback registered"))
}

/// Feedback left on a book.
///
/// # Errors
/// 404 for an unknown book.
pub async fn check_feedback(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(book): Path<i32>,
) -> Reply {
    Ok(Json(json!(state.library.feedback_for(book).await?)))
}

/// The reader's profile.
///
/// # Errors
/// 500 on storage failure.
pub async fn profile(State(state): State<AppState>, AuthUser(email): AuthUser) -> Reply {
    Ok(Json(state.library.profile(&email).await?))
}

/// Edit the reader's profile.
///
/// # Errors
/// 401 for blank required fields.
pub async fn edit_profile(
    State(state): State<AppState>,
    AuthUser(email): AuthUser,
    ValidJson(body): ValidJson<ProfileBody>,
) -> Reply {
    state
        .library
        .edit_profile(
            &email,
            &ProfileUpdate {
                nick_name: &body.pname,
                first_name: &body.fname,
                last_name: optional(&body.lname),
                phone: &body.cno,
                about: optional(&body.about),
            },
        )
        .await?;
    Ok(message("done"))
}

/// Buy a book.
///
/// # Errors
/// 404 for an unknown book; a repeat purchase answers 200.
pub async fn buy(State(state): State<AppState>, AuthUser(email): AuthUser, Path(book): Path<i32>) -> Reply {
    state.library.purchase(&email, book).await?;
    Ok(message("done"))
}

/// Download the artifact of a purchased book.
///
/// # Errors
/// 404 for an unknown book, 403 when the reader does not own it.
pub async fn download(
    State(state): State<AppState>,
    AuthUser(email): AuthUser,
    Path(book): Path<i32>,
) -> Result<Response, ApiError> {
    let doc = state.library.download(&email, book).await?;
    let body = tokio::fs::read(&doc.path).await.map_err(LibraryError::from)?;
    let headers = [
        (CONTENT_TYPE, doc.content_type.to_owned()),
        (CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", doc.file_name())),
    ];
    Ok((headers, body).into_response())
}
