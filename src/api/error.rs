//! Mapping of domain failures onto HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    auth::AuthError,
    error::{LibraryError, PolicyViolation},
    validation::ValidationError,
};

/// Error type returned by every handler.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A library operation failed.
    #[error(transparent)]
    Library(#[from] LibraryError),
    /// The request could not be authenticated.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// A handler-specific refusal with an explicit status and body.
    #[error("request refused with {status}")]
    Refused {
        /// Response status.
        status: StatusCode,
        /// Response body.
        body: Value,
    },
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self { Self::Library(err.into()) }
}

impl From<PolicyViolation> for ApiError {
    fn from(err: PolicyViolation) -> Self { Self::Library(err.into()) }
}

impl ApiError {
    /// Refuse with `status` and `{"error": message}`.
    #[must_use]
    pub fn refused(status: StatusCode, message: &str) -> Self {
        Self::Refused {
            status,
            body: json!({ "error": message }),
        }
    }
}

fn internal(err: &dyn std::error::Error) -> (StatusCode, Value) {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "internal server error" }),
    )
}

fn library_response(err: &LibraryError) -> (StatusCode, Value) {
    match err {
        LibraryError::NotFound(_) | LibraryError::NotHeld => {
            (StatusCode::NOT_FOUND, json!({ "error": err.to_string() }))
        }
        LibraryError::Policy(violation) if violation.is_noop() => {
            (StatusCode::OK, json!({ "message": violation.to_string() }))
        }
        LibraryError::Policy(PolicyViolation::NoAccess) => {
            (StatusCode::FORBIDDEN, json!({ "error": err.to_string() }))
        }
        LibraryError::Policy(violation) => {
            debug!(%violation, "policy violation");
            (StatusCode::UNAUTHORIZED, json!({ "error": violation.to_string() }))
        }
        LibraryError::Validation(ValidationError::InvalidChoice) => {
            (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() }))
        }
        LibraryError::Validation(invalid) => {
            (StatusCode::UNAUTHORIZED, json!({ "message": invalid.to_string() }))
        }
        LibraryError::Credentials(_) => (
            StatusCode::UNAUTHORIZED,
            json!({ "error": "Invalid Credentials", "authenticated": false }),
        ),
        other => internal(other),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Library(err) => library_response(err),
            Self::Auth(err @ (AuthError::Invalid | AuthError::Expired)) => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": err.to_string(), "authenticated": false, "invalid": true }),
            ),
            Self::Auth(err) => internal(err),
            Self::Refused { status, body } => (*status, body.clone()),
        };
        (status, Json(body)).into_response()
    }
}
