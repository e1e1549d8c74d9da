//! Request extractors: authentication and validated JSON bodies.
//!
//! Handlers run authentication first (token, role, then identity lookup),
//! then body validation, then the operation itself.

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::de::DeserializeOwned;

use super::{AppState, error::ApiError};
use crate::{
    auth::{AuthError, Claims, Role},
    validation::{Validate, ValidationError},
};

fn claims(parts: &Parts, state: &AppState, role: Role) -> Result<Claims, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    state.library.tokens().authenticate(header, role)
}

/// An authenticated reader, identified by email.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state, Role::User)?;
        if !state.library.user_exists(&claims.sub).await? {
            return Err(AuthError::Invalid.into());
        }
        Ok(Self(claims.sub))
    }
}

/// An authenticated librarian, identified by username.
#[derive(Debug, Clone)]
pub struct AuthLibrarian(pub String);

impl FromRequestParts<AppState> for AuthLibrarian {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = claims(parts, state, Role::Librarian)?;
        if !state.library.librarian_exists(&claims.sub).await? {
            return Err(AuthError::Invalid.into());
        }
        Ok(Self(claims.sub))
    }
}

/// A JSON body that parsed and passed [`Validate`].
///
/// Unparsable bodies and bodies missing required keys are rejected with
/// [`ValidationError::Malformed`].
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state)
            .await
            .map_err(|_| ValidationError::Malformed)?;
        body.validate()?;
        Ok(Self(body))
    }
}
