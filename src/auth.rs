//! Bearer tokens for readers and librarians.
//!
//! Tokens are HS256 JWTs carrying the subject (reader email or librarian
//! username), a role claim and an expiry. Reader tokens are short lived;
//! librarian tokens last a month.

use argon2::password_hash::rand_core::{OsRng, RngCore};
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who a token was issued to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A reader.
    User,
    /// A librarian.
    Librarian,
}

impl Role {
    /// How long a freshly issued token for this role stays valid.
    #[must_use]
    pub const fn token_lifetime(self) -> TimeDelta {
        match self {
            Self::User => TimeDelta::minutes(30),
            Self::Librarian => TimeDelta::days(30),
        }
    }
}

/// Token payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Reader email or librarian username.
    pub sub: String,
    /// Role the token grants.
    pub role: Role,
    /// Expiry as seconds since the Unix epoch.
    pub exp: i64,
}

/// Reasons a request could not be authenticated.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing, malformed or forged token, wrong role, or unknown subject.
    #[error("Invalid token")]
    Invalid,
    /// The token was well formed but has expired.
    #[error("Expired token")]
    Expired,
    /// A token could not be signed.
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Signs and verifies tokens with a shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenIssuer {
    /// Build an issuer for `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issue a token for `subject` valid for the role's lifetime from `now`.
    ///
    /// # Errors
    /// [`AuthError::Signing`] if encoding fails.
    pub fn issue(&self, subject: &str, role: Role, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            sub: subject.to_owned(),
            role,
            exp: (now + role.token_lifetime()).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(AuthError::Signing)
    }

    /// Decode `token` and require it to carry `expected`.
    ///
    /// # Errors
    /// [`AuthError::Expired`] for an expired token, [`AuthError::Invalid`]
    /// for any other failure including a role mismatch.
    pub fn verify(&self, token: &str, expected: Role) -> Result<Claims, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            })?;
        if data.claims.role != expected {
            return Err(AuthError::Invalid);
        }
        Ok(data.claims)
    }

    /// Authenticate an `Authorization` header value of the form
    /// `<scheme> <token>`.
    ///
    /// # Errors
    /// As for [`TokenIssuer::verify`]; a missing header or one that does not
    /// split into exactly two words is [`AuthError::Invalid`].
    pub fn authenticate(&self, header: Option<&str>, expected: Role) -> Result<Claims, AuthError> {
        let mut words = header.unwrap_or_default().split_whitespace();
        let (Some(_scheme), Some(token), None) = (words.next(), words.next(), words.next()) else {
            return Err(AuthError::Invalid);
        };
        self.verify(token, expected)
    }
}

/// A fresh 256-bit signing secret, hex encoded.
#[must_use]
pub fn random_secret() -> String {
    let mut bytes = [0_u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
