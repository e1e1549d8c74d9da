//! Domain error taxonomy shared by the stores, the borrow workflow and the
//! library service.
//!
//! Not-found and policy outcomes are ordinary results of a request and are
//! reported to clients as explicit payloads; only the storage variants
//! represent faults.

use std::fmt;

use diesel_async::pooled_connection::bb8::RunError;
use thiserror::Error;

use crate::{auth::AuthError, reports::ReportError, validation::ValidationError};

/// Kinds of record a lookup can fail to find.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    /// A catalog book.
    Book,
    /// A catalog section.
    Section,
    /// A borrow request that is missing or no longer pending.
    Request,
    /// A reader account.
    User,
    /// A librarian account.
    Librarian,
    /// The stored file of a book.
    Artifact,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Book => "book",
            Self::Section => "section",
            Self::Request => "request",
            Self::User => "user",
            Self::Librarian => "librarian",
            Self::Artifact => "book file",
        })
    }
}

/// Workflow preconditions that rejected an otherwise well-formed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// The user already holds the requested book.
    #[error("Already in Possession")]
    AlreadyInPossession,
    /// The user already has a pending request for the book.
    #[error("Already Requested")]
    AlreadyRequested,
    /// The user already holds the maximum number of books.
    #[error("Max Books in Possession")]
    MaxBooksInPossession,
    /// The book is currently issued to somebody else.
    #[error("Book already issued")]
    HeldByAnother,
    /// The caller is not the current holder of the book.
    #[error("Not able to process")]
    NotHolder,
    /// The user already marked this book as read.
    #[error("Already marked as read")]
    AlreadyMarkedRead,
    /// The user already left feedback for this book.
    #[error("Already Given")]
    FeedbackExists,
    /// The user already owns this book.
    #[error("already owned")]
    AlreadyOwned,
    /// The caller lacks access to the book contents.
    #[error("No Permission")]
    NoAccess,
    /// An account with the same identity already exists.
    #[error("Could Not Create")]
    AccountExists,
    /// The default section cannot be removed.
    #[error("default section cannot be removed")]
    DefaultSection,
}

impl PolicyViolation {
    /// Whether the violation means "nothing to do" rather than "invalid".
    ///
    /// Repeating a request that has already taken effect is reported with a
    /// success status so clients can treat it as idempotent.
    #[must_use]
    pub const fn is_noop(self) -> bool {
        matches!(
            self,
            Self::AlreadyInPossession | Self::AlreadyRequested | Self::AlreadyOwned
        )
    }
}

/// Why a login attempt was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialFailure {
    /// No account matches the supplied name.
    UnknownAccount,
    /// The account exists but the password does not match.
    WrongPassword,
}

/// Errors returned by library operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The referenced record does not exist.
    #[error("{0} does not exist")]
    NotFound(Entity),
    /// A revoke targeted a book that nobody holds.
    #[error("no one has the book")]
    NotHeld,
    /// A workflow precondition failed.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    /// Input failed validation before reaching the stores.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A login attempt was refused.
    #[error("Invalid Credentials")]
    Credentials(CredentialFailure),
    /// A session token could not be issued.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// A book artifact could not be produced.
    #[error(transparent)]
    Report(#[from] ReportError),
    /// The connection pool could not hand out a connection.
    #[error("database pool error: {0}")]
    Pool(#[from] RunError),
    /// The database rejected a query.
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    /// A cached response could not be encoded.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),
    /// Reading or writing a stored artifact failed.
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<argon2::password_hash::Error> for LibraryError {
    fn from(err: argon2::password_hash::Error) -> Self { Self::Hash(err) }
}

impl LibraryError {
    /// Whether the error is a fault rather than an expected outcome.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Pool(_)
                | Self::Database(_)
                | Self::Encode(_)
                | Self::Hash(_)
                | Self::Io(_)
                | Self::Auth(_)
                | Self::Report(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(PolicyViolation::AlreadyInPossession, true)]
    #[case(PolicyViolation::AlreadyRequested, true)]
    #[case(PolicyViolation::AlreadyOwned, true)]
    #[case(PolicyViolation::MaxBooksInPossession, false)]
    #[case(PolicyViolation::NotHolder, false)]
    #[case(PolicyViolation::FeedbackExists, false)]
    fn noop_classification(#[case] violation: PolicyViolation, #[case] expected: bool) {
        assert_eq!(violation.is_noop(), expected);
    }

    #[test]
    fn not_found_names_entity() {
        assert_eq!(
            LibraryError::NotFound(Entity::Request).to_string(),
            "request does not exist"
        );
    }

    #[test]
    fn policy_errors_are_not_internal() {
        let err = LibraryError::from(PolicyViolation::MaxBooksInPossession);
        assert!(!err.is_internal());
        assert_eq!(err.to_string(), "Max Books in Possession");
    }
}
