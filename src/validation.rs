//! Payload validation applied before any store mutation.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

#[expect(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Reasons a payload was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The body could not be parsed or a required key is absent.
    #[error("arguments are wrong")]
    Malformed,
    /// A required field is present but empty.
    #[error("some fields are empty")]
    Empty(&'static str),
    /// The supplied address is not an email address.
    #[error("Not an email Address")]
    InvalidEmail,
    /// An enumerated value was outside its allowed range.
    #[error("invalid choice")]
    InvalidChoice,
}

/// Shape checks for request payloads.
pub trait Validate {
    /// Check the payload, returning the first problem found.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] describing the rejected field.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Check that `email` looks like `local@domain.tld`.
///
/// # Errors
/// Returns [`ValidationError::InvalidEmail`] when the address is malformed.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if EMAIL_PATTERN.is_match(email) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

/// Reject blank values of the field called `name`.
///
/// # Errors
/// Returns [`ValidationError::Empty`] when `value` is blank.
pub fn non_empty(name: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("reader@example.com", true)]
    #[case("a.b@c.org", true)]
    #[case("no-at-sign.com", false)]
    #[case("two@@example.com", false)]
    #[case("missing@tld", false)]
    #[case("", false)]
    fn email_shapes(#[case] email: &str, #[case] valid: bool) {
        assert_eq!(validate_email(email).is_ok(), valid);
    }

    #[rstest]
    #[case("   ", false)]
    #[case("", false)]
    #[case("Poetry", true)]
    fn blank_fields_are_empty(#[case] value: &str, #[case] accepted: bool) {
        let checked = non_empty("name", value);
        assert_eq!(checked.is_ok(), accepted);
        if !accepted {
            assert_eq!(checked, Err(ValidationError::Empty("name")));
        }
    }
}
