//! Password hashing for readers and librarians.

use argon2::{
    Argon2,
    password_hash::{
        Error,
        PasswordHash,
        PasswordHasher,
        PasswordVerifier,
        SaltString,
        rand_core::OsRng,
    },
};

/// Hash `pw` into a PHC string with a fresh random salt.
///
/// # Errors
/// Returns an error if Argon2 rejects the input.
pub fn hash_password(argon2: &Argon2, pw: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(argon2.hash_password(pw.as_bytes(), &salt)?.to_string())
}

/// Check `pw` against a stored PHC string.
///
/// The cost parameters are read from the hash itself. A malformed hash never
/// verifies.
#[must_use]
pub fn verify_password(hash: &str, pw: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(pw.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use argon2::{Algorithm, Argon2, Params, Version};
    use rstest::rstest;

    use super::{hash_password, verify_password};

    #[rstest]
    fn hashed_password_verifies() {
        let argon2 = Argon2::default();
        let hashed = hash_password(&argon2, "secret").expect("hash");
        assert!(verify_password(&hashed, "secret"));
        assert!(!verify_password(&hashed, "Secret"));
    }

    #[rstest]
    fn custom_params_are_embedded_in_hash() {
        let params = Params::new(1024, 1, 1, None).expect("params");
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let hashed = hash_password(&argon2, "secret").expect("hash");
        assert!(hashed.contains("m=1024,t=1,p=1"));
        assert!(verify_password(&hashed, "secret"));
    }

    #[rstest]
    #[case("")]
    #[case("plaintext")]
    fn malformed_hash_never_verifies(#[case] stored: &str) {
        assert!(!verify_password(stored, "plaintext"));
    }
}
