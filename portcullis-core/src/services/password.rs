//! Password hashing
//!
//! Hashes are produced by `password-auth` (Argon2id, PHC string format).

use std::sync::LazyLock;

use crate::{Error, validation::validate_password};

/// Hash compared against when there is no real hash, so a login for an
/// unknown identity costs as much as one for a known identity.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| password_auth::generate_hash("portcullis-timing-equalizer"));

/// Validate strength and hash a new password.
pub fn hash_password(password: &str) -> Result<String, Error> {
    validate_password(password)?;
    Ok(password_auth::generate_hash(password))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    password_auth::verify_password(password, hash).is_ok()
}

/// Verify against `hash`, or burn an equivalent verification when it is absent.
pub fn verify_password_or_dummy(password: &str, hash: Option<&str>) -> bool {
    match hash {
        Some(hash) => verify_password(password, hash),
        None => {
            let _ = verify_password(password, &DUMMY_HASH);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn test_weak_password_rejected() {
        let err = hash_password("short").unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidPassword(_))
        ));
    }

    #[test]
    fn test_missing_hash_never_verifies() {
        assert!(!verify_password_or_dummy("portcullis-timing-equalizer", None));
    }
}
