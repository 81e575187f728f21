use crate::error::ValidationError;
use regex::Regex;
use std::sync::LazyLock;

/// Input validation shared by the services and the facade.
///
/// Lazy-loaded email validation regex, a practical subset of RFC 5322.
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("Invalid email regex pattern")
});

/// Validates an email address
///
/// # Examples
///
/// ```rust
/// use portcullis_core::validation::validate_email;
///
/// assert!(validate_email("user@example.com").is_ok());
/// assert!(validate_email("invalid-email").is_err());
/// ```
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::MissingField(
            "Email is required".to_string(),
        ));
    }

    if email.len() > 254 {
        return Err(ValidationError::InvalidEmail(
            "Email is too long".to_string(),
        ));
    }

    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail(format!(
            "Invalid email format: {email}"
        )))
    }
}

/// Validates a password according to security requirements
///
/// - Minimum 8 characters
/// - Maximum 128 characters
/// - Cannot be empty or whitespace only
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::MissingField(
            "Password is required".to_string(),
        ));
    }

    if password.trim().is_empty() {
        return Err(ValidationError::InvalidPassword(
            "Password cannot be only whitespace".to_string(),
        ));
    }

    if password.len() < 8 {
        return Err(ValidationError::InvalidPassword(
            "Password must be at least 8 characters long".to_string(),
        ));
    }

    if password.len() > 128 {
        return Err(ValidationError::InvalidPassword(
            "Password must be no more than 128 characters long".to_string(),
        ));
    }

    Ok(())
}

/// Validates a national document identifier.
///
/// Documents are free-form but limited to ASCII alphanumerics plus `.` and `-`,
/// at most 32 characters.
pub fn validate_document(document: &str) -> Result<(), ValidationError> {
    if document.trim().is_empty() {
        return Err(ValidationError::MissingField(
            "Document is required".to_string(),
        ));
    }

    if document.len() > 32 {
        return Err(ValidationError::InvalidField(
            "Document must be no more than 32 characters long".to_string(),
        ));
    }

    if !document
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ValidationError::InvalidField(
            "Document must contain only letters, digits, dots and hyphens".to_string(),
        ));
    }

    Ok(())
}

/// Validates a recovery-code purpose tag such as `password-reset`.
pub fn validate_purpose(purpose: &str) -> Result<(), ValidationError> {
    if purpose.is_empty() {
        return Err(ValidationError::MissingField(
            "Purpose is required".to_string(),
        ));
    }

    if purpose.len() > 50
        || !purpose
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ValidationError::InvalidField(format!(
            "Invalid purpose tag: {purpose}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email_valid() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("test.email+tag@domain.co.uk").is_ok());
        assert!(validate_email("a@x.com").is_ok());
    }

    #[test]
    fn test_validate_email_invalid() {
        assert!(validate_email("").is_err());
        assert!(validate_email("invalid-email").is_err());
        assert!(validate_email("@domain.com").is_err());
        assert!(validate_email("user@domain").is_err());

        let long_email = format!("{}@example.com", "a".repeat(250));
        assert!(validate_email(&long_email).is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("password123").is_ok());
        assert!(validate_password("12345678").is_ok());

        assert!(validate_password("").is_err());
        assert!(validate_password("   ").is_err());
        assert!(validate_password("short").is_err());
        assert!(validate_password(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_document() {
        assert!(validate_document("12.345.678-9").is_ok());
        assert!(validate_document("AB123456").is_ok());

        assert!(validate_document("").is_err());
        assert!(validate_document("12 345").is_err());
        assert!(validate_document(&"1".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_purpose() {
        assert!(validate_purpose("password-reset").is_ok());
        assert!(validate_purpose("").is_err());
        assert!(validate_purpose("Password_Reset").is_err());
    }
}
