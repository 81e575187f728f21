pub mod utilities;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Identity not found")]
    IdentityNotFound,

    /// `retry_after` is `None` for an indefinite lockout.
    #[error("Account locked")]
    AccountLocked { retry_after: Option<Duration> },

    #[error("Account inactive")]
    AccountInactive,

    #[error("Too many requests")]
    RateLimited { retry_after: Duration },

    #[error("Password hash error: {0}")]
    PasswordHashError(String),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Recovery code invalid or expired")]
    CodeInvalidOrExpired { attempts_remaining: Option<u32> },

    #[error("Recovery code attempts exceeded")]
    CodeAttemptsExceeded,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token revoked")]
    Revoked,

    /// A rotated refresh token (or reset credential) was presented again.
    #[error("Token already used")]
    Replayed,

    #[error("Token version mismatch")]
    VersionMismatch,

    #[error("Token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Machine-readable classification of an [`Error`], for transport layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCredential,
    IdentityNotFound,
    AccountLocked,
    AccountInactive,
    CodeInvalidOrExpired,
    CodeAttemptsExceeded,
    TokenExpired,
    TokenMalformed,
    TokenRevoked,
    TokenReplayed,
    TokenVersionMismatch,
    RateLimited,
    Validation,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case code suitable for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCredential => "invalid_credential",
            ErrorKind::IdentityNotFound => "identity_not_found",
            ErrorKind::AccountLocked => "account_locked",
            ErrorKind::AccountInactive => "account_inactive",
            ErrorKind::CodeInvalidOrExpired => "code_invalid_or_expired",
            ErrorKind::CodeAttemptsExceeded => "code_attempts_exceeded",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::TokenMalformed => "token_malformed",
            ErrorKind::TokenRevoked => "token_revoked",
            ErrorKind::TokenReplayed => "token_replayed",
            ErrorKind::TokenVersionMismatch => "token_version_mismatch",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Validation => "validation_failed",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Suggested HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidCredential | ErrorKind::IdentityNotFound => 401,
            ErrorKind::AccountInactive => 403,
            ErrorKind::AccountLocked => 423,
            ErrorKind::CodeInvalidOrExpired | ErrorKind::CodeAttemptsExceeded => 400,
            ErrorKind::TokenExpired
            | ErrorKind::TokenMalformed
            | ErrorKind::TokenRevoked
            | ErrorKind::TokenReplayed
            | ErrorKind::TokenVersionMismatch => 401,
            ErrorKind::RateLimited => 429,
            ErrorKind::Validation => 422,
            ErrorKind::Internal => 500,
        }
    }

    /// Token failures end the session; the client must authenticate again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            ErrorKind::TokenExpired
                | ErrorKind::TokenMalformed
                | ErrorKind::TokenRevoked
                | ErrorKind::TokenReplayed
                | ErrorKind::TokenVersionMismatch
        )
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth(AuthError::InvalidCredentials) => ErrorKind::InvalidCredential,
            Error::Auth(AuthError::IdentityNotFound) => ErrorKind::IdentityNotFound,
            Error::Auth(AuthError::AccountLocked { .. }) => ErrorKind::AccountLocked,
            Error::Auth(AuthError::AccountInactive) => ErrorKind::AccountInactive,
            Error::Auth(AuthError::RateLimited { .. }) => ErrorKind::RateLimited,
            Error::Auth(AuthError::PasswordHashError(_)) => ErrorKind::Internal,
            Error::Recovery(RecoveryError::CodeInvalidOrExpired { .. }) => {
                ErrorKind::CodeInvalidOrExpired
            }
            Error::Recovery(RecoveryError::CodeAttemptsExceeded) => {
                ErrorKind::CodeAttemptsExceeded
            }
            Error::Token(TokenError::Expired) => ErrorKind::TokenExpired,
            Error::Token(TokenError::Malformed(_)) => ErrorKind::TokenMalformed,
            Error::Token(TokenError::Revoked) => ErrorKind::TokenRevoked,
            Error::Token(TokenError::Replayed) => ErrorKind::TokenReplayed,
            Error::Token(TokenError::VersionMismatch) => ErrorKind::TokenVersionMismatch,
            Error::Token(TokenError::Signing(_)) => ErrorKind::Internal,
            Error::Storage(_) => ErrorKind::Internal,
            Error::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Retry hint for lockout and rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Auth(AuthError::AccountLocked { retry_after }) => *retry_after,
            Error::Auth(AuthError::RateLimited { retry_after }) => Some(*retry_after),
            _ => None,
        }
    }

    /// Remaining recovery-code attempts, when the failure reports them.
    pub fn attempts_remaining(&self) -> Option<u32> {
        match self {
            Error::Recovery(RecoveryError::CodeInvalidOrExpired { attempts_remaining }) => {
                *attempts_remaining
            }
            Error::Recovery(RecoveryError::CodeAttemptsExceeded) => Some(0),
            _ => None,
        }
    }

    /// Message safe to show to end users.
    ///
    /// Identity and credential failures share one message so responses never reveal
    /// whether an account exists.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::InvalidCredential | ErrorKind::IdentityNotFound => {
                "Invalid credentials".to_string()
            }
            ErrorKind::AccountLocked => "Account temporarily locked".to_string(),
            ErrorKind::AccountInactive => "Account inactive".to_string(),
            ErrorKind::CodeInvalidOrExpired => match self.attempts_remaining() {
                Some(remaining) => {
                    format!("Invalid or expired code, {remaining} attempts remaining")
                }
                None => "Invalid or expired code".to_string(),
            },
            ErrorKind::CodeAttemptsExceeded => "Too many attempts, request a new code".to_string(),
            ErrorKind::RateLimited => "Too many requests".to_string(),
            ErrorKind::Validation => self.to_string(),
            ErrorKind::Internal => "Internal error".to_string(),
            _ => "Session is no longer valid".to_string(),
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    pub fn is_token_error(&self) -> bool {
        matches!(self, Error::Token(_))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let auth_error = Error::Auth(AuthError::InvalidCredentials);
        assert_eq!(
            auth_error.to_string(),
            "Authentication error: Invalid credentials"
        );

        let storage_error = Error::Storage(StorageError::NotFound);
        assert_eq!(storage_error.to_string(), "Storage error: Record not found");

        let token_error = Error::Token(TokenError::Malformed("bad signature".to_string()));
        assert_eq!(
            token_error.to_string(),
            "Token error: Malformed token: bad signature"
        );
    }

    #[test]
    fn test_kind_status_codes() {
        assert_eq!(
            Error::Auth(AuthError::InvalidCredentials).kind().status_code(),
            401
        );
        assert_eq!(
            Error::Auth(AuthError::AccountLocked {
                retry_after: Some(Duration::minutes(15))
            })
            .kind()
            .status_code(),
            423
        );
        assert_eq!(
            Error::Auth(AuthError::RateLimited {
                retry_after: Duration::seconds(30)
            })
            .kind()
            .status_code(),
            429
        );
        assert_eq!(Error::Storage(StorageError::NotFound).kind().code(), "internal_error");
    }

    #[test]
    fn test_identity_and_credential_share_public_message() {
        let a = Error::Auth(AuthError::InvalidCredentials);
        let b = Error::Auth(AuthError::IdentityNotFound);
        assert_eq!(a.public_message(), b.public_message());
    }

    #[test]
    fn test_retry_after_hints() {
        let locked = Error::Auth(AuthError::AccountLocked {
            retry_after: Some(Duration::minutes(10)),
        });
        assert_eq!(locked.retry_after(), Some(Duration::minutes(10)));

        let indefinite = Error::Auth(AuthError::AccountLocked { retry_after: None });
        assert_eq!(indefinite.retry_after(), None);

        let limited = Error::Auth(AuthError::RateLimited {
            retry_after: Duration::seconds(5),
        });
        assert_eq!(limited.retry_after(), Some(Duration::seconds(5)));
    }

    #[test]
    fn test_recovery_errors_expose_attempts_remaining() {
        let err = Error::Recovery(RecoveryError::CodeInvalidOrExpired {
            attempts_remaining: Some(2),
        });
        assert_eq!(err.attempts_remaining(), Some(2));
        assert!(err.public_message().contains("2 attempts remaining"));

        let exceeded = Error::Recovery(RecoveryError::CodeAttemptsExceeded);
        assert_eq!(exceeded.attempts_remaining(), Some(0));
    }

    #[test]
    fn test_token_kinds_are_distinct() {
        let expired = Error::Token(TokenError::Expired).kind();
        let replayed = Error::Token(TokenError::Replayed).kind();
        let revoked = Error::Token(TokenError::Revoked).kind();
        assert_ne!(expired, replayed);
        assert_ne!(expired, revoked);
        assert_ne!(replayed, revoked);
        assert!(replayed.requires_reauthentication());
    }

    #[test]
    fn test_error_from_conversions() {
        let error: Error = TokenError::Revoked.into();
        assert!(matches!(error, Error::Token(TokenError::Revoked)));

        let error: Error = ValidationError::MissingField("email".to_string()).into();
        assert_eq!(error.kind(), ErrorKind::Validation);
    }
}
