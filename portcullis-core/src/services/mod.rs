//! Service layer for the authentication and account-protection engine
//!
//! Each service owns one concern and talks to storage only through the
//! repository traits. The `portcullis` crate composes them into the login,
//! recovery and session flows.

pub mod lockout;
pub mod notification;
pub mod password;
pub mod rate_limit;
pub mod recovery;
pub mod token;

pub use lockout::{FailureStatus, LockoutService, LockoutSweep};
pub use notification::{NotificationService, Notifier, TracingNotifier};
pub use rate_limit::{RateLimitStatus, RateLimitTier, RateLimiter};
pub use recovery::{
    IssuedRecoveryCode, PASSWORD_RESET_PURPOSE, RecoveryCodeService, RecoveryValidation,
};
pub use token::{ResetGrant, TokenService};
