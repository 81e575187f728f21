//! Repository trait for one-time recovery codes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{NewRecoveryCode, RecoveryCode},
};

/// Storage for recovery codes, at most one unconsumed code per
/// `(identity, purpose)`.
///
/// Codes are only mutated by [`register_attempt`](RecoveryCodeRepository::register_attempt)
/// and [`consume`](RecoveryCodeRepository::consume); both must be single atomic
/// operations so concurrent guesses can never share an attempt slot.
#[async_trait]
pub trait RecoveryCodeRepository: Send + Sync + 'static {
    /// Consume every unconsumed code for the same `(identity, purpose)` and
    /// insert the new one, atomically.
    async fn replace_pending(&self, code: NewRecoveryCode) -> Result<RecoveryCode, Error>;

    /// The unconsumed code for `(identity, purpose)`, expired or not.
    async fn find_unconsumed(
        &self,
        identity: &str,
        purpose: &str,
    ) -> Result<Option<RecoveryCode>, Error>;

    /// Increment `attempts_used` if the code is unconsumed, unexpired at `now`
    /// and below its cap. Returns the updated code, or `None` when no slot was
    /// available.
    async fn register_attempt(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RecoveryCode>, Error>;

    /// Mark the code consumed. Returns `false` if it already was.
    async fn consume(&self, id: &str) -> Result<bool, Error>;

    /// Delete consumed codes and codes that expired before `before`.
    async fn cleanup(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}
