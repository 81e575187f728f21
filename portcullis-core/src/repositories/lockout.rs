//! Repository trait for lockout records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{Lockout, LockoutScope, NewLockout},
};

/// Storage for lockouts, at most one row per `(scope, value)`.
///
/// Expired rows may linger until [`LockoutRepository::cleanup_expired`] runs;
/// callers decide activity with [`Lockout::is_active`].
#[async_trait]
pub trait LockoutRepository: Send + Sync + 'static {
    /// Insert a lockout or merge it into the existing row for the same key.
    ///
    /// Must be atomic per key and follow [`Lockout::merge`]: an expired row is
    /// replaced, an active row is only ever lengthened, and an indefinite row
    /// stays indefinite. Returns the stored row.
    async fn upsert(&self, lockout: NewLockout) -> Result<Lockout, Error>;

    /// Fetch the row for a key regardless of expiry.
    async fn find(&self, scope: LockoutScope, value: &str) -> Result<Option<Lockout>, Error>;

    /// Remove the row for a key. Returns whether a row existed.
    async fn delete(&self, scope: LockoutScope, value: &str) -> Result<bool, Error>;

    /// Delete rows whose `expires_at` is at or before `now`. Indefinite rows are kept.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}
