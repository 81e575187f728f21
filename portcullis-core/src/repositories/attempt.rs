//! Repository trait for the authentication attempt ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{AttemptRecord, Identity, NewAttempt},
};

/// Append-only log of authentication attempts.
///
/// Records are matched to an identity by email *or* document, so a failure
/// against either login key counts towards the same subject.
///
/// # Security Considerations
///
/// - Attempts must be recorded for identities that do not exist, otherwise the
///   ledger itself reveals which accounts are real.
/// - IP addresses and user agents stored for auditing may be subject to data
///   retention regulations; see [`AttemptRepository::cleanup_before`].
#[async_trait]
pub trait AttemptRepository: Send + Sync + 'static {
    /// Append an attempt and return it with its assigned id.
    async fn record(&self, attempt: NewAttempt) -> Result<AttemptRecord, Error>;

    /// Timestamp of the most recent successful attempt for the identity.
    async fn last_success_at(&self, identity: &Identity)
    -> Result<Option<DateTime<Utc>>, Error>;

    /// Count failure outcomes (`bad_credential`, `bad_identity`) for the
    /// identity with `attempted_at >= since`.
    async fn count_failures_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<u32, Error>;

    /// Most recent attempts for the identity, newest first.
    async fn find_recent(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<Vec<AttemptRecord>, Error>;

    /// Delete attempts older than `before`. Returns the number removed.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}
