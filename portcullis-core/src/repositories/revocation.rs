//! Repository trait for the token revocation list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, storage::RevokedToken};

/// Set of token ids that must never validate again.
///
/// Entries only need to outlive the natural expiry of their token.
#[async_trait]
pub trait RevocationRepository: Send + Sync + 'static {
    /// Add an entry atomically. Returns `false`, keeping the first entry, if
    /// the id was already revoked.
    async fn revoke(&self, entry: RevokedToken) -> Result<bool, Error>;

    async fn find(&self, jti: &str) -> Result<Option<RevokedToken>, Error>;

    async fn is_revoked(&self, jti: &str) -> Result<bool, Error> {
        Ok(self.find(jti).await?.is_some())
    }

    /// Drop entries whose token expired at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}
