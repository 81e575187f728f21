//! Repository trait for the refresh token registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, storage::RefreshEntry, subject::SubjectId};

/// Per-subject set of refresh token ids that may still be exchanged.
///
/// A subject can hold many entries, one per device or session.
#[async_trait]
pub trait RefreshRegistryRepository: Send + Sync + 'static {
    async fn register(&self, entry: RefreshEntry) -> Result<(), Error>;

    async fn contains(&self, subject_id: &SubjectId, jti: &str) -> Result<bool, Error>;

    /// Remove one entry atomically. Of two concurrent removals of the same id
    /// exactly one returns `true`.
    async fn remove(&self, subject_id: &SubjectId, jti: &str) -> Result<bool, Error>;

    async fn list_for(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error>;

    /// Remove and return every entry for the subject.
    async fn clear_subject(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error>;

    /// Drop entries whose token expired at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}
