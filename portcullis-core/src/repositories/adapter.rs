use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    repositories::{
        AttemptRepository, LockoutRepository, RecoveryCodeRepository, RefreshRegistryRepository,
        RepositoryProvider, RevocationRepository, SubjectRepository,
    },
    storage::{
        AttemptRecord, Identity, Lockout, LockoutScope, NewAttempt, NewLockout, NewRecoveryCode,
        RecoveryCode, RefreshEntry, RevokedToken,
    },
    subject::{NewSubject, Subject, SubjectId},
};

/// Adapter that wraps a RepositoryProvider and implements SubjectRepository
pub struct SubjectRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> SubjectRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> SubjectRepository for SubjectRepositoryAdapter<R> {
    async fn create(&self, subject: NewSubject) -> Result<Subject, Error> {
        self.provider.subject().create(subject).await
    }

    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, Error> {
        self.provider.subject().find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>, Error> {
        self.provider.subject().find_by_email(email).await
    }

    async fn find_by_document(&self, document: &str) -> Result<Option<Subject>, Error> {
        self.provider.subject().find_by_document(document).await
    }

    async fn get_password_hash(&self, id: &SubjectId) -> Result<Option<String>, Error> {
        self.provider.subject().get_password_hash(id).await
    }

    async fn set_password_hash(&self, id: &SubjectId, hash: &str) -> Result<(), Error> {
        self.provider.subject().set_password_hash(id, hash).await
    }

    async fn set_active(&self, id: &SubjectId, active: bool) -> Result<(), Error> {
        self.provider.subject().set_active(id, active).await
    }

    async fn increment_token_version(&self, id: &SubjectId) -> Result<u64, Error> {
        self.provider.subject().increment_token_version(id).await
    }
}

pub struct AttemptRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> AttemptRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AttemptRepository for AttemptRepositoryAdapter<R> {
    async fn record(&self, attempt: NewAttempt) -> Result<AttemptRecord, Error> {
        self.provider.attempt().record(attempt).await
    }

    async fn last_success_at(
        &self,
        identity: &Identity,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        self.provider.attempt().last_success_at(identity).await
    }

    async fn count_failures_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        self.provider
            .attempt()
            .count_failures_since(identity, since)
            .await
    }

    async fn find_recent(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<Vec<AttemptRecord>, Error> {
        self.provider.attempt().find_recent(identity, limit).await
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.attempt().cleanup_before(before).await
    }
}

pub struct LockoutRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> LockoutRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> LockoutRepository for LockoutRepositoryAdapter<R> {
    async fn upsert(&self, lockout: NewLockout) -> Result<Lockout, Error> {
        self.provider.lockout().upsert(lockout).await
    }

    async fn find(&self, scope: LockoutScope, value: &str) -> Result<Option<Lockout>, Error> {
        self.provider.lockout().find(scope, value).await
    }

    async fn delete(&self, scope: LockoutScope, value: &str) -> Result<bool, Error> {
        self.provider.lockout().delete(scope, value).await
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.lockout().cleanup_expired(now).await
    }
}

pub struct RecoveryCodeRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> RecoveryCodeRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> RecoveryCodeRepository for RecoveryCodeRepositoryAdapter<R> {
    async fn replace_pending(&self, code: NewRecoveryCode) -> Result<RecoveryCode, Error> {
        self.provider.recovery_code().replace_pending(code).await
    }

    async fn find_unconsumed(
        &self,
        identity: &str,
        purpose: &str,
    ) -> Result<Option<RecoveryCode>, Error> {
        self.provider
            .recovery_code()
            .find_unconsumed(identity, purpose)
            .await
    }

    async fn register_attempt(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RecoveryCode>, Error> {
        self.provider.recovery_code().register_attempt(id, now).await
    }

    async fn consume(&self, id: &str) -> Result<bool, Error> {
        self.provider.recovery_code().consume(id).await
    }

    async fn cleanup(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.recovery_code().cleanup(before).await
    }
}

pub struct RevocationRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> RevocationRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> RevocationRepository for RevocationRepositoryAdapter<R> {
    async fn revoke(&self, entry: RevokedToken) -> Result<bool, Error> {
        self.provider.revocation().revoke(entry).await
    }

    async fn find(&self, jti: &str) -> Result<Option<RevokedToken>, Error> {
        self.provider.revocation().find(jti).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.revocation().purge_expired(now).await
    }
}

pub struct RefreshRegistryRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> RefreshRegistryRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> RefreshRegistryRepository for RefreshRegistryRepositoryAdapter<R> {
    async fn register(&self, entry: RefreshEntry) -> Result<(), Error> {
        self.provider.refresh_registry().register(entry).await
    }

    async fn contains(&self, subject_id: &SubjectId, jti: &str) -> Result<bool, Error> {
        self.provider.refresh_registry().contains(subject_id, jti).await
    }

    async fn remove(&self, subject_id: &SubjectId, jti: &str) -> Result<bool, Error> {
        self.provider.refresh_registry().remove(subject_id, jti).await
    }

    async fn list_for(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error> {
        self.provider.refresh_registry().list_for(subject_id).await
    }

    async fn clear_subject(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error> {
        self.provider.refresh_registry().clear_subject(subject_id).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.refresh_registry().purge_expired(now).await
    }
}
