//! In-memory backing for every repository
//!
//! Each store is a [`DashMap`]; per-key read-modify-write happens under the
//! shard lock held by `entry`/`get_mut`, so concurrent updates to one key are
//! serialized. Nothing survives a restart. Use the SQLite backend when lockout
//! and throttling state must be durable.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    Error,
    clock::{Clock, SystemClock},
    error::StorageError,
    repositories::{
        AttemptRepository, AttemptRepositoryProvider, LockoutRepository,
        LockoutRepositoryProvider, RecoveryCodeRepository, RecoveryCodeRepositoryProvider,
        RefreshRegistryRepository, RefreshRegistryRepositoryProvider, RepositoryProvider,
        RevocationRepository, RevocationRepositoryProvider, SubjectRepository,
        SubjectRepositoryProvider,
    },
    storage::{
        AttemptOutcome, AttemptRecord, Identity, Lockout, LockoutScope, NewAttempt, NewLockout,
        NewRecoveryCode, RecoveryCode, RefreshEntry, RevokedToken,
    },
    subject::{NewSubject, Subject, SubjectId},
};

#[derive(Debug, Clone)]
struct StoredSubject {
    subject: Subject,
    password_hash: Option<String>,
}

pub struct MemorySubjectRepository {
    subjects: DashMap<SubjectId, StoredSubject>,
    by_email: DashMap<String, SubjectId>,
    by_document: DashMap<String, SubjectId>,
    clock: Arc<dyn Clock>,
}

impl Default for MemorySubjectRepository {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl fmt::Debug for MemorySubjectRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySubjectRepository")
            .field("subjects", &self.subjects.len())
            .finish_non_exhaustive()
    }
}

impl MemorySubjectRepository {
    /// Stamp `created_at`/`updated_at` from `clock` instead of wall time.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            subjects: DashMap::new(),
            by_email: DashMap::new(),
            by_document: DashMap::new(),
            clock,
        }
    }

    fn update<F>(&self, id: &SubjectId, f: F) -> Result<Subject, Error>
    where
        F: FnOnce(&mut StoredSubject),
    {
        let mut stored = self
            .subjects
            .get_mut(id)
            .ok_or(Error::Storage(StorageError::NotFound))?;
        f(&mut stored);
        stored.subject.updated_at = self.clock.now();
        Ok(stored.subject.clone())
    }
}

#[async_trait]
impl SubjectRepository for MemorySubjectRepository {
    async fn create(&self, new: NewSubject) -> Result<Subject, Error> {
        match self.by_email.entry(new.email.clone()) {
            Entry::Occupied(_) => {
                return Err(StorageError::Constraint("email already registered".to_string()).into());
            }
            Entry::Vacant(slot) => {
                slot.insert(new.id.clone());
            }
        }

        if let Some(document) = &new.document {
            match self.by_document.entry(document.clone()) {
                Entry::Occupied(_) => {
                    self.by_email.remove(&new.email);
                    return Err(
                        StorageError::Constraint("document already registered".to_string()).into(),
                    );
                }
                Entry::Vacant(slot) => {
                    slot.insert(new.id.clone());
                }
            }
        }

        let now = self.clock.now();
        let subject = Subject {
            id: new.id.clone(),
            email: new.email,
            document: new.document,
            active: true,
            token_version: 0,
            created_at: now,
            updated_at: now,
        };
        self.subjects.insert(
            new.id,
            StoredSubject {
                subject: subject.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(subject)
    }

    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, Error> {
        Ok(self.subjects.get(id).map(|s| s.subject.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>, Error> {
        let Some(id) = self.by_email.get(email).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.find_by_id(&id).await
    }

    async fn find_by_document(&self, document: &str) -> Result<Option<Subject>, Error> {
        let Some(id) = self.by_document.get(document).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.find_by_id(&id).await
    }

    async fn get_password_hash(&self, id: &SubjectId) -> Result<Option<String>, Error> {
        Ok(self
            .subjects
            .get(id)
            .and_then(|s| s.password_hash.clone()))
    }

    async fn set_password_hash(&self, id: &SubjectId, hash: &str) -> Result<(), Error> {
        self.update(id, |s| s.password_hash = Some(hash.to_string()))?;
        Ok(())
    }

    async fn set_active(&self, id: &SubjectId, active: bool) -> Result<(), Error> {
        self.update(id, |s| s.subject.active = active)?;
        Ok(())
    }

    async fn increment_token_version(&self, id: &SubjectId) -> Result<u64, Error> {
        let subject = self.update(id, |s| s.subject.token_version += 1)?;
        Ok(subject.token_version)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAttemptRepository {
    records: DashMap<i64, AttemptRecord>,
    next_id: AtomicI64,
}

#[async_trait]
impl AttemptRepository for MemoryAttemptRepository {
    async fn record(&self, attempt: NewAttempt) -> Result<AttemptRecord, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = AttemptRecord {
            id,
            email: attempt.identity.email,
            document: attempt.identity.document,
            ip_address: attempt.origin.ip_address,
            user_agent: attempt.origin.user_agent,
            outcome: attempt.outcome,
            detail: attempt.detail,
            attempted_at: attempt.attempted_at,
        };
        self.records.insert(id, record.clone());
        Ok(record)
    }

    async fn last_success_at(
        &self,
        identity: &Identity,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.outcome == AttemptOutcome::Success && r.matches(identity))
            .map(|r| r.attempted_at)
            .max())
    }

    async fn count_failures_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let count = self
            .records
            .iter()
            .filter(|r| r.outcome.is_failure() && r.attempted_at >= since && r.matches(identity))
            .count();
        Ok(count as u32)
    }

    async fn find_recent(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<Vec<AttemptRecord>, Error> {
        let mut records: Vec<AttemptRecord> = self
            .records
            .iter()
            .filter(|r| r.matches(identity))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at).then(b.id.cmp(&a.id)));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let before_len = self.records.len();
        self.records.retain(|_, r| r.attempted_at >= before);
        Ok(before_len.saturating_sub(self.records.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLockoutRepository {
    lockouts: DashMap<(LockoutScope, String), Lockout>,
}

#[async_trait]
impl LockoutRepository for MemoryLockoutRepository {
    async fn upsert(&self, lockout: NewLockout) -> Result<Lockout, Error> {
        let key = (lockout.scope, lockout.value.clone());
        let stored = match self.lockouts.entry(key) {
            Entry::Occupied(mut existing) => {
                let merged = existing.get().merge(&lockout);
                existing.insert(merged.clone());
                merged
            }
            Entry::Vacant(slot) => slot.insert(Lockout::from(lockout)).clone(),
        };
        Ok(stored)
    }

    async fn find(&self, scope: LockoutScope, value: &str) -> Result<Option<Lockout>, Error> {
        Ok(self
            .lockouts
            .get(&(scope, value.to_string()))
            .map(|l| l.clone()))
    }

    async fn delete(&self, scope: LockoutScope, value: &str) -> Result<bool, Error> {
        Ok(self.lockouts.remove(&(scope, value.to_string())).is_some())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let before_len = self.lockouts.len();
        self.lockouts.retain(|_, l| l.is_active(now));
        Ok(before_len.saturating_sub(self.lockouts.len()) as u64)
    }
}

/// Codes live in `codes` keyed by id; `pending` points each
/// `(identity, purpose)` at its unconsumed code. Locks are always taken
/// `pending` before `codes`.
#[derive(Debug, Default)]
pub struct MemoryRecoveryCodeRepository {
    codes: DashMap<String, RecoveryCode>,
    pending: DashMap<(String, String), String>,
}

#[async_trait]
impl RecoveryCodeRepository for MemoryRecoveryCodeRepository {
    async fn replace_pending(&self, new: NewRecoveryCode) -> Result<RecoveryCode, Error> {
        let key = (new.identity.clone(), new.purpose.clone());
        let code = RecoveryCode::from(new);

        match self.pending.entry(key) {
            Entry::Occupied(mut slot) => {
                if let Some(mut previous) = self.codes.get_mut(slot.get()) {
                    previous.consumed = true;
                }
                self.codes.insert(code.id.clone(), code.clone());
                slot.insert(code.id.clone());
            }
            Entry::Vacant(slot) => {
                self.codes.insert(code.id.clone(), code.clone());
                slot.insert(code.id.clone());
            }
        }

        Ok(code)
    }

    async fn find_unconsumed(
        &self,
        identity: &str,
        purpose: &str,
    ) -> Result<Option<RecoveryCode>, Error> {
        let Some(id) = self
            .pending
            .get(&(identity.to_string(), purpose.to_string()))
            .map(|id| id.clone())
        else {
            return Ok(None);
        };

        Ok(self
            .codes
            .get(&id)
            .filter(|c| !c.consumed)
            .map(|c| c.clone()))
    }

    async fn register_attempt(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RecoveryCode>, Error> {
        let Some(mut code) = self.codes.get_mut(id) else {
            return Ok(None);
        };
        if !code.is_pending(now) {
            return Ok(None);
        }
        code.attempts_used += 1;
        Ok(Some(code.clone()))
    }

    async fn consume(&self, id: &str) -> Result<bool, Error> {
        let Some(mut code) = self.codes.get_mut(id) else {
            return Ok(false);
        };
        if code.consumed {
            return Ok(false);
        }
        code.consumed = true;
        Ok(true)
    }

    async fn cleanup(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let before_len = self.codes.len();
        self.codes
            .retain(|_, c| !c.consumed && c.expires_at >= before);
        self.pending.retain(|_, id| self.codes.contains_key(id));
        Ok(before_len.saturating_sub(self.codes.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRevocationRepository {
    revoked: DashMap<String, RevokedToken>,
}

#[async_trait]
impl RevocationRepository for MemoryRevocationRepository {
    async fn revoke(&self, entry: RevokedToken) -> Result<bool, Error> {
        match self.revoked.entry(entry.jti.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
        }
    }

    async fn find(&self, jti: &str) -> Result<Option<RevokedToken>, Error> {
        Ok(self.revoked.get(jti).map(|e| e.clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let before_len = self.revoked.len();
        self.revoked.retain(|_, e| e.expires_at > now);
        Ok(before_len.saturating_sub(self.revoked.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRefreshRegistryRepository {
    entries: DashMap<SubjectId, HashMap<String, RefreshEntry>>,
}

#[async_trait]
impl RefreshRegistryRepository for MemoryRefreshRegistryRepository {
    async fn register(&self, entry: RefreshEntry) -> Result<(), Error> {
        self.entries
            .entry(entry.subject_id.clone())
            .or_default()
            .insert(entry.jti.clone(), entry);
        Ok(())
    }

    async fn contains(&self, subject_id: &SubjectId, jti: &str) -> Result<bool, Error> {
        Ok(self
            .entries
            .get(subject_id)
            .is_some_and(|set| set.contains_key(jti)))
    }

    async fn remove(&self, subject_id: &SubjectId, jti: &str) -> Result<bool, Error> {
        Ok(self
            .entries
            .get_mut(subject_id)
            .is_some_and(|mut set| set.remove(jti).is_some()))
    }

    async fn list_for(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error> {
        Ok(self
            .entries
            .get(subject_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_subject(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error> {
        Ok(self
            .entries
            .remove(subject_id)
            .map(|(_, set)| set.into_values().collect())
            .unwrap_or_default())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut removed = 0u64;
        self.entries.retain(|_, set| {
            let before_len = set.len();
            set.retain(|_, e| e.expires_at > now);
            removed += (before_len - set.len()) as u64;
            !set.is_empty()
        });
        Ok(removed)
    }
}

/// Every repository backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryRepositoryProvider {
    subject: MemorySubjectRepository,
    attempt: MemoryAttemptRepository,
    lockout: MemoryLockoutRepository,
    recovery_code: MemoryRecoveryCodeRepository,
    revocation: MemoryRevocationRepository,
    refresh_registry: MemoryRefreshRegistryRepository,
}

impl MemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`Self::new`], but subject timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            subject: MemorySubjectRepository::with_clock(clock),
            ..Self::default()
        }
    }
}

impl SubjectRepositoryProvider for MemoryRepositoryProvider {
    type SubjectRepo = MemorySubjectRepository;

    fn subject(&self) -> &Self::SubjectRepo {
        &self.subject
    }
}

impl AttemptRepositoryProvider for MemoryRepositoryProvider {
    type AttemptRepo = MemoryAttemptRepository;

    fn attempt(&self) -> &Self::AttemptRepo {
        &self.attempt
    }
}

impl LockoutRepositoryProvider for MemoryRepositoryProvider {
    type LockoutRepo = MemoryLockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo {
        &self.lockout
    }
}

impl RecoveryCodeRepositoryProvider for MemoryRepositoryProvider {
    type RecoveryCodeRepo = MemoryRecoveryCodeRepository;

    fn recovery_code(&self) -> &Self::RecoveryCodeRepo {
        &self.recovery_code
    }
}

impl RevocationRepositoryProvider for MemoryRepositoryProvider {
    type RevocationRepo = MemoryRevocationRepository;

    fn revocation(&self) -> &Self::RevocationRepo {
        &self.revocation
    }
}

impl RefreshRegistryRepositoryProvider for MemoryRepositoryProvider {
    type RefreshRegistryRepo = MemoryRefreshRegistryRepository;

    fn refresh_registry(&self) -> &Self::RefreshRegistryRepo {
        &self.refresh_registry
    }
}

#[async_trait]
impl RepositoryProvider for MemoryRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
