//! Persisted record shapes shared by every storage backend.
//!
//! All timestamps are UTC. Backends may store them at millisecond precision.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::ValidationError, subject::SubjectId};

/// Outcome of a single authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    BadCredential,
    BadIdentity,
    AccountLocked,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::BadCredential => "bad_credential",
            AttemptOutcome::BadIdentity => "bad_identity",
            AttemptOutcome::AccountLocked => "account_locked",
        }
    }

    /// Outcomes that count towards an automatic lockout.
    ///
    /// Attempts rejected because the account was already locked do not extend
    /// the lockout.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::BadCredential | AttemptOutcome::BadIdentity
        )
    }
}

impl FromStr for AttemptOutcome {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptOutcome::Success),
            "bad_credential" => Ok(AttemptOutcome::BadCredential),
            "bad_identity" => Ok(AttemptOutcome::BadIdentity),
            "account_locked" => Ok(AttemptOutcome::AccountLocked),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown attempt outcome: {other}"
            ))),
        }
    }
}

/// The identity an attempt was made against. Either key may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: Option<String>,
    pub document: Option<String>,
}

impl Identity {
    pub fn new(email: Option<&str>, document: Option<&str>) -> Self {
        Self {
            email: email
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty()),
            document: document
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        }
    }

    pub fn email(email: &str) -> Self {
        Self::new(Some(email), None)
    }

    pub fn document(document: &str) -> Self {
        Self::new(None, Some(document))
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.document.is_none()
    }

    /// Identity-scoped lockout keys, email first.
    pub fn lockout_keys(&self) -> Vec<(LockoutScope, &str)> {
        let mut keys = Vec::with_capacity(2);
        if let Some(email) = &self.email {
            keys.push((LockoutScope::Email, email.as_str()));
        }
        if let Some(document) = &self.document {
            keys.push((LockoutScope::Document, document.as_str()));
        }
        keys
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Origin {
    pub fn new(ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        }
    }

    pub fn ip(ip_address: &str) -> Self {
        Self::new(Some(ip_address), None)
    }

    /// Key used for origin-scoped lockouts and rate-limit windows.
    pub fn key(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub identity: Identity,
    pub origin: Origin,
    pub outcome: AttemptOutcome,
    pub detail: serde_json::Value,
    pub attempted_at: DateTime<Utc>,
}

/// An append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: i64,
    pub email: Option<String>,
    pub document: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: AttemptOutcome,
    pub detail: serde_json::Value,
    pub attempted_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// Whether this record was made against `identity`, by email or document.
    pub fn matches(&self, identity: &Identity) -> bool {
        let by_email = identity.email.is_some() && self.email == identity.email;
        let by_document = identity.document.is_some() && self.document == identity.document;
        by_email || by_document
    }
}

/// Dimension a lockout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutScope {
    Email,
    Document,
    Origin,
}

impl LockoutScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockoutScope::Email => "email",
            LockoutScope::Document => "document",
            LockoutScope::Origin => "origin",
        }
    }
}

impl FromStr for LockoutScope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(LockoutScope::Email),
            "document" => Ok(LockoutScope::Document),
            "origin" => Ok(LockoutScope::Origin),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown lockout scope: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewLockout {
    pub scope: LockoutScope,
    pub value: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// `None` locks until an explicit unlock.
    pub expires_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockout {
    pub scope: LockoutScope,
    pub value: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
}

impl Lockout {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }

    /// Time left until the lockout lapses; `None` when indefinite.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| (expires_at - now).max(Duration::zero()))
    }

    /// Merge a new lockout for the same key into this one.
    ///
    /// An expired row is replaced outright. An active row keeps its creation
    /// time and is only ever lengthened; an indefinite row stays indefinite.
    pub fn merge(&self, new: &NewLockout) -> Lockout {
        if !self.is_active(new.created_at) {
            return Lockout::from(new.clone());
        }

        let expires_at = match (self.expires_at, new.expires_at) {
            (Some(current), Some(proposed)) => Some(current.max(proposed)),
            _ => None,
        };
        let reason = if self.expires_at.is_none() {
            self.reason.clone()
        } else {
            new.reason.clone()
        };

        Lockout {
            scope: self.scope,
            value: self.value.clone(),
            reason,
            created_at: self.created_at,
            expires_at,
            attempt_count: self.attempt_count.max(new.attempt_count),
        }
    }
}

impl From<NewLockout> for Lockout {
    fn from(new: NewLockout) -> Self {
        Lockout {
            scope: new.scope,
            value: new.value,
            reason: new.reason,
            created_at: new.created_at,
            expires_at: new.expires_at,
            attempt_count: new.attempt_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRecoveryCode {
    pub id: String,
    pub identity: String,
    pub purpose: String,
    pub code_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub id: String,
    pub identity: String,
    pub purpose: String,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub attempts_used: u32,
    pub max_attempts: u32,
}

impl RecoveryCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Not consumed, not expired, and with guesses left.
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && !self.is_expired(now) && self.attempts_used < self.max_attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_used)
    }
}

impl From<NewRecoveryCode> for RecoveryCode {
    fn from(new: NewRecoveryCode) -> Self {
        RecoveryCode {
            id: new.id,
            identity: new.identity,
            purpose: new.purpose,
            code_hash: new.code_hash,
            created_at: new.created_at,
            expires_at: new.expires_at,
            consumed: false,
            attempts_used: 0,
            max_attempts: new.max_attempts,
        }
    }
}

/// Why a token id was placed on the revocation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Logout,
    Rotated,
    SubjectRevoked,
    ResetRedeemed,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Logout => "logout",
            RevocationReason::Rotated => "rotated",
            RevocationReason::SubjectRevoked => "subject_revoked",
            RevocationReason::ResetRedeemed => "reset_redeemed",
        }
    }
}

impl FromStr for RevocationReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logout" => Ok(RevocationReason::Logout),
            "rotated" => Ok(RevocationReason::Rotated),
            "subject_revoked" => Ok(RevocationReason::SubjectRevoked),
            "reset_redeemed" => Ok(RevocationReason::ResetRedeemed),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown revocation reason: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedToken {
    pub jti: String,
    pub subject_id: SubjectId,
    pub reason: RevocationReason,
    pub revoked_at: DateTime<Utc>,
    /// Natural expiry of the token; the entry is useless after this.
    pub expires_at: DateTime<Utc>,
}

/// A refresh token id that is currently allowed to be exchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshEntry {
    pub jti: String,
    pub subject_id: SubjectId,
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
