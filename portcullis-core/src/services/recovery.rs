//! One-time numeric recovery codes.
//!
//! Codes are four digits, so the keyspace alone is no protection. What keeps
//! guessing infeasible is the per-code attempt cap combined with a short TTL:
//! a code that has taken `max_attempts` wrong guesses is burned.
//!
//! Only a salted SHA-256 of the code is stored.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    Error,
    clock::Clock,
    config::Settings,
    crypto::{generate_recovery_code, hash_code, verify_code_hash},
    error::RecoveryError,
    id::{RECOVERY_CODE_PREFIX, generate_prefixed_id},
    repositories::RecoveryCodeRepository,
    storage::{NewRecoveryCode, Origin},
    validation::validate_purpose,
};

/// Purpose tag for codes that authorize a password reset.
pub const PASSWORD_RESET_PURPOSE: &str = "password-reset";

/// A freshly issued code. The plaintext never leaves this value.
#[derive(Clone)]
pub struct IssuedRecoveryCode {
    pub id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedRecoveryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedRecoveryCode")
            .field("id", &self.id)
            .field("code", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryValidation {
    pub code_id: String,
    /// Attempts that were left before the successful guess.
    pub attempts_remaining: u32,
}

pub struct RecoveryCodeService<R: RecoveryCodeRepository> {
    codes: Arc<R>,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl<R: RecoveryCodeRepository> RecoveryCodeService<R> {
    pub fn new(codes: Arc<R>, settings: Settings, clock: Arc<dyn Clock>) -> Self {
        Self {
            codes,
            settings,
            clock,
        }
    }

    /// Issue a new code for (`identity`, `purpose`), superseding any pending one.
    pub async fn issue(
        &self,
        identity: &str,
        purpose: &str,
        origin: &Origin,
    ) -> Result<IssuedRecoveryCode, Error> {
        validate_purpose(purpose)?;

        let id = generate_prefixed_id(RECOVERY_CODE_PREFIX);
        let code = generate_recovery_code();
        let now = self.clock.now();

        let stored = self
            .codes
            .replace_pending(NewRecoveryCode {
                id: id.clone(),
                identity: identity.trim().to_string(),
                purpose: purpose.to_string(),
                code_hash: hash_code(&id, &code),
                created_at: now,
                expires_at: now + self.settings.recovery_code_ttl(),
                max_attempts: self.settings.recovery_max_attempts(),
            })
            .await?;

        tracing::info!(
            code_id = %stored.id,
            purpose,
            ip = origin.key(),
            expires_at = %stored.expires_at,
            "Recovery code issued"
        );

        Ok(IssuedRecoveryCode {
            id: stored.id,
            code,
            expires_at: stored.expires_at,
        })
    }

    /// Check `supplied` against the pending code for (`identity`, `purpose`).
    ///
    /// Each call uses one attempt. A correct guess on the last allowed
    /// attempt still succeeds; a wrong one burns the code.
    pub async fn validate(
        &self,
        identity: &str,
        purpose: &str,
        supplied: &str,
    ) -> Result<RecoveryValidation, Error> {
        let now = self.clock.now();
        let invalid = || RecoveryError::CodeInvalidOrExpired {
            attempts_remaining: None,
        };

        let Some(pending) = self
            .codes
            .find_unconsumed(identity.trim(), purpose)
            .await?
        else {
            return Err(invalid().into());
        };
        if pending.is_expired(now) {
            return Err(invalid().into());
        }

        // Increment is conditional in storage, so two concurrent guesses can
        // never both spend the same attempt.
        let Some(code) = self.codes.register_attempt(&pending.id, now).await? else {
            return Err(invalid().into());
        };

        if verify_code_hash(&code.id, supplied, &code.code_hash) {
            if !self.codes.consume(&code.id).await? {
                return Err(invalid().into());
            }
            tracing::info!(code_id = %code.id, purpose, "Recovery code accepted");
            return Ok(RecoveryValidation {
                code_id: code.id,
                attempts_remaining: code.max_attempts - (code.attempts_used - 1),
            });
        }

        if code.attempts_used >= code.max_attempts {
            self.codes.consume(&code.id).await?;
            tracing::warn!(code_id = %code.id, purpose, "Recovery code burned after too many attempts");
            return Err(RecoveryError::CodeAttemptsExceeded.into());
        }

        Err(RecoveryError::CodeInvalidOrExpired {
            attempts_remaining: Some(code.attempts_remaining()),
        }
        .into())
    }

    /// Remove consumed codes and codes that expired before `before`.
    pub async fn cleanup_expired(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.codes.cleanup(before).await
    }
}
