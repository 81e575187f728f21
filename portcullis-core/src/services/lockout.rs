//! Attempt ledger and lockout decisions.
//!
//! Every authentication attempt is appended to the ledger. Once an identity
//! accumulates enough failures inside the configured window, lockouts are
//! written for its email and document keys. Lockouts lapse on their own: a row
//! whose `expires_at` has passed is treated as inactive on read and removed by
//! the periodic sweep.
//!
//! # Example
//!
//! ```rust,ignore
//! use portcullis_core::services::LockoutService;
//!
//! service.ensure_not_locked(&identity, &origin).await?;
//!
//! if !password_ok {
//!     let status = service
//!         .register_failure(&identity, &origin, AttemptOutcome::BadCredential, json!({}))
//!         .await?;
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    Error,
    clock::Clock,
    config::Settings,
    error::AuthError,
    repositories::{AttemptRepository, LockoutRepository},
    services::notification::NotificationService,
    storage::{
        AttemptOutcome, AttemptRecord, Identity, Lockout, LockoutScope, NewAttempt, NewLockout,
        Origin,
    },
};

/// Reason written on lockouts created by the failure threshold.
pub const AUTOMATIC_LOCKOUT_REASON: &str = "too_many_failures";

/// Result of registering a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureStatus {
    /// Failures counted inside the window, including this one.
    pub failed_attempts: u32,
    /// Lockouts created or extended by this failure.
    pub lockouts: Vec<Lockout>,
}

impl FailureStatus {
    pub fn is_locked(&self) -> bool {
        !self.lockouts.is_empty()
    }
}

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockoutSweep {
    pub lockouts: u64,
    pub attempts: u64,
}

/// Service for attempt tracking and account lockout.
///
/// Thresholds come from [`Settings`] on every call, so a changed config value
/// takes effect on the next attempt.
pub struct LockoutService<A: AttemptRepository, L: LockoutRepository> {
    attempts: Arc<A>,
    lockouts: Arc<L>,
    settings: Settings,
    clock: Arc<dyn Clock>,
    notifications: NotificationService,
}

impl<A: AttemptRepository, L: LockoutRepository> Clone for LockoutService<A, L> {
    fn clone(&self) -> Self {
        Self {
            attempts: Arc::clone(&self.attempts),
            lockouts: Arc::clone(&self.lockouts),
            settings: self.settings.clone(),
            clock: Arc::clone(&self.clock),
            notifications: self.notifications.clone(),
        }
    }
}

impl<A: AttemptRepository, L: LockoutRepository> LockoutService<A, L> {
    pub fn new(
        attempts: Arc<A>,
        lockouts: Arc<L>,
        settings: Settings,
        clock: Arc<dyn Clock>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            attempts,
            lockouts,
            settings,
            clock,
            notifications,
        }
    }

    /// Append an attempt to the ledger.
    ///
    /// Persistence is best effort: a storage failure is logged and `None` is
    /// returned so the caller's flow carries on.
    pub async fn record_attempt(
        &self,
        identity: &Identity,
        origin: &Origin,
        outcome: AttemptOutcome,
        detail: serde_json::Value,
    ) -> Option<AttemptRecord> {
        let attempt = NewAttempt {
            identity: identity.clone(),
            origin: origin.clone(),
            outcome,
            detail,
            attempted_at: self.clock.now(),
        };

        match self.attempts.record(attempt).await {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    outcome = outcome.as_str(),
                    ip = origin.key(),
                    "Failed to record authentication attempt"
                );
                None
            }
        }
    }

    /// Failures for `identity` inside the trailing `window`.
    ///
    /// Failures older than the identity's latest successful attempt are not
    /// counted.
    pub async fn count_recent_failures(
        &self,
        identity: &Identity,
        window: Duration,
    ) -> Result<u32, Error> {
        if identity.is_empty() {
            return Ok(0);
        }

        let mut since = self.clock.now() - window;
        if let Some(last_success) = self.attempts.last_success_at(identity).await? {
            since = since.max(last_success + Duration::milliseconds(1));
        }

        self.attempts.count_failures_since(identity, since).await
    }

    /// First active lockout matching the identity's email, its document, or the
    /// origin address.
    pub async fn check_active_lockout(
        &self,
        identity: &Identity,
        origin: &Origin,
    ) -> Result<Option<Lockout>, Error> {
        let now = self.clock.now();

        let mut keys = identity.lockout_keys();
        if let Some(ip) = origin.ip_address.as_deref() {
            keys.push((LockoutScope::Origin, ip));
        }

        for (scope, value) in keys {
            if let Some(lockout) = self.lockouts.find(scope, value).await?
                && lockout.is_active(now)
            {
                return Ok(Some(lockout));
            }
        }

        Ok(None)
    }

    /// Fails with [`AuthError::AccountLocked`] while any matching lockout is active.
    pub async fn ensure_not_locked(&self, identity: &Identity, origin: &Origin) -> Result<(), Error> {
        match self.check_active_lockout(identity, origin).await? {
            Some(lockout) => Err(AuthError::AccountLocked {
                retry_after: lockout.retry_after(self.clock.now()),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Lock the identity's email and document keys for the configured
    /// duration. The origin is never locked here so a shared network address
    /// does not block unrelated users.
    pub async fn create_automatic_lockout(
        &self,
        identity: &Identity,
        origin: &Origin,
        failure_count: u32,
    ) -> Result<Vec<Lockout>, Error> {
        let now = self.clock.now();
        let expires_at = now + self.settings.lockout_duration();

        let mut created = Vec::new();
        for (scope, value) in identity.lockout_keys() {
            let lockout = self
                .lockouts
                .upsert(NewLockout {
                    scope,
                    value: value.to_string(),
                    reason: AUTOMATIC_LOCKOUT_REASON.to_string(),
                    created_at: now,
                    expires_at: Some(expires_at),
                    attempt_count: failure_count,
                })
                .await?;
            created.push(lockout);
        }

        tracing::warn!(
            email = identity.email.as_deref(),
            document = identity.document.as_deref(),
            ip = origin.key(),
            failures = failure_count,
            "Identity locked after repeated failures"
        );

        if let Some(email) = &identity.email {
            let until = created.first().and_then(|l| l.expires_at);
            self.notifications.account_locked(email, until);
        }

        Ok(created)
    }

    /// Record a failed attempt and lock the identity once the threshold is
    /// reached inside the window.
    pub async fn register_failure(
        &self,
        identity: &Identity,
        origin: &Origin,
        outcome: AttemptOutcome,
        detail: serde_json::Value,
    ) -> Result<FailureStatus, Error> {
        self.record_attempt(identity, origin, outcome, detail).await;

        let failed_attempts = self
            .count_recent_failures(identity, self.settings.lockout_window())
            .await?;

        let lockouts = if failed_attempts >= self.settings.lockout_max_attempts() {
            self.create_automatic_lockout(identity, origin, failed_attempts)
                .await?
        } else {
            Vec::new()
        };

        Ok(FailureStatus {
            failed_attempts,
            lockouts,
        })
    }

    pub async fn register_success(&self, identity: &Identity, origin: &Origin) {
        self.record_attempt(
            identity,
            origin,
            AttemptOutcome::Success,
            serde_json::json!({}),
        )
        .await;
    }

    /// Administrative lock. `duration` of `None` locks until [`Self::unlock`].
    pub async fn lock(
        &self,
        scope: LockoutScope,
        value: &str,
        reason: &str,
        duration: Option<Duration>,
    ) -> Result<Lockout, Error> {
        let now = self.clock.now();
        let value = normalize_value(scope, value);

        let lockout = self
            .lockouts
            .upsert(NewLockout {
                scope,
                value,
                reason: reason.to_string(),
                created_at: now,
                expires_at: duration.map(|d| now + d),
                attempt_count: 0,
            })
            .await?;

        tracing::info!(
            scope = scope.as_str(),
            value = %lockout.value,
            reason,
            expires_at = ?lockout.expires_at,
            "Lockout applied"
        );
        Ok(lockout)
    }

    /// Returns `true` if a lockout row was removed.
    pub async fn unlock(&self, scope: LockoutScope, value: &str) -> Result<bool, Error> {
        let value = normalize_value(scope, value);
        let removed = self.lockouts.delete(scope, &value).await?;
        if removed {
            tracing::info!(scope = scope.as_str(), value = %value, "Lockout lifted");
        }
        Ok(removed)
    }

    /// Lift every identity-scoped lockout for `identity`.
    pub async fn unlock_identity(&self, identity: &Identity) -> Result<u32, Error> {
        let mut removed = 0;
        for (scope, value) in identity.lockout_keys() {
            if self.unlock(scope, value).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Most recent ledger entries for an identity, newest first.
    pub async fn recent_attempts(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<Vec<AttemptRecord>, Error> {
        self.attempts.find_recent(identity, limit).await
    }

    /// Delete expired lockouts and ledger rows past the retention period.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<LockoutSweep, Error> {
        let lockouts = self.lockouts.cleanup_expired(now).await?;
        let attempts = self
            .attempts
            .cleanup_before(now - self.settings.attempt_retention())
            .await?;
        Ok(LockoutSweep { lockouts, attempts })
    }

    /// Start the background cleanup task.
    ///
    /// Runs [`Self::sweep`] hourly until `shutdown` changes.
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let service = self.clone();

        // Cleanup runs hourly
        const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(CLEANUP_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match service.sweep(service.clock.now()).await {
                            Ok(swept) if swept != LockoutSweep::default() => {
                                tracing::info!(
                                    lockouts = swept.lockouts,
                                    attempts = swept.attempts,
                                    "Cleaned up expired lockouts and attempt records"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to clean up lockout records");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down lockout cleanup task");
                        break;
                    }
                }
            }
        })
    }
}

fn normalize_value(scope: LockoutScope, value: &str) -> String {
    match scope {
        LockoutScope::Email => value.trim().to_lowercase(),
        LockoutScope::Document | LockoutScope::Origin => value.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        memory::{MemoryAttemptRepository, MemoryLockoutRepository},
        services::notification::TracingNotifier,
    };
    use serde_json::json;

    struct Harness {
        clock: Arc<ManualClock>,
        attempts: Arc<MemoryAttemptRepository>,
        service: LockoutService<MemoryAttemptRepository, MemoryLockoutRepository>,
    }

    fn harness() -> Harness {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let clock = Arc::new(ManualClock::starting_now());
        let attempts = Arc::new(MemoryAttemptRepository::default());
        let service = LockoutService::new(
            attempts.clone(),
            Arc::new(MemoryLockoutRepository::default()),
            Settings::default(),
            clock.clone(),
            NotificationService::new(Arc::new(TracingNotifier)),
        );
        Harness {
            clock,
            attempts,
            service,
        }
    }

    fn identity() -> Identity {
        Identity::new(Some("a@x.com"), Some("12345678"))
    }

    fn origin() -> Origin {
        Origin::ip("10.0.0.1")
    }

    async fn fail(h: &Harness, identity: &Identity) -> FailureStatus {
        h.service
            .register_failure(identity, &origin(), AttemptOutcome::BadCredential, json!({}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_failure_not_locked() {
        let h = harness();
        let status = fail(&h, &identity()).await;

        assert_eq!(status.failed_attempts, 1);
        assert!(!status.is_locked());
        assert!(
            h.service
                .check_active_lockout(&identity(), &origin())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_threshold_locks_email_and_document_but_not_origin() {
        let h = harness();
        for _ in 0..2 {
            assert!(!fail(&h, &identity()).await.is_locked());
        }

        let status = fail(&h, &identity()).await;
        assert_eq!(status.failed_attempts, 3);
        let scopes: Vec<_> = status.lockouts.iter().map(|l| l.scope).collect();
        assert_eq!(scopes, vec![LockoutScope::Email, LockoutScope::Document]);

        let by_email = Identity::email("a@x.com");
        let by_document = Identity::document("12345678");
        let elsewhere = Origin::ip("192.168.0.9");
        assert!(h.service.check_active_lockout(&by_email, &elsewhere).await.unwrap().is_some());
        assert!(h.service.check_active_lockout(&by_document, &elsewhere).await.unwrap().is_some());

        // Another identity behind the same address is unaffected.
        let other = Identity::email("b@x.com");
        assert!(h.service.check_active_lockout(&other, &origin()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lockout_reports_retry_after() {
        let h = harness();
        for _ in 0..3 {
            fail(&h, &identity()).await;
        }
        h.clock.advance(Duration::minutes(5));

        let err = h
            .service
            .ensure_not_locked(&identity(), &origin())
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::minutes(10)));
    }

    #[tokio::test]
    async fn test_lockout_lapses_without_unlock() {
        let h = harness();
        for _ in 0..3 {
            fail(&h, &identity()).await;
        }

        h.clock.advance(Duration::minutes(15));
        assert!(
            h.service
                .check_active_lockout(&identity(), &origin())
                .await
                .unwrap()
                .is_none()
        );
        assert!(h.service.ensure_not_locked(&identity(), &origin()).await.is_ok());
    }

    #[tokio::test]
    async fn test_failures_outside_window_do_not_count() {
        let h = harness();
        fail(&h, &identity()).await;
        fail(&h, &identity()).await;

        h.clock.advance(Duration::minutes(16));
        let status = fail(&h, &identity()).await;
        assert_eq!(status.failed_attempts, 1);
        assert!(!status.is_locked());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let h = harness();
        fail(&h, &identity()).await;
        fail(&h, &identity()).await;

        h.clock.advance(Duration::seconds(1));
        h.service.register_success(&identity(), &origin()).await;
        h.clock.advance(Duration::seconds(1));

        let status = fail(&h, &identity()).await;
        assert_eq!(status.failed_attempts, 1);
    }

    #[tokio::test]
    async fn test_threshold_is_read_on_every_call() {
        let config = Arc::new(crate::config::StaticConfig::new());
        let clock = Arc::new(ManualClock::starting_now());
        let service = LockoutService::new(
            Arc::new(MemoryAttemptRepository::default()),
            Arc::new(MemoryLockoutRepository::default()),
            Settings::new(config.clone()),
            clock,
            NotificationService::new(Arc::new(TracingNotifier)),
        );

        config.set(crate::config::keys::LOCKOUT_MAX_ATTEMPTS, 1);
        let status = service
            .register_failure(&identity(), &origin(), AttemptOutcome::BadIdentity, json!({}))
            .await
            .unwrap();
        assert!(status.is_locked());
    }

    #[tokio::test]
    async fn test_locked_attempts_do_not_extend_count() {
        let h = harness();
        h.service
            .record_attempt(&identity(), &origin(), AttemptOutcome::AccountLocked, json!({}))
            .await;

        let count = h
            .service
            .count_recent_failures(&identity(), Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_manual_lock_and_unlock() {
        let h = harness();
        let lockout = h
            .service
            .lock(LockoutScope::Origin, "10.0.0.1", "abuse", None)
            .await
            .unwrap();
        assert_eq!(lockout.expires_at, None);

        h.clock.advance(Duration::days(30));
        let err = h
            .service
            .ensure_not_locked(&Identity::email("c@x.com"), &origin())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Auth(AuthError::AccountLocked { retry_after: None })
        ));

        assert!(h.service.unlock(LockoutScope::Origin, "10.0.0.1").await.unwrap());
        assert!(!h.service.unlock(LockoutScope::Origin, "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_automatic_lockout_keeps_indefinite_manual_lock() {
        let h = harness();
        h.service
            .lock(LockoutScope::Email, "A@X.com", "fraud", None)
            .await
            .unwrap();

        let status = {
            fail(&h, &identity()).await;
            fail(&h, &identity()).await;
            fail(&h, &identity()).await
        };
        let email_lock = status
            .lockouts
            .iter()
            .find(|l| l.scope == LockoutScope::Email)
            .unwrap();
        assert_eq!(email_lock.expires_at, None);
        assert_eq!(email_lock.reason, "fraud");
    }

    #[tokio::test]
    async fn test_unlock_identity_lifts_both_keys() {
        let h = harness();
        for _ in 0..3 {
            fail(&h, &identity()).await;
        }

        assert_eq!(h.service.unlock_identity(&identity()).await.unwrap(), 2);
        assert!(h.service.ensure_not_locked(&identity(), &origin()).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_lockouts_and_old_attempts() {
        let h = harness();
        for _ in 0..3 {
            fail(&h, &identity()).await;
        }
        assert_eq!(h.attempts.find_recent(&identity(), 10).await.unwrap().len(), 3);

        h.clock.advance(Duration::days(31));
        let swept = h.service.sweep(h.clock.now()).await.unwrap();
        assert_eq!(swept.lockouts, 2);
        assert_eq!(swept.attempts, 3);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let h = harness();
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = h.service.start_cleanup_task(rx);

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
