//! # Portcullis
//!
//! Portcullis guards the front door of a service: it decides whether a sign-in
//! attempt may proceed, locks identities that keep failing, issues short
//! numeric recovery codes, and runs the access/refresh token lifecycle.
//!
//! The building blocks live in `portcullis-core`. This crate wires them into
//! the flows an application actually calls:
//! - Password login by email or document, with automatic lockout
//! - Recovery code request and validation, followed by a single-use reset
//! - Token refresh with rotation and replay detection
//! - Logout, logout everywhere, deactivation and administrative locks
//! - A background sweeper for expired state
//!
//! ## Storage Support
//!
//! - In-memory ([`MemoryRepositoryProvider`]), for tests and single-process use
//! - SQLite (feature `sqlite`, enabled by default)
//!
//! ## Example
//!
//! ```rust,no_run
//! use portcullis::{Identity, Origin, PortcullisBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let portcullis = PortcullisBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     portcullis
//!         .register_subject("a@example.com", None, "correct horse battery")
//!         .await?;
//!
//!     let session = portcullis
//!         .login(
//!             &Identity::email("a@example.com"),
//!             "correct horse battery",
//!             &Origin::ip("203.0.113.7"),
//!         )
//!         .await?;
//!     println!("access token: {}", session.tokens.access_token);
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use chrono::Duration;
use portcullis_core::{
    error::{AuthError, RecoveryError, StorageError, ValidationError},
    repositories::{
        AttemptRepositoryAdapter, LockoutRepositoryAdapter, RecoveryCodeRepositoryAdapter,
        RefreshRegistryRepositoryAdapter, RevocationRepositoryAdapter, SubjectRepository,
        SubjectRepositoryAdapter,
    },
    services::{
        LockoutService, LockoutSweep, NotificationService, PASSWORD_RESET_PURPOSE, RateLimiter,
        RecoveryCodeService, TokenService,
        password::{hash_password, verify_password_or_dummy},
    },
};
use serde::Serialize;
use serde_json::json;
use tokio::{sync::watch, task::JoinHandle};

pub mod builder;

pub use builder::{NoStorage, PortcullisBuilder, PortcullisBuilderError, WithStorage};

/// Re-export core types from portcullis_core
///
/// These types are commonly used when working with the Portcullis API.
pub use portcullis_core::{
    AttemptOutcome, Clock, ConfigProvider, EnvConfig, Error, ErrorKind, Identity, JwtConfig,
    Lockout, LockoutScope, ManualClock, NewSubject, Origin, Settings, StaticConfig, Subject,
    SubjectId, SystemClock, TokenClaims, TokenKind, TokenPair,
    config::keys,
    memory::MemoryRepositoryProvider,
    repositories::RepositoryProvider,
    services::{IssuedRecoveryCode, Notifier, RateLimitStatus, ResetGrant, TracingNotifier},
    storage::{AttemptRecord, RefreshEntry},
};

/// Re-export storage backends
///
/// These storage implementations are available when the corresponding feature is enabled.
#[cfg(feature = "sqlite")]
pub use portcullis_storage_sqlite::{SqliteRepositoryProvider, SqliteStorage};

/// How often [`Portcullis::start_sweeper`] runs unless the builder says otherwise.
pub const DEFAULT_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

type Lockouts<R> = LockoutService<AttemptRepositoryAdapter<R>, LockoutRepositoryAdapter<R>>;
type Tokens<R> = TokenService<
    SubjectRepositoryAdapter<R>,
    RevocationRepositoryAdapter<R>,
    RefreshRegistryRepositoryAdapter<R>,
>;
type RecoveryCodes<R> = RecoveryCodeService<RecoveryCodeRepositoryAdapter<R>>;

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub subject: Subject,
    pub tokens: TokenPair,
}

/// Rows and keys removed by one [`Portcullis::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub lockouts: u64,
    pub attempts: u64,
    pub recovery_codes: u64,
    pub tokens: u64,
    pub rate_limit_keys: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The main entry point.
///
/// Composes the lockout manager, recovery codes, token lifecycle and rate
/// limiter over one repository provider. Cloning is cheap; clones share all
/// state, including the in-process rate-limit windows.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use portcullis::{MemoryRepositoryProvider, Portcullis};
///
/// let portcullis = Portcullis::new(Arc::new(MemoryRepositoryProvider::new()));
/// ```
pub struct Portcullis<R: RepositoryProvider> {
    repositories: Arc<R>,
    subjects: Arc<SubjectRepositoryAdapter<R>>,
    lockout_service: Arc<Lockouts<R>>,
    recovery_service: Arc<RecoveryCodes<R>>,
    token_service: Arc<Tokens<R>>,
    rate_limiter: Arc<RateLimiter>,
    notifications: NotificationService,
    settings: Settings,
    clock: Arc<dyn Clock>,
    sweep_interval: std::time::Duration,
}

impl<R: RepositoryProvider> Clone for Portcullis<R> {
    fn clone(&self) -> Self {
        Self {
            repositories: Arc::clone(&self.repositories),
            subjects: Arc::clone(&self.subjects),
            lockout_service: Arc::clone(&self.lockout_service),
            recovery_service: Arc::clone(&self.recovery_service),
            token_service: Arc::clone(&self.token_service),
            rate_limiter: Arc::clone(&self.rate_limiter),
            notifications: self.notifications.clone(),
            settings: self.settings.clone(),
            clock: Arc::clone(&self.clock),
            sweep_interval: self.sweep_interval,
        }
    }
}

fn identity_of(subject: &Subject) -> Identity {
    Identity::new(Some(&subject.email), subject.document.as_deref())
}

impl<R: RepositoryProvider> Portcullis<R> {
    /// Create a new Portcullis instance with a repository provider
    ///
    /// Uses a random HS256 signing key, default settings, the system clock
    /// and a notifier that only logs. Use [`PortcullisBuilder`] to change any
    /// of these.
    ///
    /// # Arguments
    ///
    /// * `repositories` - The repository provider implementation
    pub fn new(repositories: Arc<R>) -> Self {
        Self::from_builder(
            repositories,
            JwtConfig::new_random_hs256(),
            Settings::default(),
            Arc::new(TracingNotifier),
            Arc::new(SystemClock),
            DEFAULT_SWEEP_INTERVAL,
        )
    }

    pub(crate) fn from_builder(
        repositories: Arc<R>,
        jwt: JwtConfig,
        settings: Settings,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        sweep_interval: std::time::Duration,
    ) -> Self {
        let subjects = Arc::new(SubjectRepositoryAdapter::new(repositories.clone()));
        let notifications = NotificationService::new(notifier);

        let lockout_service = Arc::new(LockoutService::new(
            Arc::new(AttemptRepositoryAdapter::new(repositories.clone())),
            Arc::new(LockoutRepositoryAdapter::new(repositories.clone())),
            settings.clone(),
            clock.clone(),
            notifications.clone(),
        ));

        let recovery_service = Arc::new(RecoveryCodeService::new(
            Arc::new(RecoveryCodeRepositoryAdapter::new(repositories.clone())),
            settings.clone(),
            clock.clone(),
        ));

        let token_service = Arc::new(TokenService::new(
            subjects.clone(),
            Arc::new(RevocationRepositoryAdapter::new(repositories.clone())),
            Arc::new(RefreshRegistryRepositoryAdapter::new(repositories.clone())),
            jwt,
            settings.clone(),
            clock.clone(),
        ));

        let rate_limiter = Arc::new(RateLimiter::new(settings.clone(), clock.clone()));

        Self {
            repositories,
            subjects,
            lockout_service,
            recovery_service,
            token_service,
            rate_limiter,
            notifications,
            settings,
            clock,
            sweep_interval,
        }
    }

    /// Run migrations for all repositories
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    /// Health check for all repositories
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn jwt_config(&self) -> &JwtConfig {
        self.token_service.jwt_config()
    }

    /// Generic per-origin rate limit, for endpoints outside the login and
    /// recovery flows.
    pub fn check_request(&self, origin: &Origin) -> Result<RateLimitStatus, Error> {
        self.rate_limiter.check_request(origin)
    }

    /// Whether `origin` is currently held to the suspicious rate-limit tier.
    pub fn is_suspicious(&self, origin: &Origin) -> bool {
        self.rate_limiter.is_suspicious(origin)
    }

    // ========================================================================
    // Subjects
    // ========================================================================

    /// Register a subject with a password
    ///
    /// # Arguments
    ///
    /// * `email`: The subject's email; stored lowercased
    /// * `document`: Optional secondary login key (e.g. a national id number)
    /// * `password`: The initial password
    ///
    /// # Returns
    ///
    /// Returns the registered subject. An email or document that is already
    /// taken fails with a storage constraint error.
    pub async fn register_subject(
        &self,
        email: &str,
        document: Option<&str>,
        password: &str,
    ) -> Result<Subject, Error> {
        let mut new_subject = NewSubject::builder()
            .email(email)
            .document(document.map(str::to_string))
            .build()?;
        new_subject.password_hash = Some(hash_password(password)?);

        let subject = self.subjects.create(new_subject).await?;
        tracing::info!(subject_id = %subject.id, "Subject registered");
        Ok(subject)
    }

    pub async fn get_subject(&self, subject_id: &SubjectId) -> Result<Option<Subject>, Error> {
        self.subjects.find_by_id(subject_id).await
    }

    /// Deactivate a subject and sign it out everywhere.
    ///
    /// Tokens already issued stop verifying immediately with
    /// `AccountInactive`, and logins are rejected until
    /// [`Self::reactivate_subject`] is called.
    pub async fn deactivate_subject(&self, subject_id: &SubjectId) -> Result<(), Error> {
        self.subjects.set_active(subject_id, false).await?;
        let revoked = self.token_service.revoke_all_for_subject(subject_id).await?;
        self.token_service.bump_token_version(subject_id).await?;

        tracing::info!(subject_id = %subject_id, sessions_revoked = revoked, "Subject deactivated");
        Ok(())
    }

    pub async fn reactivate_subject(&self, subject_id: &SubjectId) -> Result<(), Error> {
        self.subjects.set_active(subject_id, true).await?;
        tracing::info!(subject_id = %subject_id, "Subject reactivated");
        Ok(())
    }

    async fn resolve_subject(&self, identity: &Identity) -> Result<Option<Subject>, Error> {
        if let Some(email) = &identity.email
            && let Some(subject) = self.subjects.find_by_email(email).await?
        {
            return Ok(Some(subject));
        }

        match &identity.document {
            Some(document) => self.subjects.find_by_document(document).await,
            None => Ok(None),
        }
    }

    // ========================================================================
    // Login
    // ========================================================================

    /// Authenticate with a password
    ///
    /// The attempt passes the login rate limit first, then the lockout check,
    /// and only then is the password compared. Unknown identities, inactive
    /// subjects and wrong passwords all fail with the same
    /// `InvalidCredentials` error and cost the same hashing work.
    ///
    /// # Arguments
    ///
    /// * `identity`: Email, document, or both
    /// * `password`: The supplied password
    /// * `origin`: Where the request came from
    ///
    /// # Returns
    ///
    /// Returns the subject and a fresh token pair. While a lockout applies
    /// this fails with `AccountLocked` and a retry hint.
    pub async fn login(
        &self,
        identity: &Identity,
        password: &str,
        origin: &Origin,
    ) -> Result<LoginSession, Error> {
        if identity.is_empty() {
            return Err(
                ValidationError::MissingField("Email or document is required".to_string()).into(),
            );
        }

        self.rate_limiter.check_login(origin, identity)?;

        let subject = self.resolve_subject(identity).await?;
        // Lock every key of a known subject, whichever one was typed.
        let identity = match &subject {
            Some(subject) => identity_of(subject),
            None => identity.clone(),
        };

        if let Err(e) = self.lockout_service.ensure_not_locked(&identity, origin).await {
            if matches!(e, Error::Auth(AuthError::AccountLocked { .. })) {
                self.lockout_service
                    .record_attempt(&identity, origin, AttemptOutcome::AccountLocked, json!({}))
                    .await;
            }
            return Err(e);
        }

        let subject = match subject {
            Some(subject) if subject.active => subject,
            other => {
                let _ = verify_password_or_dummy(password, None);
                let reason = if other.is_some() {
                    "inactive_subject"
                } else {
                    "unknown_identity"
                };
                return Err(self
                    .reject_login(&identity, origin, AttemptOutcome::BadIdentity, reason)
                    .await);
            }
        };

        let stored = self.subjects.get_password_hash(&subject.id).await?;
        if !verify_password_or_dummy(password, stored.as_deref()) {
            return Err(self
                .reject_login(&identity, origin, AttemptOutcome::BadCredential, "password_mismatch")
                .await);
        }

        self.lockout_service.register_success(&identity, origin).await;
        let tokens = self.token_service.issue_pair(&subject, origin).await?;

        tracing::info!(
            subject_id = %subject.id,
            session_id = %tokens.session_id,
            ip = origin.key(),
            "Login succeeded"
        );
        Ok(LoginSession { subject, tokens })
    }

    /// Record a failed credential check and produce the error to return.
    async fn reject_login(
        &self,
        identity: &Identity,
        origin: &Origin,
        outcome: AttemptOutcome,
        reason: &str,
    ) -> Error {
        self.rate_limiter.record_failed_login(origin);

        match self
            .lockout_service
            .register_failure(identity, origin, outcome, json!({ "reason": reason }))
            .await
        {
            Ok(status) => {
                tracing::debug!(
                    outcome = outcome.as_str(),
                    failed_attempts = status.failed_attempts,
                    locked = status.is_locked(),
                    ip = origin.key(),
                    "Credential check failed"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    outcome = outcome.as_str(),
                    ip = origin.key(),
                    "Failed to update lockout state after a failed login"
                );
            }
        }

        AuthError::InvalidCredentials.into()
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    /// Verify an access token
    ///
    /// # Returns
    ///
    /// Returns the claims if the token is well formed, unexpired, not revoked,
    /// and was issued at the subject's current token version.
    pub async fn verify_access(&self, access_token: &str) -> Result<TokenClaims, Error> {
        self.token_service.verify_access(access_token).await
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// The presented token is rotated out. Presenting it again fails with
    /// `TokenReplayed`.
    ///
    /// # Arguments
    ///
    /// * `refresh_token`: The refresh token from an earlier pair
    /// * `subject_id`: The subject the caller believes owns the token
    /// * `origin`: Where the request came from
    pub async fn refresh(
        &self,
        refresh_token: &str,
        subject_id: &SubjectId,
        origin: &Origin,
    ) -> Result<TokenPair, Error> {
        self.rate_limiter.check_request(origin)?;
        self.token_service
            .refresh(refresh_token, subject_id, origin)
            .await
    }

    /// Revoke the access token and, when given, its refresh token.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), Error> {
        self.token_service.revoke(access_token).await?;
        if let Some(refresh_token) = refresh_token {
            self.token_service.revoke(refresh_token).await?;
        }
        Ok(())
    }

    /// Sign a subject out of every session
    ///
    /// Revokes all registered refresh tokens and bumps the token version, so
    /// outstanding access tokens fail with `TokenVersionMismatch`.
    ///
    /// # Returns
    ///
    /// Returns the number of refresh tokens revoked
    pub async fn logout_everywhere(&self, subject_id: &SubjectId) -> Result<usize, Error> {
        let revoked = self.token_service.revoke_all_for_subject(subject_id).await?;
        self.token_service.bump_token_version(subject_id).await?;
        Ok(revoked)
    }

    pub async fn active_sessions(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error> {
        self.token_service.active_sessions(subject_id).await
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Issue a password-reset code and send it to the subject
    ///
    /// Unknown and inactive emails are not an error, so the caller can answer
    /// identically either way.
    ///
    /// # Returns
    ///
    /// Returns the issued code, or `None` when no active subject has this
    /// email.
    pub async fn request_recovery_code(
        &self,
        email: &str,
        origin: &Origin,
    ) -> Result<Option<IssuedRecoveryCode>, Error> {
        self.rate_limiter.check_request(origin)?;
        self.lockout_service
            .ensure_not_locked(&Identity::default(), origin)
            .await?;

        let identity = Identity::email(email);
        let email = identity
            .email
            .as_deref()
            .ok_or_else(|| ValidationError::MissingField("Email is required".to_string()))?;

        let subject = match self.subjects.find_by_email(email).await? {
            Some(subject) if subject.active => subject,
            _ => {
                tracing::debug!(ip = origin.key(), "Recovery requested for unknown identity");
                return Ok(None);
            }
        };

        let issued = self
            .recovery_service
            .issue(&subject.email, PASSWORD_RESET_PURPOSE, origin)
            .await?;
        self.notifications
            .recovery_code(&subject.email, &issued.code, issued.expires_at);

        Ok(Some(issued))
    }

    /// Check a password-reset code
    ///
    /// # Returns
    ///
    /// Returns a single-use reset credential for [`Self::reset_password`].
    /// A wrong code fails with `CodeInvalidOrExpired` and the attempts left;
    /// the last wrong guess fails with `CodeAttemptsExceeded`.
    pub async fn verify_recovery_code(
        &self,
        email: &str,
        code: &str,
        origin: &Origin,
    ) -> Result<ResetGrant, Error> {
        self.rate_limiter.check_request(origin)?;
        self.lockout_service
            .ensure_not_locked(&Identity::default(), origin)
            .await?;

        let identity = Identity::email(email);
        let email = identity
            .email
            .as_deref()
            .ok_or_else(|| ValidationError::MissingField("Email is required".to_string()))?;

        if let Err(e) = self
            .recovery_service
            .validate(email, PASSWORD_RESET_PURPOSE, code)
            .await
        {
            if matches!(e, Error::Recovery(_)) {
                self.rate_limiter.record_failed_login(origin);
            }
            return Err(e);
        }

        let subject = self
            .subjects
            .find_by_email(email)
            .await?
            .filter(|subject| subject.active)
            .ok_or(RecoveryError::CodeInvalidOrExpired {
                attempts_remaining: None,
            })?;

        self.token_service.issue_reset_token(&subject)
    }

    /// Set a new password using a reset credential
    ///
    /// Every session of the subject is revoked, earlier access tokens stop
    /// verifying, and identity lockouts are lifted.
    ///
    /// # Arguments
    ///
    /// * `reset_token`: The credential from [`Self::verify_recovery_code`]
    /// * `new_password`: The new password
    pub async fn reset_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> Result<Subject, Error> {
        // Hash first so a weak password does not burn the credential.
        let hash = hash_password(new_password)?;
        let claims = self.token_service.redeem_reset_token(reset_token).await?;
        let subject_id = SubjectId::new(&claims.sub);

        self.subjects.set_password_hash(&subject_id, &hash).await?;
        let revoked = self.token_service.revoke_all_for_subject(&subject_id).await?;
        self.token_service.bump_token_version(&subject_id).await?;

        let subject = self
            .subjects
            .find_by_id(&subject_id)
            .await?
            .ok_or(StorageError::NotFound)?;

        let identity = identity_of(&subject);
        let lifted = self.lockout_service.unlock_identity(&identity).await?;
        // Earlier failures no longer count towards the next lockout.
        self.lockout_service
            .register_success(&identity, &Origin::default())
            .await;
        self.notifications.password_changed(&subject.email);

        tracing::info!(
            subject_id = %subject_id,
            sessions_revoked = revoked,
            lockouts_lifted = lifted,
            "Password reset"
        );
        Ok(subject)
    }

    /// Change a password, given the current one
    ///
    /// A wrong current password counts as a failed attempt towards lockout.
    /// On success every existing session is revoked.
    pub async fn change_password(
        &self,
        subject_id: &SubjectId,
        current_password: &str,
        new_password: &str,
        origin: &Origin,
    ) -> Result<(), Error> {
        let subject = self
            .subjects
            .find_by_id(subject_id)
            .await?
            .filter(|subject| subject.active)
            .ok_or(AuthError::InvalidCredentials)?;
        let identity = identity_of(&subject);

        self.lockout_service
            .ensure_not_locked(&identity, origin)
            .await?;

        let stored = self.subjects.get_password_hash(subject_id).await?;
        if !verify_password_or_dummy(current_password, stored.as_deref()) {
            return Err(self
                .reject_login(&identity, origin, AttemptOutcome::BadCredential, "password_change")
                .await);
        }

        let hash = hash_password(new_password)?;
        self.subjects.set_password_hash(subject_id, &hash).await?;
        self.token_service.revoke_all_for_subject(subject_id).await?;
        self.token_service.bump_token_version(subject_id).await?;
        self.notifications.password_changed(&subject.email);

        tracing::info!(subject_id = %subject_id, "Password changed");
        Ok(())
    }

    // ========================================================================
    // Lockouts
    // ========================================================================

    /// Administratively lock a key
    ///
    /// # Arguments
    ///
    /// * `scope`: Which kind of key to lock
    /// * `value`: The email, document or origin address
    /// * `reason`: Free-form reason stored on the lockout
    /// * `duration`: `None` locks until [`Self::unlock`] or a password reset
    pub async fn lock(
        &self,
        scope: LockoutScope,
        value: &str,
        reason: &str,
        duration: Option<Duration>,
    ) -> Result<Lockout, Error> {
        self.lockout_service.lock(scope, value, reason, duration).await
    }

    /// Returns `true` if a lockout was lifted.
    pub async fn unlock(&self, scope: LockoutScope, value: &str) -> Result<bool, Error> {
        self.lockout_service.unlock(scope, value).await
    }

    pub async fn check_lockout(
        &self,
        identity: &Identity,
        origin: &Origin,
    ) -> Result<Option<Lockout>, Error> {
        self.lockout_service
            .check_active_lockout(identity, origin)
            .await
    }

    /// Most recent ledger entries for an identity, newest first.
    pub async fn recent_attempts(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<Vec<AttemptRecord>, Error> {
        self.lockout_service.recent_attempts(identity, limit).await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Remove expired lockouts, old ledger rows, spent recovery codes,
    /// revocation and registry rows past their natural expiry, and idle
    /// rate-limit windows.
    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        let now = self.clock.now();

        let LockoutSweep { lockouts, attempts } = self.lockout_service.sweep(now).await?;
        let recovery_codes = self.recovery_service.cleanup_expired(now).await?;
        let tokens = self.token_service.purge_expired(now).await?;
        let rate_limit_keys = self.rate_limiter.prune(now);

        Ok(SweepReport {
            lockouts,
            attempts,
            recovery_codes,
            tokens,
            rate_limit_keys,
        })
    }

    /// Start the background sweeper.
    ///
    /// Runs [`Self::sweep`] on the configured interval until `shutdown`
    /// changes. A failed sweep is logged and retried on the next tick.
    pub fn start_sweeper(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let portcullis = self.clone();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(portcullis.sweep_interval);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match portcullis.sweep().await {
                            Ok(report) if !report.is_empty() => {
                                tracing::info!(
                                    lockouts = report.lockouts,
                                    attempts = report.attempts,
                                    recovery_codes = report.recovery_codes,
                                    tokens = report.tokens,
                                    rate_limit_keys = report.rate_limit_keys,
                                    "Swept expired state"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Sweep failed");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down sweeper");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portcullis() -> Portcullis<MemoryRepositoryProvider> {
        Portcullis::new(Arc::new(MemoryRepositoryProvider::new()))
    }

    #[tokio::test]
    async fn test_register_normalizes_email() {
        let portcullis = portcullis();

        let subject = portcullis
            .register_subject(" A@Example.com ", Some("12345678"), "hunter22-hunter")
            .await
            .unwrap();

        assert_eq!(subject.email, "a@example.com");
        assert_eq!(subject.document.as_deref(), Some("12345678"));
        assert!(subject.active);
        assert_eq!(subject.token_version, 0);
    }

    #[tokio::test]
    async fn test_register_rejects_weak_password() {
        let err = portcullis()
            .register_subject("a@example.com", None, "short")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_login_by_document() {
        let portcullis = portcullis();
        let subject = portcullis
            .register_subject("a@example.com", Some("12345678"), "hunter22-hunter")
            .await
            .unwrap();

        let session = portcullis
            .login(
                &Identity::document("12345678"),
                "hunter22-hunter",
                &Origin::ip("10.0.0.1"),
            )
            .await
            .unwrap();

        assert_eq!(session.subject.id, subject.id);
        let claims = portcullis
            .verify_access(&session.tokens.access_token)
            .await
            .unwrap();
        assert_eq!(claims.sub, subject.id.as_str());
    }

    #[tokio::test]
    async fn test_login_requires_identity() {
        let err = portcullis()
            .login(&Identity::default(), "hunter22-hunter", &Origin::ip("10.0.0.1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unknown_identity_and_wrong_password_look_alike() {
        let portcullis = portcullis();
        portcullis
            .register_subject("a@example.com", None, "hunter22-hunter")
            .await
            .unwrap();
        let origin = Origin::ip("10.0.0.1");

        let unknown = portcullis
            .login(&Identity::email("b@example.com"), "hunter22-hunter", &origin)
            .await
            .unwrap_err();
        let wrong = portcullis
            .login(&Identity::email("a@example.com"), "not-the-password", &origin)
            .await
            .unwrap_err();

        assert_eq!(unknown.kind(), ErrorKind::InvalidCredential);
        assert_eq!(wrong.kind(), ErrorKind::InvalidCredential);
        assert_eq!(unknown.public_message(), wrong.public_message());

        let attempts = portcullis
            .recent_attempts(&Identity::email("b@example.com"), 10)
            .await
            .unwrap();
        assert_eq!(attempts[0].outcome, AttemptOutcome::BadIdentity);
    }

    #[tokio::test]
    async fn test_deactivated_subject_cannot_log_in() {
        let portcullis = portcullis();
        let subject = portcullis
            .register_subject("a@example.com", None, "hunter22-hunter")
            .await
            .unwrap();
        let origin = Origin::ip("10.0.0.1");
        let session = portcullis
            .login(&Identity::email("a@example.com"), "hunter22-hunter", &origin)
            .await
            .unwrap();

        portcullis.deactivate_subject(&subject.id).await.unwrap();

        let err = portcullis
            .login(&Identity::email("a@example.com"), "hunter22-hunter", &origin)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCredential);
        assert!(
            portcullis
                .verify_access(&session.tokens.access_token)
                .await
                .is_err()
        );
        assert!(portcullis.active_sessions(&subject.id).await.unwrap().is_empty());

        portcullis.reactivate_subject(&subject.id).await.unwrap();
        portcullis
            .login(&Identity::email("a@example.com"), "hunter22-hunter", &origin)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_logout_revokes_both_tokens() {
        let portcullis = portcullis();
        let subject = portcullis
            .register_subject("a@example.com", None, "hunter22-hunter")
            .await
            .unwrap();
        let origin = Origin::ip("10.0.0.1");
        let session = portcullis
            .login(&Identity::email("a@example.com"), "hunter22-hunter", &origin)
            .await
            .unwrap();

        portcullis
            .logout(
                &session.tokens.access_token,
                Some(&session.tokens.refresh_token),
            )
            .await
            .unwrap();

        let err = portcullis
            .verify_access(&session.tokens.access_token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenRevoked);

        let err = portcullis
            .refresh(&session.tokens.refresh_token, &subject.id, &origin)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenRevoked);
    }

    #[tokio::test]
    async fn test_change_password_signs_out_everywhere() {
        let portcullis = portcullis();
        let subject = portcullis
            .register_subject("a@example.com", None, "hunter22-hunter")
            .await
            .unwrap();
        let origin = Origin::ip("10.0.0.1");
        let session = portcullis
            .login(&Identity::email("a@example.com"), "hunter22-hunter", &origin)
            .await
            .unwrap();

        let err = portcullis
            .change_password(&subject.id, "wrong-password", "new-password-1", &origin)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCredential);

        portcullis
            .change_password(&subject.id, "hunter22-hunter", "new-password-1", &origin)
            .await
            .unwrap();

        let err = portcullis
            .verify_access(&session.tokens.access_token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenVersionMismatch);

        portcullis
            .login(&Identity::email("a@example.com"), "new-password-1", &origin)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recovery_for_unknown_email_is_silent() {
        let issued = portcullis()
            .request_recovery_code("nobody@example.com", &Origin::ip("10.0.0.1"))
            .await
            .unwrap();

        assert!(issued.is_none());
    }

    #[tokio::test]
    async fn test_origin_lockout_blocks_recovery() {
        let portcullis = portcullis();
        portcullis
            .register_subject("a@example.com", None, "hunter22-hunter")
            .await
            .unwrap();
        portcullis
            .lock(LockoutScope::Origin, "10.0.0.1", "abuse", None)
            .await
            .unwrap();

        let err = portcullis
            .request_recovery_code("a@example.com", &Origin::ip("10.0.0.1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccountLocked);
        assert_eq!(err.retry_after(), None);

        assert!(
            portcullis
                .request_recovery_code("a@example.com", &Origin::ip("10.0.0.2"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_sweep_on_empty_store() {
        let report = portcullis().sweep().await.unwrap();
        assert!(report.is_empty());
    }
}
