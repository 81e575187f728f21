//! Bearer token lifecycle: issue, verify, rotate and revoke.
//!
//! A login mints a session holding one access token and one refresh token.
//! The refresh token id is registered under its subject; exchanging it removes
//! the id (rotation), so each refresh token works exactly once. Presenting a
//! rotated refresh token again fails with [`TokenError::Replayed`], which is
//! kept apart from expiry so replays can be audited.
//!
//! Two mechanisms invalidate tokens early:
//!
//! - the revocation store, listing individual token ids
//! - the subject's `token_version`, which every token embeds as `ver`; bumping
//!   it invalidates every token minted before the bump

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    Error,
    clock::Clock,
    config::Settings,
    error::{AuthError, TokenError},
    id::{SESSION_PREFIX, TOKEN_PREFIX, generate_prefixed_id},
    repositories::{RefreshRegistryRepository, RevocationRepository, SubjectRepository},
    storage::{Origin, RefreshEntry, RevocationReason, RevokedToken},
    subject::{Subject, SubjectId},
    token::{JwtConfig, TokenClaims, TokenKind, TokenMetadata, TokenPair},
};

/// A single-use credential that authorizes one password reset.
#[derive(Debug, Clone)]
pub struct ResetGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenService<S, V, F>
where
    S: SubjectRepository,
    V: RevocationRepository,
    F: RefreshRegistryRepository,
{
    subjects: Arc<S>,
    revocations: Arc<V>,
    registry: Arc<F>,
    jwt: JwtConfig,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl<S, V, F> TokenService<S, V, F>
where
    S: SubjectRepository,
    V: RevocationRepository,
    F: RefreshRegistryRepository,
{
    pub fn new(
        subjects: Arc<S>,
        revocations: Arc<V>,
        registry: Arc<F>,
        jwt: JwtConfig,
        settings: Settings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subjects,
            revocations,
            registry,
            jwt,
            settings,
            clock,
        }
    }

    pub fn jwt_config(&self) -> &JwtConfig {
        &self.jwt
    }

    fn mint(
        &self,
        subject: &Subject,
        session_id: &str,
        kind: TokenKind,
        ttl: Duration,
        origin: Option<&Origin>,
    ) -> Result<(String, TokenClaims), Error> {
        let now = self.clock.now();
        let claims = TokenClaims {
            sub: subject.id.to_string(),
            sid: session_id.to_string(),
            jti: generate_prefixed_id(TOKEN_PREFIX),
            typ: kind,
            ver: subject.token_version,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: self.jwt.issuer.clone(),
            metadata: origin
                .filter(|_| self.jwt.include_metadata)
                .map(TokenMetadata::from),
        };
        let token = self.jwt.encode(&claims)?;
        Ok((token, claims))
    }

    /// Mint a new session for `subject` and register its refresh token.
    pub async fn issue_pair(&self, subject: &Subject, origin: &Origin) -> Result<TokenPair, Error> {
        let session_id = generate_prefixed_id(SESSION_PREFIX);

        let (access_token, access) = self.mint(
            subject,
            &session_id,
            TokenKind::Access,
            self.settings.access_token_ttl(),
            Some(origin),
        )?;
        let (refresh_token, refresh) = self.mint(
            subject,
            &session_id,
            TokenKind::Refresh,
            self.settings.refresh_token_ttl(),
            Some(origin),
        )?;

        self.registry
            .register(RefreshEntry {
                jti: refresh.jti.clone(),
                subject_id: subject.id.clone(),
                session_id: session_id.clone(),
                issued_at: refresh.issued_at(),
                expires_at: refresh.expires_at(),
            })
            .await?;

        tracing::debug!(subject_id = %subject.id, session_id = %session_id, "Token pair issued");

        Ok(TokenPair {
            access_token,
            refresh_token,
            session_id,
            access_expires_at: access.expires_at(),
            refresh_expires_at: refresh.expires_at(),
        })
    }

    async fn current_subject(&self, claims: &TokenClaims) -> Result<Subject, Error> {
        let subject = self
            .subjects
            .find_by_id(&SubjectId::new(&claims.sub))
            .await?
            .ok_or(TokenError::Revoked)?;

        if !subject.active {
            return Err(AuthError::AccountInactive.into());
        }
        if subject.token_version != claims.ver {
            return Err(TokenError::VersionMismatch.into());
        }
        Ok(subject)
    }

    /// Decode and fully check an access token.
    pub async fn verify_access(&self, token: &str) -> Result<TokenClaims, Error> {
        let claims = self.jwt.decode(token)?;

        if self.revocations.is_revoked(&claims.jti).await? {
            return Err(TokenError::Revoked.into());
        }
        if claims.is_expired(self.clock.now()) {
            return Err(TokenError::Expired.into());
        }
        if claims.typ != TokenKind::Access {
            return Err(TokenError::Malformed("expected an access token".to_string()).into());
        }

        self.current_subject(&claims).await?;
        Ok(claims)
    }

    /// Check a refresh token presented on behalf of `subject_id`.
    pub async fn verify_refresh(
        &self,
        token: &str,
        subject_id: &SubjectId,
    ) -> Result<TokenClaims, Error> {
        let claims = self.jwt.decode(token)?;

        if let Some(revoked) = self.revocations.find(&claims.jti).await? {
            return Err(match revoked.reason {
                RevocationReason::Rotated => TokenError::Replayed,
                _ => TokenError::Revoked,
            }
            .into());
        }
        if claims.is_expired(self.clock.now()) {
            return Err(TokenError::Expired.into());
        }
        if claims.typ != TokenKind::Refresh {
            return Err(TokenError::Malformed("expected a refresh token".to_string()).into());
        }
        if claims.sub != subject_id.as_str() {
            return Err(TokenError::Malformed("token subject mismatch".to_string()).into());
        }
        if !self.registry.contains(subject_id, &claims.jti).await? {
            return Err(TokenError::Replayed.into());
        }

        self.current_subject(&claims).await?;
        Ok(claims)
    }

    /// Exchange a refresh token for a brand-new session.
    ///
    /// Of several concurrent exchanges of one token exactly one succeeds; the
    /// rest fail with [`TokenError::Replayed`].
    pub async fn refresh(
        &self,
        token: &str,
        subject_id: &SubjectId,
        origin: &Origin,
    ) -> Result<TokenPair, Error> {
        let claims = self.verify_refresh(token, subject_id).await?;

        if !self.registry.remove(subject_id, &claims.jti).await? {
            tracing::warn!(subject_id = %subject_id, jti = %claims.jti, "Refresh token replay rejected");
            return Err(TokenError::Replayed.into());
        }

        self.revocations
            .revoke(RevokedToken {
                jti: claims.jti.clone(),
                subject_id: subject_id.clone(),
                reason: RevocationReason::Rotated,
                revoked_at: self.clock.now(),
                expires_at: claims.expires_at(),
            })
            .await?;

        let subject = self
            .subjects
            .find_by_id(subject_id)
            .await?
            .ok_or(TokenError::Revoked)?;
        self.issue_pair(&subject, origin).await
    }

    /// Revoke a single token. The signature must be valid; expiry is ignored.
    pub async fn revoke(&self, token: &str) -> Result<(), Error> {
        let claims = self.jwt.decode(token)?;
        let subject_id = SubjectId::new(&claims.sub);

        self.revocations
            .revoke(RevokedToken {
                jti: claims.jti.clone(),
                subject_id: subject_id.clone(),
                reason: RevocationReason::Logout,
                revoked_at: self.clock.now(),
                expires_at: claims.expires_at(),
            })
            .await?;

        if claims.typ == TokenKind::Refresh {
            self.registry.remove(&subject_id, &claims.jti).await?;
        }

        tracing::debug!(subject_id = %subject_id, jti = %claims.jti, "Token revoked");
        Ok(())
    }

    /// Revoke every registered refresh token of `subject_id`. Returns how many
    /// were revoked.
    pub async fn revoke_all_for_subject(&self, subject_id: &SubjectId) -> Result<usize, Error> {
        let entries = self.registry.clear_subject(subject_id).await?;
        let now = self.clock.now();

        for entry in &entries {
            self.revocations
                .revoke(RevokedToken {
                    jti: entry.jti.clone(),
                    subject_id: subject_id.clone(),
                    reason: RevocationReason::SubjectRevoked,
                    revoked_at: now,
                    expires_at: entry.expires_at,
                })
                .await?;
        }

        tracing::info!(subject_id = %subject_id, count = entries.len(), "Revoked all refresh tokens");
        Ok(entries.len())
    }

    /// Invalidate every token already issued to `subject_id`.
    pub async fn bump_token_version(&self, subject_id: &SubjectId) -> Result<u64, Error> {
        let version = self.subjects.increment_token_version(subject_id).await?;
        tracing::info!(subject_id = %subject_id, version, "Token version bumped");
        Ok(version)
    }

    /// Refresh sessions currently registered for `subject_id`.
    pub async fn active_sessions(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error> {
        let now = self.clock.now();
        let mut sessions = self.registry.list_for(subject_id).await?;
        sessions.retain(|entry| entry.expires_at > now);
        Ok(sessions)
    }

    pub fn issue_reset_token(&self, subject: &Subject) -> Result<ResetGrant, Error> {
        let session_id = generate_prefixed_id(SESSION_PREFIX);
        let (token, claims) = self.mint(
            subject,
            &session_id,
            TokenKind::Reset,
            self.settings.reset_token_ttl(),
            None,
        )?;
        Ok(ResetGrant {
            token,
            expires_at: claims.expires_at(),
        })
    }

    /// Redeem a reset credential. A second redemption fails with
    /// [`TokenError::Replayed`].
    pub async fn redeem_reset_token(&self, token: &str) -> Result<TokenClaims, Error> {
        let claims = self.jwt.decode(token)?;

        if claims.is_expired(self.clock.now()) {
            return Err(TokenError::Expired.into());
        }
        if claims.typ != TokenKind::Reset {
            return Err(TokenError::Malformed("expected a reset token".to_string()).into());
        }
        if let Some(revoked) = self.revocations.find(&claims.jti).await? {
            return Err(match revoked.reason {
                RevocationReason::ResetRedeemed => TokenError::Replayed,
                _ => TokenError::Revoked,
            }
            .into());
        }

        let subject = self.current_subject(&claims).await?;

        let first_use = self
            .revocations
            .revoke(RevokedToken {
                jti: claims.jti.clone(),
                subject_id: subject.id,
                reason: RevocationReason::ResetRedeemed,
                revoked_at: self.clock.now(),
                expires_at: claims.expires_at(),
            })
            .await?;
        if !first_use {
            return Err(TokenError::Replayed.into());
        }

        Ok(claims)
    }

    /// Drop revocation entries and registry rows past their natural expiry.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let revoked = self.revocations.purge_expired(now).await?;
        let registered = self.registry.purge_expired(now).await?;
        Ok(revoked + registered)
    }
}
