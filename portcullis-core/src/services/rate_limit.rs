//! Sliding-window rate limiting with anomaly escalation.
//!
//! Each key keeps the timestamps of its accepted requests inside the trailing
//! window. A request is rejected once the window already holds the tier's
//! maximum, and the origin behind it is marked suspicious for a cooldown.
//! While suspicious, every key of that origin is held to the stricter
//! `suspicious` tier.
//!
//! Failed logins are tracked per origin on a separate window. An origin that
//! crosses the anomaly threshold is escalated even if it never hit a request
//! ceiling.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::{
    Error,
    clock::Clock,
    config::Settings,
    error::AuthError,
    storage::{Identity, Origin},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    Standard,
    Login,
    Suspicious,
}

impl RateLimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::Standard => "standard",
            RateLimitTier::Login => "login",
            RateLimitTier::Suspicious => "suspicious",
        }
    }
}

/// State of a key after an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub tier: RateLimitTier,
    pub limit: u32,
    pub remaining: u32,
}

pub struct RateLimiter {
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    failures: DashMap<String, VecDeque<DateTime<Utc>>>,
    suspicious: DashMap<String, DateTime<Utc>>,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

fn prune_window(events: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while events.front().is_some_and(|t| *t <= cutoff) {
        events.pop_front();
    }
}

impl RateLimiter {
    pub fn new(settings: Settings, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            failures: DashMap::new(),
            suspicious: DashMap::new(),
            settings,
            clock,
        }
    }

    /// Generic per-origin limit for any request.
    pub fn check_request(&self, origin: &Origin) -> Result<RateLimitStatus, Error> {
        let key = format!("std:{}", origin.key());
        self.hit(key, origin, RateLimitTier::Standard)
    }

    /// Login limit per origin and identity.
    pub fn check_login(
        &self,
        origin: &Origin,
        identity: &Identity,
    ) -> Result<RateLimitStatus, Error> {
        let who = identity
            .email
            .as_deref()
            .or(identity.document.as_deref())
            .unwrap_or("-");
        let key = format!("login:{}:{}", origin.key(), who);
        self.hit(key, origin, RateLimitTier::Login)
    }

    pub fn is_suspicious(&self, origin: &Origin) -> bool {
        let now = self.clock.now();
        self.suspicious
            .get(origin.key())
            .is_some_and(|until| *until > now)
    }

    /// Feed a failed login from `origin` into anomaly detection. Returns
    /// `true` if this failure escalated the origin.
    pub fn record_failed_login(&self, origin: &Origin) -> bool {
        let now = self.clock.now();
        let cutoff = now - self.settings.lockout_window();
        let threshold = self.settings.anomaly_failure_threshold();

        let count = {
            let mut failures = self.failures.entry(origin.key().to_string()).or_default();
            prune_window(&mut failures, cutoff);
            failures.push_back(now);
            failures.len()
        };

        if count as u32 >= threshold && !self.is_suspicious(origin) {
            tracing::warn!(
                ip = origin.key(),
                failures = count,
                "Failed login burst, origin escalated"
            );
            self.mark_suspicious(origin, now);
            return true;
        }
        false
    }

    /// Drop empty windows and lapsed suspicion marks. Returns the number of
    /// keys removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let request_cutoff = now - self.settings.rate_limit_window();
        let failure_cutoff = now - self.settings.lockout_window();
        let before = self.windows.len() + self.failures.len() + self.suspicious.len();

        self.windows.retain(|_, events| {
            prune_window(events, request_cutoff);
            !events.is_empty()
        });
        self.failures.retain(|_, events| {
            prune_window(events, failure_cutoff);
            !events.is_empty()
        });
        self.suspicious.retain(|_, until| *until > now);

        before - (self.windows.len() + self.failures.len() + self.suspicious.len())
    }

    fn mark_suspicious(&self, origin: &Origin, now: DateTime<Utc>) {
        let until = now + self.settings.suspicious_cooldown();
        self.suspicious
            .entry(origin.key().to_string())
            .and_modify(|current| *current = (*current).max(until))
            .or_insert(until);
    }

    fn effective_limit(&self, origin: &Origin, tier: RateLimitTier) -> (RateLimitTier, u32) {
        let limit = match tier {
            RateLimitTier::Standard => self.settings.rate_limit_standard_max(),
            RateLimitTier::Login => self.settings.rate_limit_login_max(),
            RateLimitTier::Suspicious => self.settings.rate_limit_suspicious_max(),
        };

        if self.is_suspicious(origin) {
            let strict = self.settings.rate_limit_suspicious_max();
            if strict < limit {
                return (RateLimitTier::Suspicious, strict);
            }
        }
        (tier, limit)
    }

    fn hit(
        &self,
        key: String,
        origin: &Origin,
        tier: RateLimitTier,
    ) -> Result<RateLimitStatus, Error> {
        let now = self.clock.now();
        let window = self.settings.rate_limit_window();
        let (tier, limit) = self.effective_limit(origin, tier);

        let retry_after = {
            let mut events = self.windows.entry(key).or_default();
            prune_window(&mut events, now - window);

            if (events.len() as u32) < limit {
                events.push_back(now);
                return Ok(RateLimitStatus {
                    tier,
                    limit,
                    remaining: limit.saturating_sub(events.len() as u32),
                });
            }

            let oldest = events.front().copied().unwrap_or(now);
            (oldest + window - now).max(Duration::zero())
        };

        tracing::warn!(
            ip = origin.key(),
            tier = tier.as_str(),
            retry_after_secs = retry_after.num_seconds(),
            "Rate limit exceeded"
        );
        self.mark_suspicious(origin, now);
        Err(AuthError::RateLimited { retry_after }.into())
    }
}
