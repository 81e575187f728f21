//! Named tunables with defaults.
//!
//! Every threshold the engine uses is looked up through a [`ConfigProvider`]
//! at the moment it is needed, so a provider that changes underneath the
//! engine (for example [`StaticConfig::set`]) takes effect on the next check
//! without restarting anything.
//!
//! | Key                              | Default  |
//! | -------------------------------- | -------- |
//! | `lockout.max_attempts`           | 3        |
//! | `lockout.window_secs`            | 900      |
//! | `lockout.duration_secs`          | 900      |
//! | `recovery.code_ttl_secs`         | 300      |
//! | `recovery.max_attempts`          | 3        |
//! | `token.access_ttl_secs`          | 900      |
//! | `token.refresh_ttl_secs`         | 604800   |
//! | `token.reset_ttl_secs`           | 600      |
//! | `rate_limit.window_secs`         | 60       |
//! | `rate_limit.standard_max`        | 60       |
//! | `rate_limit.login_max`           | 10       |
//! | `rate_limit.suspicious_max`      | 5        |
//! | `rate_limit.suspicious_cooldown_secs` | 900 |
//! | `anomaly.failure_threshold`      | 10       |
//! | `retention.attempts_secs`        | 2592000  |

use std::{fmt::Debug, str::FromStr, sync::Arc};

use chrono::Duration;
use dashmap::DashMap;

pub mod keys {
    pub const LOCKOUT_MAX_ATTEMPTS: &str = "lockout.max_attempts";
    pub const LOCKOUT_WINDOW_SECS: &str = "lockout.window_secs";
    pub const LOCKOUT_DURATION_SECS: &str = "lockout.duration_secs";
    pub const RECOVERY_CODE_TTL_SECS: &str = "recovery.code_ttl_secs";
    pub const RECOVERY_MAX_ATTEMPTS: &str = "recovery.max_attempts";
    pub const ACCESS_TOKEN_TTL_SECS: &str = "token.access_ttl_secs";
    pub const REFRESH_TOKEN_TTL_SECS: &str = "token.refresh_ttl_secs";
    pub const RESET_TOKEN_TTL_SECS: &str = "token.reset_ttl_secs";
    pub const RATE_LIMIT_WINDOW_SECS: &str = "rate_limit.window_secs";
    pub const RATE_LIMIT_STANDARD_MAX: &str = "rate_limit.standard_max";
    pub const RATE_LIMIT_LOGIN_MAX: &str = "rate_limit.login_max";
    pub const RATE_LIMIT_SUSPICIOUS_MAX: &str = "rate_limit.suspicious_max";
    pub const SUSPICIOUS_COOLDOWN_SECS: &str = "rate_limit.suspicious_cooldown_secs";
    pub const ANOMALY_FAILURE_THRESHOLD: &str = "anomaly.failure_threshold";
    pub const ATTEMPT_RETENTION_SECS: &str = "retention.attempts_secs";
}

/// Source of raw configuration values.
pub trait ConfigProvider: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-process configuration map that can be changed at runtime.
#[derive(Debug, Default)]
pub struct StaticConfig {
    values: DashMap<String, String>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: impl ToString) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values.remove(key);
    }
}

impl ConfigProvider for StaticConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }
}

/// Reads `PORTCULLIS_*` environment variables on every lookup.
///
/// `lockout.max_attempts` maps to `PORTCULLIS_LOCKOUT_MAX_ATTEMPTS`.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    prefix: String,
}

impl EnvConfig {
    pub fn new() -> Self {
        Self::with_prefix("PORTCULLIS")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn env_key(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key.replace('.', "_").to_uppercase())
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigProvider for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.env_key(key)).ok()
    }
}

/// Longest duration any setting may hold (ten years).
const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Typed view over a [`ConfigProvider`].
#[derive(Clone)]
pub struct Settings {
    provider: Arc<dyn ConfigProvider>,
}

impl Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(Arc::new(StaticConfig::new()))
    }
}

impl Settings {
    pub fn new(provider: Arc<dyn ConfigProvider>) -> Self {
        Self { provider }
    }

    fn parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.provider.get(key) {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key, value = %raw, error = %e, "Invalid config value, using default");
                    default
                }
            },
            None => default,
        }
    }

    fn count(&self, key: &str, default: u32) -> u32 {
        self.parsed(key, default).max(1)
    }

    fn seconds(&self, key: &str, default: i64) -> Duration {
        let secs = self.parsed(key, default).max(1);
        if secs > MAX_DURATION_SECS {
            tracing::warn!(key, value = secs, "Config duration out of range, using default");
            return Duration::seconds(default);
        }
        Duration::try_seconds(secs).unwrap_or_else(|| Duration::seconds(default))
    }

    pub fn lockout_max_attempts(&self) -> u32 {
        self.count(keys::LOCKOUT_MAX_ATTEMPTS, 3)
    }

    pub fn lockout_window(&self) -> Duration {
        self.seconds(keys::LOCKOUT_WINDOW_SECS, 15 * 60)
    }

    pub fn lockout_duration(&self) -> Duration {
        self.seconds(keys::LOCKOUT_DURATION_SECS, 15 * 60)
    }

    pub fn recovery_code_ttl(&self) -> Duration {
        self.seconds(keys::RECOVERY_CODE_TTL_SECS, 5 * 60)
    }

    pub fn recovery_max_attempts(&self) -> u32 {
        self.count(keys::RECOVERY_MAX_ATTEMPTS, 3)
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.seconds(keys::ACCESS_TOKEN_TTL_SECS, 15 * 60)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.seconds(keys::REFRESH_TOKEN_TTL_SECS, 7 * 24 * 60 * 60)
    }

    pub fn reset_token_ttl(&self) -> Duration {
        self.seconds(keys::RESET_TOKEN_TTL_SECS, 10 * 60)
    }

    pub fn rate_limit_window(&self) -> Duration {
        self.seconds(keys::RATE_LIMIT_WINDOW_SECS, 60)
    }

    pub fn rate_limit_standard_max(&self) -> u32 {
        self.count(keys::RATE_LIMIT_STANDARD_MAX, 60)
    }

    pub fn rate_limit_login_max(&self) -> u32 {
        self.count(keys::RATE_LIMIT_LOGIN_MAX, 10)
    }

    pub fn rate_limit_suspicious_max(&self) -> u32 {
        self.count(keys::RATE_LIMIT_SUSPICIOUS_MAX, 5)
    }

    pub fn suspicious_cooldown(&self) -> Duration {
        self.seconds(keys::SUSPICIOUS_COOLDOWN_SECS, 15 * 60)
    }

    pub fn anomaly_failure_threshold(&self) -> u32 {
        self.count(keys::ANOMALY_FAILURE_THRESHOLD, 10)
    }

    pub fn attempt_retention(&self) -> Duration {
        self.seconds(keys::ATTEMPT_RETENTION_SECS, 30 * 24 * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::default();
        assert_eq!(settings.lockout_max_attempts(), 3);
        assert_eq!(settings.lockout_window(), Duration::minutes(15));
        assert_eq!(settings.lockout_duration(), Duration::minutes(15));
        assert_eq!(settings.recovery_code_ttl(), Duration::minutes(5));
        assert_eq!(settings.recovery_max_attempts(), 3);
        assert_eq!(settings.access_token_ttl(), Duration::minutes(15));
        assert_eq!(settings.refresh_token_ttl(), Duration::days(7));
        assert_eq!(settings.rate_limit_login_max(), 10);
    }

    #[test]
    fn test_static_config_hot_reload() {
        let config = Arc::new(StaticConfig::new().with(keys::LOCKOUT_MAX_ATTEMPTS, 5));
        let settings = Settings::new(config.clone());
        assert_eq!(settings.lockout_max_attempts(), 5);

        config.set(keys::LOCKOUT_MAX_ATTEMPTS, 2);
        assert_eq!(settings.lockout_max_attempts(), 2);

        config.remove(keys::LOCKOUT_MAX_ATTEMPTS);
        assert_eq!(settings.lockout_max_attempts(), 3);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = StaticConfig::new()
            .with(keys::LOCKOUT_DURATION_SECS, "fifteen minutes")
            .with(keys::RECOVERY_MAX_ATTEMPTS, 0);
        let settings = Settings::new(Arc::new(config));

        assert_eq!(settings.lockout_duration(), Duration::minutes(15));
        assert_eq!(settings.recovery_max_attempts(), 1);
    }

    #[test]
    fn test_oversized_durations_fall_back_to_defaults() {
        let config = Arc::new(
            StaticConfig::new()
                .with(keys::LOCKOUT_DURATION_SECS, "9999999999999999")
                .with(keys::ACCESS_TOKEN_TTL_SECS, 9_000_000_000_000_000i64),
        );
        let settings = Settings::new(config.clone());

        assert_eq!(settings.lockout_duration(), Duration::minutes(15));
        assert_eq!(settings.access_token_ttl(), Duration::minutes(15));

        // The ceiling itself is accepted and safe to add to the current time.
        config.set(keys::REFRESH_TOKEN_TTL_SECS, MAX_DURATION_SECS);
        let ttl = settings.refresh_token_ttl();
        assert_eq!(ttl, Duration::seconds(MAX_DURATION_SECS));
        assert!(chrono::Utc::now().checked_add_signed(ttl).is_some());
    }

    #[test]
    fn test_env_key_mapping() {
        let config = EnvConfig::new();
        assert_eq!(
            config.env_key(keys::LOCKOUT_MAX_ATTEMPTS),
            "PORTCULLIS_LOCKOUT_MAX_ATTEMPTS"
        );
        assert_eq!(
            EnvConfig::with_prefix("APP").env_key("token.access_ttl_secs"),
            "APP_TOKEN_ACCESS_TTL_SECS"
        );
    }
}
