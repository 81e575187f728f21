use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::{
    Error, Lockout, LockoutScope,
    error::utilities::DatabaseResultExt,
    repositories::LockoutRepository,
    storage::NewLockout,
};
use sqlx::SqlitePool;

use super::from_millis;

pub struct SqliteLockoutRepository {
    pool: SqlitePool,
}

impl SqliteLockoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteLockout {
    scope: String,
    value: String,
    reason: String,
    created_at: i64,
    expires_at: Option<i64>,
    attempt_count: i64,
}

impl TryFrom<SqliteLockout> for Lockout {
    type Error = Error;

    fn try_from(row: SqliteLockout) -> Result<Self, Self::Error> {
        Ok(Lockout {
            scope: row.scope.parse()?,
            value: row.value,
            reason: row.reason,
            created_at: from_millis(row.created_at),
            expires_at: row.expires_at.map(from_millis),
            attempt_count: row.attempt_count.max(0) as u32,
        })
    }
}

// Same rules as `Lockout::merge`, in one statement: a lapsed row is replaced,
// an active one keeps its creation time and is only lengthened, and an
// indefinite row keeps both its NULL expiry and its reason.
const UPSERT_LOCKOUT: &str = r#"
    INSERT INTO portcullis_lockouts (scope, value, reason, created_at, expires_at, attempt_count)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT (scope, value) DO UPDATE SET
        reason = CASE
            WHEN portcullis_lockouts.expires_at IS NULL THEN portcullis_lockouts.reason
            ELSE excluded.reason
        END,
        created_at = CASE
            WHEN portcullis_lockouts.expires_at IS NULL
                OR portcullis_lockouts.expires_at > excluded.created_at
            THEN portcullis_lockouts.created_at
            ELSE excluded.created_at
        END,
        expires_at = CASE
            WHEN portcullis_lockouts.expires_at IS NOT NULL
                AND portcullis_lockouts.expires_at <= excluded.created_at
            THEN excluded.expires_at
            WHEN portcullis_lockouts.expires_at IS NULL OR excluded.expires_at IS NULL THEN NULL
            ELSE MAX(portcullis_lockouts.expires_at, excluded.expires_at)
        END,
        attempt_count = CASE
            WHEN portcullis_lockouts.expires_at IS NOT NULL
                AND portcullis_lockouts.expires_at <= excluded.created_at
            THEN excluded.attempt_count
            ELSE MAX(portcullis_lockouts.attempt_count, excluded.attempt_count)
        END
    RETURNING *
"#;

#[async_trait]
impl LockoutRepository for SqliteLockoutRepository {
    async fn upsert(&self, lockout: NewLockout) -> Result<Lockout, Error> {
        let row = sqlx::query_as::<_, SqliteLockout>(UPSERT_LOCKOUT)
            .bind(lockout.scope.as_str())
            .bind(&lockout.value)
            .bind(&lockout.reason)
            .bind(lockout.created_at.timestamp_millis())
            .bind(lockout.expires_at.map(|t| t.timestamp_millis()))
            .bind(i64::from(lockout.attempt_count))
            .fetch_one(&self.pool)
            .await
            .map_db_err("Failed to upsert lockout")?;

        row.try_into()
    }

    async fn find(&self, scope: LockoutScope, value: &str) -> Result<Option<Lockout>, Error> {
        let row = sqlx::query_as::<_, SqliteLockout>(
            "SELECT * FROM portcullis_lockouts WHERE scope = ?1 AND value = ?2",
        )
        .bind(scope.as_str())
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to find lockout")?;

        row.map(Lockout::try_from).transpose()
    }

    async fn delete(&self, scope: LockoutScope, value: &str) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM portcullis_lockouts WHERE scope = ?1 AND value = ?2")
            .bind(scope.as_str())
            .bind(value)
            .execute(&self.pool)
            .await
            .map_db_err("Failed to delete lockout")?;

        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query(
            "DELETE FROM portcullis_lockouts WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        )
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_db_err("Failed to cleanup lockouts")?;

        Ok(result.rows_affected())
    }
}
