use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::{
    Error,
    error::utilities::DatabaseResultExt,
    repositories::RecoveryCodeRepository,
    storage::{NewRecoveryCode, RecoveryCode},
};
use sqlx::SqlitePool;

use super::from_millis;

pub struct SqliteRecoveryCodeRepository {
    pool: SqlitePool,
}

impl SqliteRecoveryCodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteRecoveryCode {
    id: String,
    identity: String,
    purpose: String,
    code_hash: String,
    created_at: i64,
    expires_at: i64,
    consumed: bool,
    attempts_used: i64,
    max_attempts: i64,
}

impl From<SqliteRecoveryCode> for RecoveryCode {
    fn from(row: SqliteRecoveryCode) -> Self {
        RecoveryCode {
            id: row.id,
            identity: row.identity,
            purpose: row.purpose,
            code_hash: row.code_hash,
            created_at: from_millis(row.created_at),
            expires_at: from_millis(row.expires_at),
            consumed: row.consumed,
            attempts_used: row.attempts_used.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
        }
    }
}

#[async_trait]
impl RecoveryCodeRepository for SqliteRecoveryCodeRepository {
    async fn replace_pending(&self, code: NewRecoveryCode) -> Result<RecoveryCode, Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_db_err("Failed to begin transaction")?;

        sqlx::query(
            r#"
            UPDATE portcullis_recovery_codes
            SET consumed = 1
            WHERE identity = ?1 AND purpose = ?2 AND consumed = 0
            "#,
        )
        .bind(&code.identity)
        .bind(&code.purpose)
        .execute(&mut *tx)
        .await
        .map_db_err("Failed to supersede pending recovery code")?;

        let row = sqlx::query_as::<_, SqliteRecoveryCode>(
            r#"
            INSERT INTO portcullis_recovery_codes
                (id, identity, purpose, code_hash, created_at, expires_at, consumed, attempts_used, max_attempts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7)
            RETURNING *
            "#,
        )
        .bind(&code.id)
        .bind(&code.identity)
        .bind(&code.purpose)
        .bind(&code.code_hash)
        .bind(code.created_at.timestamp_millis())
        .bind(code.expires_at.timestamp_millis())
        .bind(i64::from(code.max_attempts))
        .fetch_one(&mut *tx)
        .await
        .map_db_err("Failed to insert recovery code")?;

        tx.commit()
            .await
            .map_db_err("Failed to commit recovery code")?;

        Ok(row.into())
    }

    async fn find_unconsumed(
        &self,
        identity: &str,
        purpose: &str,
    ) -> Result<Option<RecoveryCode>, Error> {
        let row = sqlx::query_as::<_, SqliteRecoveryCode>(
            r#"
            SELECT * FROM portcullis_recovery_codes
            WHERE identity = ?1 AND purpose = ?2 AND consumed = 0
            "#,
        )
        .bind(identity)
        .bind(purpose)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to find recovery code")?;

        Ok(row.map(RecoveryCode::from))
    }

    async fn register_attempt(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RecoveryCode>, Error> {
        // The guard and the increment are one statement, so concurrent guesses
        // each get a distinct slot or none at all.
        let row = sqlx::query_as::<_, SqliteRecoveryCode>(
            r#"
            UPDATE portcullis_recovery_codes
            SET attempts_used = attempts_used + 1
            WHERE id = ?1
              AND consumed = 0
              AND attempts_used < max_attempts
              AND expires_at > ?2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to register recovery attempt")?;

        Ok(row.map(RecoveryCode::from))
    }

    async fn consume(&self, id: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE portcullis_recovery_codes SET consumed = 1 WHERE id = ?1 AND consumed = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_db_err("Failed to consume recovery code")?;

        Ok(result.rows_affected() > 0)
    }

    async fn cleanup(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query(
            "DELETE FROM portcullis_recovery_codes WHERE consumed = 1 OR expires_at < ?1",
        )
        .bind(before.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_db_err("Failed to cleanup recovery codes")?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_pool;
    use chrono::Duration;
    use portcullis_core::{Clock, ManualClock};

    fn new_code(id: &str, now: DateTime<Utc>) -> NewRecoveryCode {
        NewRecoveryCode {
            id: id.to_string(),
            identity: "a@x.com".to_string(),
            purpose: "password-reset".to_string(),
            code_hash: format!("hash-{id}"),
            created_at: now,
            expires_at: now + Duration::minutes(5),
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_replace_pending_supersedes_previous() {
        let repo = SqliteRecoveryCodeRepository::new(test_pool().await);
        let now = ManualClock::starting_now().now();

        repo.replace_pending(new_code("rc_1", now)).await.unwrap();
        let second = repo.replace_pending(new_code("rc_2", now)).await.unwrap();

        let pending = repo
            .find_unconsumed("a@x.com", "password-reset")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending, second);
        assert!(!repo.consume("rc_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_attempt_stops_at_cap() {
        let repo = SqliteRecoveryCodeRepository::new(test_pool().await);
        let now = ManualClock::starting_now().now();
        repo.replace_pending(new_code("rc_1", now)).await.unwrap();

        for used in 1..=3 {
            let code = repo.register_attempt("rc_1", now).await.unwrap().unwrap();
            assert_eq!(code.attempts_used, used);
        }
        assert!(repo.register_attempt("rc_1", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_attempt_rejects_expired_and_consumed() {
        let repo = SqliteRecoveryCodeRepository::new(test_pool().await);
        let now = ManualClock::starting_now().now();
        repo.replace_pending(new_code("rc_1", now)).await.unwrap();

        assert!(
            repo.register_attempt("rc_1", now + Duration::minutes(5))
                .await
                .unwrap()
                .is_none()
        );

        assert!(repo.consume("rc_1").await.unwrap());
        assert!(repo.register_attempt("rc_1", now).await.unwrap().is_none());
        assert!(
            repo.find_unconsumed("a@x.com", "password-reset")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_cleanup() {
        let repo = SqliteRecoveryCodeRepository::new(test_pool().await);
        let now = ManualClock::starting_now().now();

        repo.replace_pending(new_code("rc_1", now)).await.unwrap();
        repo.replace_pending(new_code("rc_2", now)).await.unwrap();
        repo.replace_pending(NewRecoveryCode {
            identity: "b@x.com".to_string(),
            ..new_code("rc_3", now)
        })
        .await
        .unwrap();

        // rc_1 was superseded; rc_2 and rc_3 are still live.
        assert_eq!(repo.cleanup(now).await.unwrap(), 1);
        assert_eq!(repo.cleanup(now + Duration::minutes(6)).await.unwrap(), 2);
    }
}
