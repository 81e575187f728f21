//! SQLite implementation of the attempt ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::{
    AttemptOutcome, Error, Identity,
    error::utilities::DatabaseResultExt,
    repositories::AttemptRepository,
    storage::{AttemptRecord, NewAttempt},
};
use sqlx::SqlitePool;

use super::from_millis;

/// Rows match an identity by email or by document, whichever the identity has.
const MATCHES_IDENTITY: &str =
    "((?1 IS NOT NULL AND email = ?1) OR (?2 IS NOT NULL AND document = ?2))";

pub struct SqliteAttemptRepository {
    pool: SqlitePool,
}

impl SqliteAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteAttempt {
    id: i64,
    email: Option<String>,
    document: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    outcome: String,
    detail: String,
    attempted_at: i64,
}

impl TryFrom<SqliteAttempt> for AttemptRecord {
    type Error = Error;

    fn try_from(row: SqliteAttempt) -> Result<Self, Self::Error> {
        let outcome: AttemptOutcome = row.outcome.parse()?;
        let detail = serde_json::from_str(&row.detail).unwrap_or(serde_json::Value::Null);

        Ok(AttemptRecord {
            id: row.id,
            email: row.email,
            document: row.document,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            outcome,
            detail,
            attempted_at: from_millis(row.attempted_at),
        })
    }
}

#[async_trait]
impl AttemptRepository for SqliteAttemptRepository {
    async fn record(&self, attempt: NewAttempt) -> Result<AttemptRecord, Error> {
        let row = sqlx::query_as::<_, SqliteAttempt>(
            r#"
            INSERT INTO portcullis_attempts
                (email, document, ip_address, user_agent, outcome, detail, attempted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            RETURNING *
            "#,
        )
        .bind(&attempt.identity.email)
        .bind(&attempt.identity.document)
        .bind(&attempt.origin.ip_address)
        .bind(&attempt.origin.user_agent)
        .bind(attempt.outcome.as_str())
        .bind(attempt.detail.to_string())
        .bind(attempt.attempted_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_db_err("Failed to record attempt")?;

        row.try_into()
    }

    async fn last_success_at(
        &self,
        identity: &Identity,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        let latest: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT MAX(attempted_at) FROM portcullis_attempts WHERE {MATCHES_IDENTITY} AND outcome = ?3"
        ))
        .bind(&identity.email)
        .bind(&identity.document)
        .bind(AttemptOutcome::Success.as_str())
        .fetch_one(&self.pool)
        .await
        .map_db_err("Failed to get last success")?;

        Ok(latest.map(from_millis))
    }

    async fn count_failures_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let count: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*) FROM portcullis_attempts
            WHERE {MATCHES_IDENTITY}
            AND outcome IN (?3, ?4)
            AND attempted_at >= ?5
            "#
        ))
        .bind(&identity.email)
        .bind(&identity.document)
        .bind(AttemptOutcome::BadCredential.as_str())
        .bind(AttemptOutcome::BadIdentity.as_str())
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_db_err("Failed to count failures")?;

        Ok(count as u32)
    }

    async fn find_recent(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<Vec<AttemptRecord>, Error> {
        let rows = sqlx::query_as::<_, SqliteAttempt>(&format!(
            r#"
            SELECT * FROM portcullis_attempts
            WHERE {MATCHES_IDENTITY}
            ORDER BY attempted_at DESC, id DESC
            LIMIT ?3
            "#
        ))
        .bind(&identity.email)
        .bind(&identity.document)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_db_err("Failed to find recent attempts")?;

        rows.into_iter().map(AttemptRecord::try_from).collect()
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM portcullis_attempts WHERE attempted_at < ?1")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_db_err("Failed to cleanup attempts")?;

        Ok(result.rows_affected())
    }
}
