use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::{
    Error, SubjectId,
    error::utilities::DatabaseResultExt,
    repositories::RevocationRepository,
    storage::RevokedToken,
};
use sqlx::SqlitePool;

use super::from_millis;

pub struct SqliteRevocationRepository {
    pool: SqlitePool,
}

impl SqliteRevocationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteRevokedToken {
    jti: String,
    subject_id: String,
    reason: String,
    revoked_at: i64,
    expires_at: i64,
}

impl TryFrom<SqliteRevokedToken> for RevokedToken {
    type Error = Error;

    fn try_from(row: SqliteRevokedToken) -> Result<Self, Self::Error> {
        Ok(RevokedToken {
            jti: row.jti,
            subject_id: SubjectId::new(&row.subject_id),
            reason: row.reason.parse()?,
            revoked_at: from_millis(row.revoked_at),
            expires_at: from_millis(row.expires_at),
        })
    }
}

#[async_trait]
impl RevocationRepository for SqliteRevocationRepository {
    async fn revoke(&self, entry: RevokedToken) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO portcullis_revoked_tokens (jti, subject_id, reason, revoked_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(&entry.jti)
        .bind(entry.subject_id.as_str())
        .bind(entry.reason.as_str())
        .bind(entry.revoked_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_db_err("Failed to revoke token")?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, jti: &str) -> Result<Option<RevokedToken>, Error> {
        let row = sqlx::query_as::<_, SqliteRevokedToken>(
            "SELECT * FROM portcullis_revoked_tokens WHERE jti = ?1",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to find revoked token")?;

        row.map(RevokedToken::try_from).transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM portcullis_revoked_tokens WHERE expires_at <= ?1")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_db_err("Failed to purge revoked tokens")?;

        Ok(result.rows_affected())
    }
}
