use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::{
    Error, SubjectId,
    error::utilities::DatabaseResultExt,
    repositories::RefreshRegistryRepository,
    storage::RefreshEntry,
};
use sqlx::SqlitePool;

use super::from_millis;

pub struct SqliteRefreshRegistryRepository {
    pool: SqlitePool,
}

impl SqliteRefreshRegistryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteRefreshEntry {
    jti: String,
    subject_id: String,
    session_id: String,
    issued_at: i64,
    expires_at: i64,
}

impl From<SqliteRefreshEntry> for RefreshEntry {
    fn from(row: SqliteRefreshEntry) -> Self {
        RefreshEntry {
            jti: row.jti,
            subject_id: SubjectId::new(&row.subject_id),
            session_id: row.session_id,
            issued_at: from_millis(row.issued_at),
            expires_at: from_millis(row.expires_at),
        }
    }
}

#[async_trait]
impl RefreshRegistryRepository for SqliteRefreshRegistryRepository {
    async fn register(&self, entry: RefreshEntry) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO portcullis_refresh_tokens (jti, subject_id, session_id, issued_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (jti) DO UPDATE SET
                subject_id = excluded.subject_id,
                session_id = excluded.session_id,
                issued_at = excluded.issued_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&entry.jti)
        .bind(entry.subject_id.as_str())
        .bind(&entry.session_id)
        .bind(entry.issued_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_db_err("Failed to register refresh token")?;

        Ok(())
    }

    async fn contains(&self, subject_id: &SubjectId, jti: &str) -> Result<bool, Error> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM portcullis_refresh_tokens WHERE subject_id = ?1 AND jti = ?2)",
        )
        .bind(subject_id.as_str())
        .bind(jti)
        .fetch_one(&self.pool)
        .await
        .map_db_err("Failed to look up refresh token")?;

        Ok(exists)
    }

    async fn remove(&self, subject_id: &SubjectId, jti: &str) -> Result<bool, Error> {
        let result =
            sqlx::query("DELETE FROM portcullis_refresh_tokens WHERE subject_id = ?1 AND jti = ?2")
                .bind(subject_id.as_str())
                .bind(jti)
                .execute(&self.pool)
                .await
                .map_db_err("Failed to remove refresh token")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error> {
        let rows = sqlx::query_as::<_, SqliteRefreshEntry>(
            "SELECT * FROM portcullis_refresh_tokens WHERE subject_id = ?1 ORDER BY issued_at",
        )
        .bind(subject_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_db_err("Failed to list refresh tokens")?;

        Ok(rows.into_iter().map(RefreshEntry::from).collect())
    }

    async fn clear_subject(&self, subject_id: &SubjectId) -> Result<Vec<RefreshEntry>, Error> {
        let rows = sqlx::query_as::<_, SqliteRefreshEntry>(
            "DELETE FROM portcullis_refresh_tokens WHERE subject_id = ?1 RETURNING *",
        )
        .bind(subject_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_db_err("Failed to clear refresh tokens")?;

        Ok(rows.into_iter().map(RefreshEntry::from).collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM portcullis_refresh_tokens WHERE expires_at <= ?1")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_db_err("Failed to purge refresh tokens")?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_pool;
    use chrono::Duration;
    use portcullis_core::{Clock, ManualClock};

    fn entry(jti: &str, subject: &str, now: DateTime<Utc>) -> RefreshEntry {
        RefreshEntry {
            jti: jti.to_string(),
            subject_id: SubjectId::new(subject),
            session_id: format!("ses_{jti}"),
            issued_at: now,
            expires_at: now + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_register_contains_remove() {
        let repo = SqliteRefreshRegistryRepository::new(test_pool().await);
        let now = ManualClock::starting_now().now();
        let subject = SubjectId::new("sub_1");

        repo.register(entry("tok_1", "sub_1", now)).await.unwrap();
        assert!(repo.contains(&subject, "tok_1").await.unwrap());
        assert!(!repo.contains(&SubjectId::new("sub_2"), "tok_1").await.unwrap());

        assert!(repo.remove(&subject, "tok_1").await.unwrap());
        assert!(!repo.remove(&subject, "tok_1").await.unwrap());
        assert!(!repo.contains(&subject, "tok_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_clear_subject() {
        let repo = SqliteRefreshRegistryRepository::new(test_pool().await);
        let now = ManualClock::starting_now().now();
        let subject = SubjectId::new("sub_1");

        repo.register(entry("tok_1", "sub_1", now)).await.unwrap();
        repo.register(entry("tok_2", "sub_1", now + Duration::seconds(1)))
            .await
            .unwrap();
        repo.register(entry("tok_3", "sub_2", now)).await.unwrap();

        let listed = repo.list_for(&subject).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], entry("tok_1", "sub_1", now));

        let cleared = repo.clear_subject(&subject).await.unwrap();
        assert_eq!(cleared.len(), 2);
        assert!(repo.list_for(&subject).await.unwrap().is_empty());
        assert_eq!(repo.list_for(&SubjectId::new("sub_2")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let repo = SqliteRefreshRegistryRepository::new(test_pool().await);
        let now = ManualClock::starting_now().now();

        repo.register(entry("tok_1", "sub_1", now)).await.unwrap();
        repo.register(entry("tok_2", "sub_1", now + Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(repo.purge_expired(now + Duration::days(7)).await.unwrap(), 1);
        assert!(repo.contains(&SubjectId::new("sub_1"), "tok_2").await.unwrap());
    }
}
