use async_trait::async_trait;
use chrono::Utc;
use portcullis_core::{
    Error, NewSubject, Subject, SubjectId,
    error::{StorageError, utilities::DatabaseResultExt},
    repositories::SubjectRepository,
};
use sqlx::SqlitePool;

use super::from_millis;

pub struct SqliteSubjectRepository {
    pool: SqlitePool,
}

impl SqliteSubjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteSubject {
    id: String,
    email: String,
    document: Option<String>,
    active: bool,
    token_version: i64,
    created_at: i64,
    updated_at: i64,
}

impl From<SqliteSubject> for Subject {
    fn from(row: SqliteSubject) -> Self {
        Subject {
            id: SubjectId::new(&row.id),
            email: row.email,
            document: row.document,
            active: row.active,
            token_version: row.token_version.max(0) as u64,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

const SUBJECT_COLUMNS: &str = "id, email, document, active, token_version, created_at, updated_at";

#[async_trait]
impl SubjectRepository for SqliteSubjectRepository {
    async fn create(&self, subject: NewSubject) -> Result<Subject, Error> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query_as::<_, SqliteSubject>(&format!(
            r#"
            INSERT INTO portcullis_subjects
                (id, email, document, password_hash, active, token_version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 1, 0, ?5, ?5)
            RETURNING {SUBJECT_COLUMNS}
            "#
        ))
        .bind(subject.id.as_str())
        .bind(&subject.email)
        .bind(&subject.document)
        .bind(&subject.password_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        let row = match row {
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(StorageError::Constraint(db.message().to_string()).into());
            }
            other => other.map_db_err("Failed to create subject")?,
        };

        Ok(row.into())
    }

    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, Error> {
        let row = sqlx::query_as::<_, SqliteSubject>(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM portcullis_subjects WHERE id = ?1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to find subject")?;

        Ok(row.map(Subject::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>, Error> {
        let row = sqlx::query_as::<_, SqliteSubject>(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM portcullis_subjects WHERE email = ?1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to find subject by email")?;

        Ok(row.map(Subject::from))
    }

    async fn find_by_document(&self, document: &str) -> Result<Option<Subject>, Error> {
        let row = sqlx::query_as::<_, SqliteSubject>(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM portcullis_subjects WHERE document = ?1"
        ))
        .bind(document)
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to find subject by document")?;

        Ok(row.map(Subject::from))
    }

    async fn get_password_hash(&self, id: &SubjectId) -> Result<Option<String>, Error> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT password_hash FROM portcullis_subjects WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_db_err("Failed to get password hash")?;

        Ok(hash.flatten())
    }

    async fn set_password_hash(&self, id: &SubjectId, hash: &str) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE portcullis_subjects SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(hash)
        .bind(Utc::now().timestamp_millis())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_db_err("Failed to set password hash")?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound.into());
        }
        Ok(())
    }

    async fn set_active(&self, id: &SubjectId, active: bool) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE portcullis_subjects SET active = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(active)
        .bind(Utc::now().timestamp_millis())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_db_err("Failed to set subject activation")?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound.into());
        }
        Ok(())
    }

    async fn increment_token_version(&self, id: &SubjectId) -> Result<u64, Error> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE portcullis_subjects
            SET token_version = token_version + 1, updated_at = ?1
            WHERE id = ?2
            RETURNING token_version
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to increment token version")?;

        version
            .map(|v| v.max(0) as u64)
            .ok_or(Error::Storage(StorageError::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_pool;

    fn new_subject(email: &str, document: Option<&str>) -> NewSubject {
        NewSubject::builder()
            .email(email)
            .document(document.map(str::to_string))
            .password_hash(Some("hash".to_string()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = SqliteSubjectRepository::new(test_pool().await);

        let created = repo
            .create(new_subject("a@x.com", Some("12345678")))
            .await
            .unwrap();
        assert!(created.active);
        assert_eq!(created.token_version, 0);

        let by_email = repo.find_by_email("a@x.com").await.unwrap().unwrap();
        let by_document = repo.find_by_document("12345678").await.unwrap().unwrap();
        assert_eq!(by_email.id, created.id);
        assert_eq!(by_document.id, created.id);
        assert!(repo.find_by_email("b@x.com").await.unwrap().is_none());
        assert_eq!(
            repo.get_password_hash(&created.id).await.unwrap().as_deref(),
            Some("hash")
        );
    }

    #[tokio::test]
    async fn test_duplicate_email_is_constraint_violation() {
        let repo = SqliteSubjectRepository::new(test_pool().await);
        repo.create(new_subject("a@x.com", None)).await.unwrap();

        let err = repo.create(new_subject("a@x.com", None)).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_subjects_without_document_do_not_collide() {
        let repo = SqliteSubjectRepository::new(test_pool().await);
        repo.create(new_subject("a@x.com", None)).await.unwrap();
        repo.create(new_subject("b@x.com", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_token_version() {
        let repo = SqliteSubjectRepository::new(test_pool().await);
        let subject = repo.create(new_subject("a@x.com", None)).await.unwrap();

        assert_eq!(repo.increment_token_version(&subject.id).await.unwrap(), 1);
        assert_eq!(repo.increment_token_version(&subject.id).await.unwrap(), 2);

        let missing = repo
            .increment_token_version(&SubjectId::new("sub_missing"))
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::Storage(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_updates() {
        let repo = SqliteSubjectRepository::new(test_pool().await);
        let subject = repo.create(new_subject("a@x.com", None)).await.unwrap();

        repo.set_password_hash(&subject.id, "new").await.unwrap();
        repo.set_active(&subject.id, false).await.unwrap();

        let stored = repo.find_by_id(&subject.id).await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(
            repo.get_password_hash(&subject.id).await.unwrap().as_deref(),
            Some("new")
        );
        assert!(repo.set_active(&SubjectId::new("sub_missing"), true).await.is_err());
    }
}
