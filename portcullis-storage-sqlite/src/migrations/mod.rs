//! Schema migrations for the SQLite backend.
//!
//! Each migration runs in its own transaction together with the insert into
//! the tracking table, so a failed migration leaves no partial schema behind.
//! All timestamps are stored as unix milliseconds.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Database, Sqlite, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    /// Execute the migration
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Rollback the migration
    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    /// Human readable name of the migration
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: i64,
}

#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        "_portcullis_migrations"
    }

    /// Initialize migration tracking table
    async fn initialize(&self) -> Result<()>;

    /// Apply pending migrations in order
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Roll back applied migrations, last first
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    async fn is_applied(&self, version: i64) -> Result<bool>;
}

/// Every migration this backend ships, in version order.
pub fn migrations() -> Vec<Box<dyn Migration<Sqlite>>> {
    vec![
        Box::new(CreateSubjectsTable),
        Box::new(CreateAttemptsTable),
        Box::new(CreateLockoutsTable),
        Box::new(CreateRecoveryCodesTable),
        Box::new(CreateRevokedTokensTable),
        Box::new(CreateRefreshTokensTable),
        Box::new(CreateIndexes),
    ]
}

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationManager<Sqlite> for SqliteMigrationManager {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn up(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<()> {
        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;

            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applying migration"
            );

            migration
                .up(&mut *tx as &mut <Sqlite as Database>::Connection)
                .await?;

            sqlx::query(
                format!(
                    "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
                    self.get_migration_table_name()
                )
                .as_str(),
            )
            .bind(migration.version())
            .bind(migration.name())
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    async fn down(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<()> {
        for migration in migrations.iter().rev() {
            if !self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;

            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Rolling back migration"
            );

            migration
                .down(&mut *tx as &mut <Sqlite as Database>::Connection)
                .await?;

            sqlx::query(
                format!(
                    "DELETE FROM {} WHERE version = ?",
                    self.get_migration_table_name()
                )
                .as_str(),
            )
            .bind(migration.version())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        let records = sqlx::query_as::<_, MigrationRecord>(
            format!(
                "SELECT version, name, applied_at FROM {} ORDER BY version",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn is_applied(&self, version: i64) -> Result<bool> {
        let result: bool = sqlx::query_scalar(
            format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE version = ?)",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }
}

pub struct CreateSubjectsTable;

#[async_trait]
impl Migration<Sqlite> for CreateSubjectsTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateSubjectsTable"
    }

    async fn up<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portcullis_subjects (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                document TEXT,
                password_hash TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                token_version INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(email),
                UNIQUE(document)
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS portcullis_subjects")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateAttemptsTable;

#[async_trait]
impl Migration<Sqlite> for CreateAttemptsTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateAttemptsTable"
    }

    async fn up<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portcullis_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT,
                document TEXT,
                ip_address TEXT,
                user_agent TEXT,
                outcome TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT '{}',
                attempted_at INTEGER NOT NULL
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS portcullis_attempts")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateLockoutsTable;

#[async_trait]
impl Migration<Sqlite> for CreateLockoutsTable {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &str {
        "CreateLockoutsTable"
    }

    async fn up<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        // NULL expires_at means locked until explicitly unlocked.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portcullis_lockouts (
                scope TEXT NOT NULL,
                value TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (scope, value)
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS portcullis_lockouts")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateRecoveryCodesTable;

#[async_trait]
impl Migration<Sqlite> for CreateRecoveryCodesTable {
    fn version(&self) -> i64 {
        4
    }

    fn name(&self) -> &str {
        "CreateRecoveryCodesTable"
    }

    async fn up<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portcullis_recovery_codes (
                id TEXT PRIMARY KEY,
                identity TEXT NOT NULL,
                purpose TEXT NOT NULL,
                code_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0,
                attempts_used INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL
            );"#,
        )
        .execute(&mut *conn)
        .await?;

        // At most one pending code per (identity, purpose).
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_recovery_codes_pending
            ON portcullis_recovery_codes(identity, purpose)
            WHERE consumed = 0
            "#,
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS portcullis_recovery_codes")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateRevokedTokensTable;

#[async_trait]
impl Migration<Sqlite> for CreateRevokedTokensTable {
    fn version(&self) -> i64 {
        5
    }

    fn name(&self) -> &str {
        "CreateRevokedTokensTable"
    }

    async fn up<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portcullis_revoked_tokens (
                jti TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                revoked_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS portcullis_revoked_tokens")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateRefreshTokensTable;

#[async_trait]
impl Migration<Sqlite> for CreateRefreshTokensTable {
    fn version(&self) -> i64 {
        6
    }

    fn name(&self) -> &str {
        "CreateRefreshTokensTable"
    }

    async fn up<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portcullis_refresh_tokens (
                jti TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS portcullis_refresh_tokens")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateIndexes;

const INDEXES: &[(&str, &str)] = &[
    ("idx_attempts_email", "portcullis_attempts(email, attempted_at)"),
    ("idx_attempts_document", "portcullis_attempts(document, attempted_at)"),
    ("idx_attempts_attempted_at", "portcullis_attempts(attempted_at)"),
    ("idx_lockouts_expires_at", "portcullis_lockouts(expires_at)"),
    ("idx_recovery_codes_expires_at", "portcullis_recovery_codes(expires_at)"),
    ("idx_revoked_tokens_expires_at", "portcullis_revoked_tokens(expires_at)"),
    ("idx_refresh_tokens_subject_id", "portcullis_refresh_tokens(subject_id)"),
    ("idx_refresh_tokens_expires_at", "portcullis_refresh_tokens(expires_at)"),
];

#[async_trait]
impl Migration<Sqlite> for CreateIndexes {
    fn version(&self) -> i64 {
        7
    }

    fn name(&self) -> &str {
        "CreateIndexes"
    }

    async fn up<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        for (name, target) in INDEXES {
            sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {name} ON {target}"))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut <Sqlite as Database>::Connection) -> Result<()> {
        for (name, _) in INDEXES {
            sqlx::query(&format!("DROP INDEX IF EXISTS {name}"))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    fn setup_test() {
        let _ = tracing_subscriber::fmt().try_init();
    }

    async fn manager() -> SqliteMigrationManager {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");
        SqliteMigrationManager::new(pool)
    }

    #[tokio::test]
    async fn test_migrations() -> Result<()> {
        setup_test();
        let manager = manager().await;

        manager.initialize().await?;
        manager.up(&migrations()).await?;

        let applied = manager.get_applied_migrations().await?;
        let versions: Vec<i64> = applied.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(applied[0].name, "CreateSubjectsTable");

        manager.down(&migrations()).await?;
        assert!(!manager.is_applied(1).await?);
        assert!(manager.get_applied_migrations().await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_up_down_up() -> Result<()> {
        setup_test();
        let manager = manager().await;

        manager.initialize().await?;
        manager.up(&migrations()).await?;
        manager.down(&migrations()).await?;
        manager.up(&migrations()).await?;

        assert!(manager.is_applied(7).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_up_is_idempotent() -> Result<()> {
        setup_test();
        let manager = manager().await;

        manager.initialize().await?;
        manager.initialize().await?;
        manager.up(&migrations()).await?;
        manager.up(&migrations()).await?;

        assert_eq!(manager.get_applied_migrations().await?.len(), 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_code_index_is_unique() -> Result<()> {
        setup_test();
        let manager = manager().await;
        manager.initialize().await?;
        manager.up(&migrations()).await?;

        let insert = |id: &'static str, consumed: i64| {
            sqlx::query(
                r#"
                INSERT INTO portcullis_recovery_codes
                    (id, identity, purpose, code_hash, created_at, expires_at, consumed, max_attempts)
                VALUES (?, 'a@x.com', 'password-reset', 'h', 0, 1, ?, 3)
                "#,
            )
            .bind(id)
            .bind(consumed)
        };

        insert("rc_1", 1).execute(&manager.pool).await?;
        insert("rc_2", 0).execute(&manager.pool).await?;
        assert!(insert("rc_3", 0).execute(&manager.pool).await.is_err());
        Ok(())
    }
}
