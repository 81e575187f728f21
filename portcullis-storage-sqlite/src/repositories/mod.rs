//! Repository implementations for SQLite storage

pub mod attempt;
pub mod lockout;
pub mod recovery;
pub mod refresh;
pub mod revocation;
pub mod subject;

pub use attempt::SqliteAttemptRepository;
pub use lockout::SqliteLockoutRepository;
pub use recovery::SqliteRecoveryCodeRepository;
pub use refresh::SqliteRefreshRegistryRepository;
pub use revocation::SqliteRevocationRepository;
pub use subject::SqliteSubjectRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::{
    Error,
    error::{StorageError, utilities::DatabaseResultExt},
    repositories::{
        AttemptRepositoryProvider, LockoutRepositoryProvider, RecoveryCodeRepositoryProvider,
        RefreshRegistryRepositoryProvider, RepositoryProvider, RevocationRepositoryProvider,
        SubjectRepositoryProvider,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::migrations::{MigrationManager, SqliteMigrationManager, migrations};

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Repository provider implementation for SQLite
///
/// This struct implements all the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    subject: Arc<SqliteSubjectRepository>,
    attempt: Arc<SqliteAttemptRepository>,
    lockout: Arc<SqliteLockoutRepository>,
    recovery_code: Arc<SqliteRecoveryCodeRepository>,
    revocation: Arc<SqliteRevocationRepository>,
    refresh_registry: Arc<SqliteRefreshRegistryRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            subject: Arc::new(SqliteSubjectRepository::new(pool.clone())),
            attempt: Arc::new(SqliteAttemptRepository::new(pool.clone())),
            lockout: Arc::new(SqliteLockoutRepository::new(pool.clone())),
            recovery_code: Arc::new(SqliteRecoveryCodeRepository::new(pool.clone())),
            revocation: Arc::new(SqliteRevocationRepository::new(pool.clone())),
            refresh_registry: Arc::new(SqliteRefreshRegistryRepository::new(pool.clone())),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl SubjectRepositoryProvider for SqliteRepositoryProvider {
    type SubjectRepo = SqliteSubjectRepository;

    fn subject(&self) -> &Self::SubjectRepo {
        &self.subject
    }
}

impl AttemptRepositoryProvider for SqliteRepositoryProvider {
    type AttemptRepo = SqliteAttemptRepository;

    fn attempt(&self) -> &Self::AttemptRepo {
        &self.attempt
    }
}

impl LockoutRepositoryProvider for SqliteRepositoryProvider {
    type LockoutRepo = SqliteLockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo {
        &self.lockout
    }
}

impl RecoveryCodeRepositoryProvider for SqliteRepositoryProvider {
    type RecoveryCodeRepo = SqliteRecoveryCodeRepository;

    fn recovery_code(&self) -> &Self::RecoveryCodeRepo {
        &self.recovery_code
    }
}

impl RevocationRepositoryProvider for SqliteRepositoryProvider {
    type RevocationRepo = SqliteRevocationRepository;

    fn revocation(&self) -> &Self::RevocationRepo {
        &self.revocation
    }
}

impl RefreshRegistryRepositoryProvider for SqliteRepositoryProvider {
    type RefreshRegistryRepo = SqliteRefreshRegistryRepository;

    fn refresh_registry(&self) -> &Self::RefreshRegistryRepo {
        &self.refresh_registry
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&migrations()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_db_err("Health check failed")?;
        Ok(())
    }
}

/// A migrated in-memory database for repository tests.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let storage = crate::SqliteStorage::connect("sqlite::memory:")
        .await
        .expect("Failed to create pool");
    storage.migrate().await.expect("Failed to run migrations");
    storage.pool().clone()
}
