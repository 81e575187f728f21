//! SQLite storage backend for portcullis
//!
//! Persists subjects, the attempt ledger, lockouts, recovery codes, the
//! revocation list and the refresh token registry, so lockout and token
//! state survives a restart.
//!
//! ```rust,no_run
//! use portcullis_core::repositories::RepositoryProvider;
//! use portcullis_storage_sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), portcullis_core::Error> {
//! let storage = SqliteStorage::connect("sqlite://portcullis.db").await?;
//! storage.migrate().await?;
//! let repositories = storage.into_repository_provider();
//! repositories.health_check().await?;
//! # Ok(())
//! # }
//! ```
pub mod migrations;
pub mod repositories;

pub use repositories::SqliteRepositoryProvider;

use std::str::FromStr;

use portcullis_core::{Error, error::StorageError, repositories::RepositoryProvider};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url`, creating the database file if needed.
    ///
    /// An in-memory database lives only as long as its connection, so memory
    /// URLs get a single connection that is never recycled.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| {
                tracing::error!(error = %e, url, "Invalid SQLite URL");
                StorageError::Connection(format!("Invalid SQLite URL: {url}"))
            })?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            StorageError::Connection("Failed to connect to SQLite".to_string())
        })?;

        tracing::debug!(in_memory, "SQLite pool ready");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        SqliteRepositoryProvider::new(self.pool.clone())
            .migrate()
            .await
    }

    pub fn into_repository_provider(self) -> SqliteRepositoryProvider {
        SqliteRepositoryProvider::new(self.pool)
    }
}
