//! Builder pattern for constructing Portcullis instances
//!
//! This module provides a type-safe builder for creating [`Portcullis`] instances with
//! compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use portcullis::PortcullisBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite and auto-migration
//!     let portcullis = PortcullisBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Or build without auto-migration and run manually
//!     let portcullis = PortcullisBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .build()
//!         .await?;
//!     portcullis.migrate().await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use portcullis_core::{
    Clock, ConfigProvider, JwtConfig, Settings, SystemClock,
    memory::MemoryRepositoryProvider,
    repositories::RepositoryProvider,
    services::{Notifier, TracingNotifier},
};

use crate::{DEFAULT_SWEEP_INTERVAL, Portcullis};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Portcullis instance.
#[derive(Debug, thiserror::Error)]
pub enum PortcullisBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`PortcullisBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
///
/// Contains the repository provider that will be used by Portcullis.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Portcullis`] instances.
///
/// The builder uses a type-state pattern to ensure that storage is configured
/// before building.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build or add more configuration
pub struct PortcullisBuilder<Storage> {
    storage: Storage,
    jwt_config: Option<JwtConfig>,
    settings: Settings,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    sweep_interval: std::time::Duration,
    apply_migrations: bool,
}

impl Default for PortcullisBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl PortcullisBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - JWT: HS256 with a random key generated at build time
    /// - Settings: built-in defaults (3 failures in 15 min lock for 15 min)
    /// - Notifier: [`TracingNotifier`], which only logs
    /// - Clock: [`SystemClock`]
    /// - Sweep interval: one hour
    /// - Apply migrations: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            jwt_config: None,
            settings: Settings::default(),
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            apply_migrations: false,
        }
    }

    fn with_storage<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> PortcullisBuilder<WithStorage<R>> {
        PortcullisBuilder {
            storage: WithStorage { repositories },
            jwt_config: self.jwt_config,
            settings: self.settings,
            notifier: self.notifier,
            clock: self.clock,
            sweep_interval: self.sweep_interval,
            apply_migrations: self.apply_migrations,
        }
    }

    /// Use an already constructed repository provider.
    ///
    /// # Arguments
    ///
    /// * `repositories` - Any [`RepositoryProvider`] implementation
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> PortcullisBuilder<WithStorage<R>> {
        self.with_storage(repositories)
    }

    /// Keep all state in process memory. Nothing survives a restart.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use portcullis::PortcullisBuilder;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let portcullis = PortcullisBuilder::new().with_memory().build().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_memory(self) -> PortcullisBuilder<WithStorage<MemoryRepositoryProvider>> {
        self.with_storage(Arc::new(MemoryRepositoryProvider::new()))
    }
}

// ============================================================================
// Storage Configuration Methods (NoStorage -> WithStorage)
// ============================================================================

#[cfg(feature = "sqlite")]
impl PortcullisBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// The database file is created if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use portcullis::PortcullisBuilder;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let portcullis = PortcullisBuilder::new()
    ///     .with_sqlite("sqlite::memory:")
    ///     .await?
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<PortcullisBuilder<WithStorage<crate::SqliteRepositoryProvider>>, PortcullisBuilderError>
    {
        let storage = crate::SqliteStorage::connect(url)
            .await
            .map_err(|e| PortcullisBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_storage(Arc::new(storage.into_repository_provider())))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// Use this when you already have a SQLite connection pool and want to
    /// share it with Portcullis.
    ///
    /// # Arguments
    ///
    /// * `pool` - An existing SQLite connection pool
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use portcullis::PortcullisBuilder;
    /// use sqlx::SqlitePool;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let pool = SqlitePool::connect("sqlite://portcullis.db").await?;
    ///
    /// let portcullis = PortcullisBuilder::new()
    ///     .with_sqlite_pool(pool)
    ///     .apply_migrations(true)
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> PortcullisBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        self.with_storage(Arc::new(crate::SqliteRepositoryProvider::new(pool)))
    }
}

// ============================================================================
// Configuration Methods (available after storage is configured)
// ============================================================================

impl<R: RepositoryProvider> PortcullisBuilder<WithStorage<R>> {
    /// Set the JWT signing configuration.
    ///
    /// Default: HS256 with a random key, so tokens do not survive a restart
    /// and cannot be verified by other processes.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use portcullis::{JwtConfig, PortcullisBuilder};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let jwt = JwtConfig::new_hs256(b"a-long-shared-secret-from-a-vault".to_vec())
    ///     .with_issuer("accounts.example.com");
    ///
    /// let portcullis = PortcullisBuilder::new()
    ///     .with_sqlite("sqlite::memory:")
    ///     .await?
    ///     .with_jwt_config(jwt)
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_jwt_config(mut self, config: JwtConfig) -> Self {
        self.jwt_config = Some(config);
        self
    }

    /// Read tunables from `provider`.
    ///
    /// Values are looked up on every use, so a provider whose values change
    /// at runtime is picked up without a rebuild.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    ///
    /// use portcullis::{EnvConfig, PortcullisBuilder};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let portcullis = PortcullisBuilder::new()
    ///     .with_sqlite("sqlite::memory:")
    ///     .await?
    ///     .with_config_provider(Arc::new(EnvConfig::new()))
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.settings = Settings::new(provider);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Deliver lockout and recovery messages through `notifier`.
    ///
    /// Sends happen in the background; a failing notifier never fails the
    /// flow that triggered it.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the time source. Tests pass a [`portcullis_core::ManualClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How often the background sweeper runs.
    ///
    /// Default: one hour
    pub fn with_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    ///
    /// When set to `true`, migrations will be applied automatically when
    /// `build()` is called. When `false`, you must call `portcullis.migrate()`
    /// manually after building.
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Build the Portcullis instance.
    ///
    /// If `apply_migrations(true)` was called, migrations will be applied
    /// before returning.
    ///
    /// # Returns
    ///
    /// Returns the configured Portcullis instance, or an error if the
    /// configuration is invalid or migration fails.
    pub async fn build(self) -> Result<Portcullis<R>, PortcullisBuilderError> {
        if self.sweep_interval.is_zero() {
            return Err(PortcullisBuilderError::InvalidConfiguration(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        // Run migrations if requested
        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| PortcullisBuilderError::Migration(e.to_string()))?;
        }

        let jwt = self
            .jwt_config
            .unwrap_or_else(JwtConfig::new_random_hs256);

        Ok(Portcullis::from_builder(
            self.storage.repositories,
            jwt,
            self.settings,
            self.notifier,
            self.clock,
            self.sweep_interval,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_builder_with_defaults() {
        let portcullis = PortcullisBuilder::new().with_memory().build().await.unwrap();

        portcullis.health_check().await.unwrap();
        assert_eq!(portcullis.settings().lockout_max_attempts(), 3);
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_is_rejected() {
        let result = PortcullisBuilder::new()
            .with_memory()
            .with_sweep_interval(std::time::Duration::ZERO)
            .build()
            .await;

        assert!(matches!(
            result,
            Err(PortcullisBuilderError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_jwt_issuer_is_kept() {
        let portcullis = PortcullisBuilder::new()
            .with_memory()
            .with_jwt_config(JwtConfig::new_hs256(vec![7u8; 32]).with_issuer("portcullis-test"))
            .build()
            .await
            .unwrap();

        assert_eq!(
            portcullis.jwt_config().issuer.as_deref(),
            Some("portcullis-test")
        );
    }
}
