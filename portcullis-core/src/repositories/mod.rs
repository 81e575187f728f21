//! Repository traits for the data access layer
//!
//! Services talk to storage only through these traits.
//!
//! # Trait Hierarchy
//!
//! - Individual `*Repository` traits define the operations for each store
//! - Individual `*RepositoryProvider` traits give access to each repository type
//! - [`RepositoryProvider`] combines all providers plus lifecycle methods
//!
//! Backends implement every store; the in-memory backend in [`crate::memory`]
//! and the SQLite backend in `portcullis-storage-sqlite` are interchangeable.

pub mod adapter;
pub mod attempt;
pub mod lockout;
pub mod recovery;
pub mod refresh;
pub mod revocation;
pub mod subject;

pub use adapter::{
    AttemptRepositoryAdapter, LockoutRepositoryAdapter, RecoveryCodeRepositoryAdapter,
    RefreshRegistryRepositoryAdapter, RevocationRepositoryAdapter, SubjectRepositoryAdapter,
};
pub use attempt::AttemptRepository;
pub use lockout::LockoutRepository;
pub use recovery::RecoveryCodeRepository;
pub use refresh::RefreshRegistryRepository;
pub use revocation::RevocationRepository;
pub use subject::SubjectRepository;

use async_trait::async_trait;

use crate::Error;

pub trait SubjectRepositoryProvider: Send + Sync + 'static {
    type SubjectRepo: SubjectRepository;

    fn subject(&self) -> &Self::SubjectRepo;
}

pub trait AttemptRepositoryProvider: Send + Sync + 'static {
    type AttemptRepo: AttemptRepository;

    fn attempt(&self) -> &Self::AttemptRepo;
}

pub trait LockoutRepositoryProvider: Send + Sync + 'static {
    type LockoutRepo: LockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo;
}

pub trait RecoveryCodeRepositoryProvider: Send + Sync + 'static {
    type RecoveryCodeRepo: RecoveryCodeRepository;

    fn recovery_code(&self) -> &Self::RecoveryCodeRepo;
}

pub trait RevocationRepositoryProvider: Send + Sync + 'static {
    type RevocationRepo: RevocationRepository;

    fn revocation(&self) -> &Self::RevocationRepo;
}

pub trait RefreshRegistryRepositoryProvider: Send + Sync + 'static {
    type RefreshRegistryRepo: RefreshRegistryRepository;

    fn refresh_registry(&self) -> &Self::RefreshRegistryRepo;
}

/// Provider trait that storage implementations must implement to provide all repositories.
///
/// # Example
///
/// ```rust,ignore
/// use portcullis_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl LockoutRepositoryProvider for MyStorage {
///     type LockoutRepo = MyLockoutRepository;
///     fn lockout(&self) -> &Self::LockoutRepo { &self.lockout_repo }
/// }
///
/// // ... implement other provider traits ...
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider:
    SubjectRepositoryProvider
    + AttemptRepositoryProvider
    + LockoutRepositoryProvider
    + RecoveryCodeRepositoryProvider
    + RevocationRepositoryProvider
    + RefreshRegistryRepositoryProvider
{
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
