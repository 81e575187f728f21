//! Repository trait for the identity store.

use async_trait::async_trait;

use crate::{
    Error,
    subject::{NewSubject, Subject, SubjectId},
};

/// The slice of the identity store this engine reads and writes.
#[async_trait]
pub trait SubjectRepository: Send + Sync + 'static {
    async fn create(&self, subject: NewSubject) -> Result<Subject, Error>;

    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, Error>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>, Error>;

    async fn find_by_document(&self, document: &str) -> Result<Option<Subject>, Error>;

    async fn get_password_hash(&self, id: &SubjectId) -> Result<Option<String>, Error>;

    async fn set_password_hash(&self, id: &SubjectId, hash: &str) -> Result<(), Error>;

    async fn set_active(&self, id: &SubjectId, active: bool) -> Result<(), Error>;

    /// Atomically increment the token version and return the new value.
    async fn increment_token_version(&self, id: &SubjectId) -> Result<u64, Error>;
}
