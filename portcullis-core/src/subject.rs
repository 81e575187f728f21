//! Authentication subjects
//!
//! A subject is the identity whose credentials this engine protects. The
//! engine reads the lookup keys, the activation flag and the token version;
//! everything else about the account belongs to the host application.
//!
//! | Field           | Type               | Description                                              |
//! | --------------- | ------------------ | -------------------------------------------------------- |
//! | `id`            | `SubjectId`        | Opaque identifier, prefixed with `sub_`.                 |
//! | `email`         | `String`           | Primary login key.                                       |
//! | `document`      | `Option<String>`   | Secondary login key, a national document number.         |
//! | `active`        | `bool`             | Inactive subjects cannot log in or use their tokens.     |
//! | `token_version` | `u64`              | Bumped to invalidate every access token issued before.   |
//! | `created_at`    | `DateTime`         | Creation timestamp.                                      |
//! | `updated_at`    | `DateTime`         | Last modification timestamp.                             |
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ValidationError, utilities::RequiredFieldExt},
    id::{SUBJECT_PREFIX, generate_prefixed_id, validate_prefixed_id},
    validation::{validate_document, validate_email},
};

/// A unique, stable identifier for a subject. Treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: &str) -> Self {
        SubjectId(id.to_string())
    }

    pub fn new_random() -> Self {
        SubjectId(generate_prefixed_id(SUBJECT_PREFIX))
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        validate_prefixed_id(&self.0, SUBJECT_PREFIX)
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub email: String,
    pub document: Option<String>,
    pub active: bool,
    pub token_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a subject in the identity store.
#[derive(Debug, Clone)]
pub struct NewSubject {
    pub id: SubjectId,
    pub email: String,
    pub document: Option<String>,
    pub password_hash: Option<String>,
}

impl NewSubject {
    pub fn builder() -> NewSubjectBuilder {
        NewSubjectBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct NewSubjectBuilder {
    id: Option<SubjectId>,
    email: Option<String>,
    document: Option<String>,
    password_hash: Option<String>,
}

impl NewSubjectBuilder {
    pub fn id(mut self, id: SubjectId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn document(mut self, document: Option<String>) -> Self {
        self.document = document;
        self
    }

    pub fn password_hash(mut self, hash: Option<String>) -> Self {
        self.password_hash = hash;
        self
    }

    /// Validates the lookup keys and normalizes the email to lowercase.
    pub fn build(self) -> Result<NewSubject, ValidationError> {
        let email = self.email.require_field("Email")?.trim().to_lowercase();
        validate_email(&email)?;

        let document = self.document.map(|d| d.trim().to_string());
        if let Some(document) = &document {
            validate_document(document)?;
        }

        Ok(NewSubject {
            id: self.id.unwrap_or_else(SubjectId::new_random),
            email,
            document,
            password_hash: self.password_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_id() {
        let id = SubjectId::new_random();
        assert!(id.as_str().starts_with("sub_"));
        assert!(id.is_valid());
        assert!(!SubjectId::new("usr_123").is_valid());
    }

    #[test]
    fn test_builder_normalizes_email() {
        let subject = NewSubject::builder()
            .email("  A@X.com ")
            .document(Some("12345678".to_string()))
            .build()
            .unwrap();
        assert_eq!(subject.email, "a@x.com");
        assert_eq!(subject.document.as_deref(), Some("12345678"));
        assert!(subject.id.is_valid());
    }

    #[test]
    fn test_builder_requires_email() {
        let err = NewSubject::builder().build().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField(_)));

        let err = NewSubject::builder().email("nope").build().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEmail(_)));
    }
}
