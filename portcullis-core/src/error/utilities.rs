use crate::{
    Error,
    error::{StorageError, ValidationError},
};

/// Extension trait for Result types to simplify database error mapping
///
/// Storage backends log the underlying driver error and surface a generic
/// [`StorageError::Database`] carrying only the context message, so driver
/// details never reach callers.
///
/// # Example
///
/// ```rust,ignore
/// use portcullis_core::error::utilities::DatabaseResultExt;
///
/// query.execute(&pool).await.map_db_err("Failed to record attempt")?;
/// ```
pub trait DatabaseResultExt<T> {
    /// Log the error and convert it to a storage error with the given context
    fn map_db_err(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> DatabaseResultExt<T> for Result<T, E> {
    fn map_db_err(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{context}");
            Error::Storage(StorageError::Database(context.to_string()))
        })
    }
}

/// Extension trait for Option types to simplify required field validation
pub trait RequiredFieldExt<T> {
    /// Convert None to a ValidationError::MissingField
    fn require_field(self, field_name: &str) -> Result<T, ValidationError>;
}

impl<T> RequiredFieldExt<T> for Option<T> {
    fn require_field(self, field_name: &str) -> Result<T, ValidationError> {
        self.ok_or_else(|| ValidationError::MissingField(format!("{field_name} is required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_db_err_hides_driver_message() {
        let error_result: Result<i32, &str> = Err("disk I/O error at page 42");
        let mapped = error_result.map_db_err("Failed to save lockout");

        match mapped.unwrap_err() {
            Error::Storage(StorageError::Database(msg)) => {
                assert_eq!(msg, "Failed to save lockout");
            }
            _ => panic!("Expected storage database error"),
        }
    }

    #[test]
    fn test_required_field_ext() {
        assert_eq!(Some(3).require_field("Count").unwrap(), 3);

        let none_value: Option<String> = None;
        match none_value.require_field("Email").unwrap_err() {
            ValidationError::MissingField(msg) => assert_eq!(msg, "Email is required"),
            _ => panic!("Expected missing field validation error"),
        }
    }
}
