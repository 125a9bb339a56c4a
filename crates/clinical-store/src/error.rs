//! Error types for the clinical store.
//!
//! Errors are grouped by category. Each category is its own enum and the
//! top-level [`StorageError`] wraps them transparently, so callers can match
//! either on the broad category or on the precise variant.
//!
//! Two categories never abort an operation on their own:
//!
//! - [`IndexingError`] values are collected while deriving search rows. The
//!   write still commits and the resource is flagged as under-indexed.
//! - [`QueryError`] values are collected while planning a search. The offending
//!   filter matches nothing and the rest of the request still applies.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Concurrency and versioning errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Search-index derivation errors
    #[error(transparent)]
    Indexing(#[from] IndexingError),

    /// Search request errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StorageError {
    /// Returns true if this is a version conflict.
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::Concurrency(ConcurrencyError::VersionConflict { .. })
        )
    }

    /// Returns true if no live resource exists for the identity, whether it
    /// never existed or has been deleted.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::Resource(ResourceError::NotFound { .. } | ResourceError::Gone { .. })
        )
    }
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// No live row exists for the identity.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// A live resource with the given ID already exists.
    #[error("resource already exists: {resource_type}/{id}")]
    AlreadyExists { resource_type: String, id: String },

    /// The resource has been deleted.
    #[error("resource deleted: {resource_type}/{id}")]
    Gone {
        resource_type: String,
        id: String,
        deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// The requested version of the resource was not found.
    #[error("version not found: {resource_type}/{id}/_history/{version_id}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version_id: String,
    },
}

/// Errors related to concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// The expected-version precondition did not hold.
    ///
    /// `actual_version` is the current version, so the caller can re-read and retry.
    #[error("version conflict on {resource_type}/{id}: expected {expected_version}, found {actual_version}")]
    VersionConflict {
        resource_type: String,
        id: String,
        expected_version: String,
        actual_version: String,
    },
}

/// Errors raised when a document fails minimal structural requirements.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The document is not acceptable as a resource.
    #[error("invalid resource: {message}")]
    InvalidResource { message: String },

    /// A required field is missing.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// The resource type name is not usable.
    #[error("unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },

    /// A search parameter descriptor could not be registered.
    #[error("invalid search parameter '{name}': {message}")]
    InvalidSearchParameter { name: String, message: String },
}

/// Errors raised while deriving search rows from a document.
///
/// These are recovered locally: the offending value is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexingError {
    /// A value was present but could not be classified for its parameter type.
    #[error("cannot index {resource_type}.{param_name}: {message}")]
    UnclassifiableValue {
        resource_type: String,
        param_name: String,
        message: String,
    },

    /// A descriptor path could not be parsed.
    #[error("invalid extraction path '{path}': {message}")]
    InvalidPath { path: String, message: String },
}

/// Errors raised while interpreting a search request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The parameter name is not declared for the resource type.
    #[error("unknown search parameter '{name}' for {resource_type}")]
    UnknownParameter { resource_type: String, name: String },

    /// A value, modifier or comparator could not be parsed.
    #[error("malformed value for '{name}': {message}")]
    MalformedValue { name: String, message: String },

    /// The request mixes features that cannot be combined.
    #[error("unsupported parameter combination: {message}")]
    UnsupportedCombination { message: String },

    /// A conditional request carried no usable criteria.
    #[error("conditional criteria '{criteria}' contain no usable search parameter")]
    EmptyCriteria { criteria: String },
}

/// Errors from the storage backend itself.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Failed to open a connection.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// No pooled connection became available in time.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Document (de)serialization failed.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Schema migration failed.
    #[error("migration error: {message}")]
    MigrationError { message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Resource(ResourceError::NotFound {
            resource_type: "Patient".to_string(),
            id: "123".to_string(),
        });
        assert_eq!(err.to_string(), "resource not found: Patient/123");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_deleted_resource_is_not_found() {
        let err = StorageError::Resource(ResourceError::Gone {
            resource_type: "Patient".to_string(),
            id: "123".to_string(),
            deleted_at: None,
        });
        assert!(err.is_not_found());
        assert!(!err.is_version_conflict());
    }

    #[test]
    fn test_version_conflict_reports_current_version() {
        let err = StorageError::from(ConcurrencyError::VersionConflict {
            resource_type: "Patient".to_string(),
            id: "123".to_string(),
            expected_version: "1".to_string(),
            actual_version: "2".to_string(),
        });
        assert!(err.is_version_conflict());
        assert_eq!(
            err.to_string(),
            "version conflict on Patient/123: expected 1, found 2"
        );
    }

    #[test]
    fn test_indexing_error_display() {
        let err = IndexingError::UnclassifiableValue {
            resource_type: "Patient".to_string(),
            param_name: "birthdate".to_string(),
            message: "'yesterday' is not a date".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot index Patient.birthdate: 'yesterday' is not a date"
        );
    }

    #[test]
    fn test_query_error_into_storage_error() {
        let err: StorageError = QueryError::EmptyCriteria {
            criteria: "_count=1".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            StorageError::Query(QueryError::EmptyCriteria { .. })
        ));
    }

    #[test]
    fn test_serde_error_becomes_serialization_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StorageError = json_err.into();
        assert!(matches!(
            err,
            StorageError::Backend(BackendError::SerializationError { .. })
        ));
    }
}
