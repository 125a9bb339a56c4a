//! Search-specific error types.
//!
//! - Registry operations on search parameter descriptors
//! - Bulk re-index bookkeeping

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, ValidationError};

/// Error during registry operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryError {
    /// Parameter with this URL already exists.
    DuplicateUrl {
        /// The duplicate URL.
        url: String,
    },

    /// Invalid parameter definition.
    InvalidDefinition {
        /// URL of the rejected definition.
        url: String,
        /// Description of the problem.
        message: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateUrl { url } => {
                write!(f, "search parameter with URL '{}' already exists", url)
            }
            RegistryError::InvalidDefinition { url, message } => {
                write!(f, "invalid search parameter '{}': {}", url, message)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<RegistryError> for StorageError {
    fn from(err: RegistryError) -> Self {
        let name = match &err {
            RegistryError::DuplicateUrl { url } => url.clone(),
            RegistryError::InvalidDefinition { url, .. } => url.clone(),
        };
        StorageError::Validation(ValidationError::InvalidSearchParameter {
            name,
            message: err.to_string(),
        })
    }
}

/// Error during reindex operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReindexError {
    /// Reindex job not found.
    JobNotFound {
        /// The job ID.
        job_id: String,
    },

    /// Failed to process a resource during reindex.
    ProcessingFailed {
        /// Resource type.
        resource_type: String,
        /// Resource ID.
        resource_id: String,
        /// Error message.
        error: String,
    },

    /// Storage error during reindex.
    StorageError {
        /// Error message.
        message: String,
    },

    /// Reindex was cancelled.
    Cancelled {
        /// Job ID that was cancelled.
        job_id: String,
    },

    /// The saved progress cannot be resumed.
    InvalidProgress {
        /// Why the progress was rejected.
        message: String,
    },
}

impl fmt::Display for ReindexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReindexError::JobNotFound { job_id } => {
                write!(f, "reindex job '{}' not found", job_id)
            }
            ReindexError::ProcessingFailed {
                resource_type,
                resource_id,
                error,
            } => {
                write!(
                    f,
                    "failed to reindex {}/{}: {}",
                    resource_type, resource_id, error
                )
            }
            ReindexError::StorageError { message } => {
                write!(f, "storage error during reindex: {}", message)
            }
            ReindexError::Cancelled { job_id } => {
                write!(f, "reindex job '{}' was cancelled", job_id)
            }
            ReindexError::InvalidProgress { message } => {
                write!(f, "cannot resume reindex: {}", message)
            }
        }
    }
}

impl std::error::Error for ReindexError {}

impl From<StorageError> for ReindexError {
    fn from(err: StorageError) -> Self {
        ReindexError::StorageError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::DuplicateUrl {
            url: "http://example.org/sp".to_string(),
        };
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_registry_error_into_storage_error() {
        let err: StorageError = RegistryError::InvalidDefinition {
            url: "http://example.org/sp".to_string(),
            message: "no base resource type".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::InvalidSearchParameter { .. })
        ));
    }

    #[test]
    fn test_reindex_error_display() {
        let err = ReindexError::ProcessingFailed {
            resource_type: "Patient".to_string(),
            resource_id: "123".to_string(),
            error: "database error".to_string(),
        };
        assert!(err.to_string().contains("Patient/123"));
    }
}
