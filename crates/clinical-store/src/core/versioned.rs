//! Versioned storage trait.
//!
//! This module extends [`ResourceStorage`] with version-aware operations:
//! version reads and optimistic locking against an expected version.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ConcurrencyError, StorageError, StorageResult};
use crate::types::StoredResource;

use super::storage::ResourceStorage;

/// Storage trait with version-aware operations.
///
/// # Versioning Model
///
/// Each resource carries a version that starts at "1" and is incremented by
/// exactly one on every update or delete. History keeps every version.
///
/// # Optimistic Locking
///
/// `update_with_match` and `delete_with_match` only succeed when the current
/// version equals the expected one. Of two writers holding the same expected
/// version, exactly one wins; the other receives
/// [`ConcurrencyError::VersionConflict`] carrying the current version.
///
/// # Example
///
/// ```ignore
/// use helios_clinical_store::core::{ResourceStorage, VersionedStorage};
///
/// async fn rename<S: VersionedStorage>(storage: &S) -> StorageResult<()> {
///     if let Some(current) = storage.read("Patient", "123").await? {
///         let mut content = current.content().clone();
///         content["name"][0]["family"] = "Updated".into();
///         storage
///             .update_with_match("Patient", "123", current.etag(), content)
///             .await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait VersionedStorage: ResourceStorage {
    /// Reads a specific version of a resource.
    ///
    /// Returns the snapshot even if the resource was later deleted. Returns
    /// `None` if the version does not exist.
    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> StorageResult<Option<StoredResource>>;

    /// Updates a resource only if its current version matches.
    ///
    /// `expected_version` may be a bare version or a weak ETag.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - if the resource doesn't exist or is deleted
    /// * `StorageError::Concurrency(VersionConflict)` - if versions don't match
    async fn update_with_match(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: &str,
        resource: Value,
    ) -> StorageResult<StoredResource>;

    /// Deletes a resource only if its current version matches.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - if the resource doesn't exist or is deleted
    /// * `StorageError::Concurrency(VersionConflict)` - if versions don't match
    async fn delete_with_match(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: &str,
    ) -> StorageResult<()>;

    /// Gets the current version of a live resource.
    async fn current_version(
        &self,
        resource_type: &str,
        id: &str,
    ) -> StorageResult<Option<String>> {
        Ok(self
            .read(resource_type, id)
            .await?
            .map(|r| r.version_id().to_string()))
    }

    /// Lists all version IDs for a resource, oldest first.
    async fn list_versions(&self, resource_type: &str, id: &str) -> StorageResult<Vec<String>>;
}

/// Information about a version conflict.
#[derive(Debug, Clone)]
pub struct VersionConflictInfo {
    /// The resource type.
    pub resource_type: String,
    /// The resource ID.
    pub id: String,
    /// The version that was expected.
    pub expected_version: String,
    /// The actual current version.
    pub actual_version: String,
}

impl VersionConflictInfo {
    /// Creates a new version conflict info.
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        expected_version: impl Into<String>,
        actual_version: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            expected_version: expected_version.into(),
            actual_version: actual_version.into(),
        }
    }

    /// Converts this info into a storage error.
    pub fn into_error(self) -> StorageError {
        StorageError::Concurrency(ConcurrencyError::VersionConflict {
            resource_type: self.resource_type,
            id: self.id,
            expected_version: self.expected_version,
            actual_version: self.actual_version,
        })
    }
}

/// Checks an expected version against the actual one.
///
/// Both sides are normalized with [`normalize_etag`] first.
pub fn check_version_match(
    resource_type: &str,
    id: &str,
    expected: &str,
    actual: &str,
) -> StorageResult<()> {
    let expected = normalize_etag(expected);
    let actual = normalize_etag(actual);
    if expected == actual {
        Ok(())
    } else {
        Err(VersionConflictInfo::new(resource_type, id, expected, actual).into_error())
    }
}

/// Normalizes an ETag to its bare version.
///
/// ETags may be formatted as `W/"1"`, `"1"`, or just `1`.
pub fn normalize_etag(etag: &str) -> &str {
    etag.trim()
        .trim_start_matches("W/")
        .trim_start_matches('"')
        .trim_end_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_into_error() {
        let error = VersionConflictInfo::new("Patient", "123", "1", "2").into_error();
        match error {
            StorageError::Concurrency(ConcurrencyError::VersionConflict {
                actual_version,
                ..
            }) => assert_eq!(actual_version, "2"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_check_version_match() {
        assert!(check_version_match("Patient", "123", "1", "1").is_ok());
        assert!(check_version_match("Patient", "123", "W/\"1\"", "1").is_ok());
        assert!(check_version_match("Patient", "123", "1", "2").is_err());
    }

    #[test]
    fn test_normalize_etag() {
        assert_eq!(normalize_etag("W/\"1\""), "1");
        assert_eq!(normalize_etag("\"1\""), "1");
        assert_eq!(normalize_etag("1"), "1");
        assert_eq!(normalize_etag(" W/\"12\" "), "12");
    }
}
