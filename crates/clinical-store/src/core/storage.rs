//! Core resource storage trait.
//!
//! This module defines the [`ResourceStorage`] trait, which provides the
//! fundamental CRUD operations for clinical resources, and
//! [`ConditionalStorage`] for writes gated on a search predicate.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageResult;
use crate::types::StoredResource;

/// Core storage trait for clinical resources.
///
/// # Versioning
///
/// All mutating operations (create, update, delete) create new versions of
/// resources. The version ID starts at "1" and grows by one per mutation.
///
/// # Soft Deletes
///
/// `delete` marks the resource as deleted but retains its history. Deleted
/// resources are invisible to search and `read` reports them as gone.
///
/// # Atomicity
///
/// Each mutation runs in a single transaction covering the resource row, the
/// history row and the derived search index. Either all of it commits or none
/// of it does.
///
/// # Example
///
/// ```ignore
/// use helios_clinical_store::core::ResourceStorage;
///
/// async fn example<S: ResourceStorage>(storage: &S) -> StorageResult<()> {
///     let patient = serde_json::json!({
///         "resourceType": "Patient",
///         "name": [{"family": "Smith"}]
///     });
///     let stored = storage.create("Patient", patient).await?;
///
///     let mut content = stored.content().clone();
///     content["active"] = serde_json::json!(true);
///     let updated = storage.update("Patient", stored.id(), content).await?;
///     assert_eq!(updated.version_id(), "2");
///
///     storage.delete("Patient", stored.id()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    /// Returns a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Creates a new resource.
    ///
    /// The logical id is taken from the document's `id` field, or generated
    /// when absent. Creating over a tombstone revives the resource with the
    /// next version.
    ///
    /// # Errors
    ///
    /// * `StorageError::Validation` - if the document is not an object or its
    ///   `resourceType` disagrees with `resource_type`
    /// * `StorageError::Resource(AlreadyExists)` - if a live resource with the same id exists
    async fn create(&self, resource_type: &str, resource: Value) -> StorageResult<StoredResource>;

    /// Creates a resource with a specific ID, or updates it if it exists.
    ///
    /// Returns the stored resource and whether it was newly created.
    async fn create_or_update(
        &self,
        resource_type: &str,
        id: &str,
        resource: Value,
    ) -> StorageResult<(StoredResource, bool)>;

    /// Reads the current version of a resource.
    ///
    /// # Returns
    ///
    /// The stored resource, or `None` if it never existed.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(Gone)` - if the resource was deleted
    async fn read(&self, resource_type: &str, id: &str) -> StorageResult<Option<StoredResource>>;

    /// Replaces a resource's content (last write wins).
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - if the resource doesn't exist or is deleted
    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        resource: Value,
    ) -> StorageResult<StoredResource>;

    /// Deletes a resource (soft delete).
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - if the resource doesn't exist or is already deleted
    async fn delete(&self, resource_type: &str, id: &str) -> StorageResult<()>;

    /// Checks if a live resource exists.
    async fn exists(&self, resource_type: &str, id: &str) -> StorageResult<bool> {
        match self.read(resource_type, id).await {
            Ok(found) => Ok(found.is_some()),
            Err(crate::error::StorageError::Resource(crate::error::ResourceError::Gone {
                ..
            })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Counts live resources, of one type or of all types.
    async fn count(&self, resource_type: Option<&str>) -> StorageResult<u64>;
}

/// Result of a conditional create.
#[derive(Debug, Clone)]
pub enum ConditionalCreateResult {
    /// No match; the resource was created.
    Created(StoredResource),

    /// Exactly one match; nothing was written.
    Exists(StoredResource),

    /// More than one match; nothing was written.
    MultipleMatches(usize),
}

impl ConditionalCreateResult {
    /// Returns the resource that was created or found, if exactly one.
    pub fn resource(&self) -> Option<&StoredResource> {
        match self {
            ConditionalCreateResult::Created(r) | ConditionalCreateResult::Exists(r) => Some(r),
            ConditionalCreateResult::MultipleMatches(_) => None,
        }
    }

    /// Returns true if this call created the resource.
    pub fn is_created(&self) -> bool {
        matches!(self, ConditionalCreateResult::Created(_))
    }
}

/// Storage that supports writes gated on search criteria.
#[async_trait]
pub trait ConditionalStorage: ResourceStorage {
    /// Creates a resource unless one already matches `criteria`.
    ///
    /// `criteria` is a query string of equality filters, e.g.
    /// `identifier=http://hospital.org/mrn|12345`. The check and the insert
    /// run in one transaction, and a unique key on the normalized criteria
    /// resolves racing callers: the loser reports `Exists`.
    ///
    /// # Errors
    ///
    /// * `StorageError::Query(EmptyCriteria)` - if no criterion names a known search parameter
    async fn conditional_create(
        &self,
        resource_type: &str,
        resource: Value,
        criteria: &str,
    ) -> StorageResult<ConditionalCreateResult>;
}

/// Normalizes conditional criteria into a stable key.
///
/// Pairs are sorted so that `a=1&b=2` and `b=2&a=1` share one key. Control
/// parameters (names starting with `_` other than `_id`) are dropped.
pub fn normalize_criteria(criteria: &str) -> String {
    let mut pairs: Vec<&str> = criteria
        .split('&')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| {
            let name = p.split_once('=').map(|(n, _)| n).unwrap_or(p);
            !name.starts_with('_') || name == "_id"
        })
        .collect();
    pairs.sort_unstable();
    pairs.dedup();
    pairs.join("&")
}
