//! Stored resource types.
//!
//! This module defines the [`StoredResource`] type, which wraps a clinical
//! document with persistence metadata such as version and timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resource document with persistence metadata.
///
/// `StoredResource` wraps the JSON document along with:
///
/// - **Identity**: resource type and logical id
/// - **Versioning**: the version id used for optimistic locking
/// - **Timestamps**: creation, modification and deletion times
/// - **Index health**: whether the last indexing pass skipped any value
///
/// # Examples
///
/// ```
/// use helios_clinical_store::types::StoredResource;
/// use serde_json::json;
///
/// let resource = StoredResource::new(
///     "Patient",
///     "123",
///     json!({
///         "resourceType": "Patient",
///         "id": "123",
///         "name": [{"family": "Smith"}]
///     }),
/// );
///
/// assert_eq!(resource.resource_type(), "Patient");
/// assert_eq!(resource.id(), "123");
/// assert_eq!(resource.version_id(), "1");
/// assert_eq!(resource.etag(), "W/\"1\"");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    /// The resource type (e.g., "Patient", "Observation").
    resource_type: String,

    /// The resource's logical ID.
    id: String,

    /// The version ID (monotonically increasing, starting at 1).
    version_id: String,

    /// The document.
    content: Value,

    /// When the resource was first created.
    created_at: DateTime<Utc>,

    /// When the resource was last modified.
    last_modified: DateTime<Utc>,

    /// If the resource has been deleted, when it was deleted.
    deleted_at: Option<DateTime<Utc>>,

    /// Weak ETag derived from the version.
    etag: String,

    /// Operation that produced this version, when known.
    method: Option<ResourceMethod>,

    /// Set when some value could not be indexed.
    under_indexed: bool,
}

/// Operation that produced a resource version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceMethod {
    /// Created.
    Post,
    /// Created or replaced at a known id.
    Put,
    /// Deleted.
    Delete,
}

impl ResourceMethod {
    /// The operation name persisted in the history table.
    pub fn as_operation(&self) -> &'static str {
        match self {
            ResourceMethod::Post => "create",
            ResourceMethod::Put => "update",
            ResourceMethod::Delete => "delete",
        }
    }

    /// Parses a persisted operation name.
    pub fn from_operation(operation: &str) -> Option<Self> {
        match operation {
            "create" => Some(ResourceMethod::Post),
            "update" => Some(ResourceMethod::Put),
            "delete" => Some(ResourceMethod::Delete),
            _ => None,
        }
    }
}

impl StoredResource {
    /// Creates a new version-1 stored resource stamped with the current time.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>, content: Value) -> Self {
        let now = Utc::now();
        Self::from_storage(resource_type, id, "1", content, now, now, None)
            .with_method(ResourceMethod::Post)
    }

    /// Creates a stored resource from persisted data.
    pub fn from_storage(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version_id: impl Into<String>,
        content: Value,
        created_at: DateTime<Utc>,
        last_modified: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        let version_id = version_id.into();
        let etag = format!("W/\"{}\"", version_id);

        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id,
            content,
            created_at,
            last_modified,
            deleted_at,
            etag,
            method: None,
            under_indexed: false,
        }
    }

    /// Sets the operation that produced this version.
    pub fn with_method(mut self, method: ResourceMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the under-indexed flag.
    pub fn with_under_indexed(mut self, under_indexed: bool) -> Self {
        self.under_indexed = under_indexed;
        self
    }

    /// Returns the resource type.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the resource's logical ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the version ID.
    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    /// Returns the version as a number, or 0 if it is not numeric.
    pub fn version_number(&self) -> u64 {
        self.version_id.parse().unwrap_or(0)
    }

    /// Returns the document.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Consumes self and returns the document.
    pub fn into_content(self) -> Value {
        self.content
    }

    /// Returns when the resource was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the resource was last modified.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Returns when the resource was deleted, if applicable.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Returns `true` if the resource has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the weak ETag.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Returns the operation that produced this version.
    pub fn method(&self) -> Option<ResourceMethod> {
        self.method
    }

    /// Returns `true` if the last indexing pass skipped a value.
    pub fn is_under_indexed(&self) -> bool {
        self.under_indexed
    }

    /// Returns the relative URL (e.g., "Patient/123").
    pub fn url(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Checks if the given ETag or bare version matches this resource.
    pub fn matches_etag(&self, etag: &str) -> bool {
        crate::core::normalize_etag(&self.etag) == crate::core::normalize_etag(etag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient() -> StoredResource {
        StoredResource::new(
            "Patient",
            "123",
            json!({"resourceType": "Patient", "id": "123"}),
        )
    }

    #[test]
    fn test_new_resource() {
        let resource = patient();
        assert_eq!(resource.version_id(), "1");
        assert_eq!(resource.version_number(), 1);
        assert_eq!(resource.method(), Some(ResourceMethod::Post));
        assert!(!resource.is_deleted());
        assert!(!resource.is_under_indexed());
    }

    #[test]
    fn test_urls() {
        let resource = patient();
        assert_eq!(resource.url(), "Patient/123");
    }

    #[test]
    fn test_matches_etag() {
        let resource = patient();
        assert!(resource.matches_etag("W/\"1\""));
        assert!(resource.matches_etag("\"1\""));
        assert!(resource.matches_etag("1"));
        assert!(!resource.matches_etag("2"));
    }

    #[test]
    fn test_method_operation_names() {
        for method in [ResourceMethod::Post, ResourceMethod::Put, ResourceMethod::Delete] {
            assert_eq!(ResourceMethod::from_operation(method.as_operation()), Some(method));
        }
        assert_eq!(ResourceMethod::from_operation("patch"), None);
    }
}
