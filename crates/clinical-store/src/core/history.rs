//! Instance history.
//!
//! Every mutation appends a version row; [`InstanceHistoryProvider`] pages
//! through them newest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::types::{Page, ResourceMethod, StoredResource};

use super::versioned::VersionedStorage;

/// Parameters for history queries.
#[derive(Debug, Clone)]
pub struct HistoryParams {
    /// Only include versions recorded at or after this time.
    pub since: Option<DateTime<Utc>>,

    /// Only include versions recorded before this time.
    pub before: Option<DateTime<Utc>>,

    /// Maximum number of entries per page.
    pub count: u32,

    /// Opaque cursor returned by the previous page.
    pub cursor: Option<String>,

    /// If false, delete entries are skipped.
    pub include_deleted: bool,
}

impl Default for HistoryParams {
    fn default() -> Self {
        Self {
            since: None,
            before: None,
            count: 50,
            cursor: None,
            include_deleted: true,
        }
    }
}

impl HistoryParams {
    /// Creates new history parameters with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the since filter.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Sets the before filter.
    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    /// Sets the page size.
    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Continues from a previous page.
    pub fn after_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Sets whether to include delete entries.
    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }
}

/// A single entry in a resource's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The resource snapshot at this version.
    pub resource: StoredResource,

    /// The operation that produced this version.
    pub method: HistoryMethod,

    /// When this version was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Operation that produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryMethod {
    /// Resource was created.
    Post,
    /// Resource was updated.
    Put,
    /// Resource was deleted.
    Delete,
}

impl From<ResourceMethod> for HistoryMethod {
    fn from(method: ResourceMethod) -> Self {
        match method {
            ResourceMethod::Post => HistoryMethod::Post,
            ResourceMethod::Put => HistoryMethod::Put,
            ResourceMethod::Delete => HistoryMethod::Delete,
        }
    }
}

impl std::fmt::Display for HistoryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryMethod::Post => write!(f, "POST"),
            HistoryMethod::Put => write!(f, "PUT"),
            HistoryMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// A page of history entries.
pub type HistoryPage = Page<HistoryEntry>;

/// Provider for instance-level history.
#[async_trait]
pub trait InstanceHistoryProvider: VersionedStorage {
    /// Gets the history of one resource, newest first.
    ///
    /// History survives deletion: a tombstoned resource still returns every
    /// version including the delete entry.
    async fn history_instance(
        &self,
        resource_type: &str,
        id: &str,
        params: &HistoryParams,
    ) -> StorageResult<HistoryPage>;

    /// Gets the total number of versions for a resource.
    async fn history_instance_count(&self, resource_type: &str, id: &str) -> StorageResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_params_builder() {
        let params = HistoryParams::new().count(5).include_deleted(false);
        assert_eq!(params.count, 5);
        assert!(!params.include_deleted);
        assert!(params.cursor.is_none());
    }

    #[test]
    fn test_history_method_display() {
        assert_eq!(HistoryMethod::Post.to_string(), "POST");
        assert_eq!(HistoryMethod::from(ResourceMethod::Delete), HistoryMethod::Delete);
    }
}
