//! Search provider traits.
//!
//! - [`SearchProvider`] - single-type search over the derived index
//! - [`CompartmentSearchProvider`] - patient-compartment membership

use async_trait::async_trait;

use crate::error::{QueryError, StorageResult};
use crate::types::{Page, SearchQuery, StoredResource};

use super::storage::ResourceStorage;

/// Result of a search operation.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matching resources for the requested page.
    pub resources: Page<StoredResource>,

    /// Total number of matches across all pages.
    pub total: u64,

    /// Parameters that were ignored or narrowed to match nothing.
    pub warnings: Vec<QueryError>,
}

impl SearchResult {
    /// Creates a new search result.
    pub fn new(resources: Page<StoredResource>, total: u64) -> Self {
        Self {
            resources,
            total,
            warnings: Vec::new(),
        }
    }

    /// Creates a result that matches nothing.
    pub fn empty() -> Self {
        Self::new(Page::empty(), 0)
    }

    /// Attaches planner warnings.
    pub fn with_warnings(mut self, warnings: Vec<QueryError>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Returns the logical ids of the resources in this page, in order.
    pub fn ids(&self) -> Vec<&str> {
        self.resources.items.iter().map(|r| r.id()).collect()
    }
}

/// Basic search provider for single resource type queries.
///
/// Values of one parameter name are ORed; distinct names are ANDed.
/// Deleted resources never match. Unknown parameters are ignored and
/// reported in [`SearchResult::warnings`]; a malformed value narrows its
/// filter to match nothing.
///
/// # Example
///
/// ```ignore
/// use helios_clinical_store::core::SearchProvider;
/// use helios_clinical_store::types::SearchQuery;
///
/// async fn find_high_systolic<S: SearchProvider>(storage: &S) -> StorageResult<()> {
///     let query = SearchQuery::new("Observation")
///         .with_param("code-value-quantity", "http://loinc.org|8480-6$gt100")
///         .with_count(20);
///
///     let result = storage.search(&query).await?;
///     for resource in result.resources.items {
///         println!("Found: {}", resource.url());
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SearchProvider: ResourceStorage {
    /// Searches for resources matching the query.
    ///
    /// # Returns
    ///
    /// The requested page, the total match count and any planner warnings.
    async fn search(&self, query: &SearchQuery) -> StorageResult<SearchResult>;

    /// Counts resources matching the query without returning them.
    async fn search_count(&self, query: &SearchQuery) -> StorageResult<u64>;
}

/// Provider for compartment membership queries.
#[async_trait]
pub trait CompartmentSearchProvider: SearchProvider {
    /// Returns every live resource in the given compartment.
    ///
    /// For the Patient compartment this includes the Patient itself.
    async fn compartment_members(
        &self,
        compartment_type: &str,
        compartment_id: &str,
    ) -> StorageResult<Vec<StoredResource>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageInfo;

    #[test]
    fn test_search_result_ids() {
        let items = vec![
            StoredResource::new("Patient", "a", serde_json::json!({})),
            StoredResource::new("Patient", "b", serde_json::json!({})),
        ];
        let result = SearchResult::new(Page::new(items, PageInfo::end()), 2);
        assert_eq!(result.ids(), vec!["a", "b"]);
        assert!(result.warnings.is_empty());
        assert_eq!(SearchResult::empty().total, 0);
    }
}
