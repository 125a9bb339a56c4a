//! Core types for the clinical store.
//!
//! - [`StoredResource`] - a document with persistence metadata
//! - [`SearchQuery`] and friends - the raw search request
//! - [`Page`], [`PageCursor`] - pagination types
//!
//! # Building a Search Query
//!
//! ```
//! use helios_clinical_store::types::{SearchQuery, SortDirective};
//!
//! let query = SearchQuery::new("Observation")
//!     .with_param("code-value-quantity", "http://loinc.org|8480-6$gt100")
//!     .with_param("subject:missing", "false")
//!     .with_sort(SortDirective::parse("-_lastUpdated"))
//!     .with_count(20);
//!
//! assert_eq!(query.parameters.len(), 2);
//! ```

mod pagination;
mod search_params;
mod stored_resource;

pub use pagination::{CursorValue, Page, PageCursor, PageInfo};

pub use search_params::{
    split_or_values, CompartmentScope, SearchModifier, SearchParamType, SearchPrefix,
    SearchQuery, SearchValue, SortDirection, SortDirective,
};

pub use stored_resource::{ResourceMethod, StoredResource};
