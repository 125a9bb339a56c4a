//! Helios Clinical Store
//!
//! This crate provides a versioned document store for clinical resources
//! with a declarative search index. Every write keeps the current state, its
//! full history and the derived search rows consistent inside one database
//! transaction.
//!
//! # Features
//!
//! - **Versioning**: Full resource history with optimistic locking
//! - **Declarative Indexing**: Search parameters are data, not code
//! - **Search**: String, token, reference, date, number, quantity and
//!   composite parameters, `:missing`, chains and compartments
//! - **Conditional Create**: Idempotent creation keyed by search criteria
//! - **Re-indexing**: Resumable, page-by-page rebuild of the search rows
//!
//! # Backend Features
//!
//! Enable backends with feature flags in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! helios-clinical-store = { version = "0.1", features = ["sqlite"] }
//! ```
//!
//! Available backend features:
//! - `sqlite` (default) - SQLite with in-memory and file modes
//!
//! # Architecture
//!
//! - [`types`] - Core types for stored resources and search requests
//! - [`error`] - Error types for all operations
//! - [`core`] - Storage traits and abstractions
//! - [`search`] - Parameter registry, extraction, reference resolution and planning
//! - [`backends`] - Backend implementations
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_clinical_store::backends::sqlite::SqliteBackend;
//! use helios_clinical_store::core::{ResourceStorage, SearchProvider};
//! use helios_clinical_store::types::SearchQuery;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//!
//! backend
//!     .create(
//!         "Observation",
//!         json!({
//!             "status": "final",
//!             "code": {"coding": [{"system": "http://loinc.org", "code": "8480-6"}]},
//!             "valueQuantity": {"value": 120, "unit": "mmHg"}
//!         }),
//!     )
//!     .await?;
//!
//! let query = SearchQuery::parse(
//!     "Observation",
//!     "code-value-quantity=http://loinc.org|8480-6$gt100",
//! );
//! let result = backend.search(&query).await?;
//! assert_eq!(result.total, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Search
//!
//! ```
//! use helios_clinical_store::types::{SearchQuery, SortDirective};
//!
//! let query = SearchQuery::new("Patient")
//!     .with_param("family:contains", "smi")
//!     .with_param("identifier:missing", "true")
//!     .with_sort(SortDirective::parse("-birthdate"))
//!     .with_count(20);
//!
//! assert_eq!(query.parameters.len(), 2);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod core;
pub mod error;
pub mod search;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{StorageError, StorageResult};
pub use types::{SearchQuery, StoredResource};

// Re-export core traits
pub use crate::core::{
    CompartmentSearchProvider, ConditionalStorage, InstanceHistoryProvider, ResourceStorage,
    SearchProvider, VersionedStorage,
};

#[cfg(feature = "sqlite")]
pub use backends::sqlite::{SqliteBackend, SqliteBackendConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
