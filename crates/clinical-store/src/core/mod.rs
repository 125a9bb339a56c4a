//! Core storage traits and abstractions.
//!
//! - [`ResourceStorage`] - CRUD operations
//! - [`VersionedStorage`] - version reads and optimistic locking
//! - [`InstanceHistoryProvider`] - per-resource history
//! - [`ConditionalStorage`] - conditional create
//! - [`SearchProvider`] and [`CompartmentSearchProvider`] - search
//!
//! # Trait Hierarchy
//!
//! ```text
//! ResourceStorage
//!     ├── VersionedStorage
//!     │       └── InstanceHistoryProvider
//!     ├── ConditionalStorage
//!     └── SearchProvider
//!             └── CompartmentSearchProvider
//! ```
//!
//! # Example: Implementing a Storage Backend
//!
//! ```ignore
//! use async_trait::async_trait;
//! use helios_clinical_store::core::ResourceStorage;
//! use helios_clinical_store::error::StorageResult;
//! use helios_clinical_store::types::StoredResource;
//!
//! struct MyBackend;
//!
//! #[async_trait]
//! impl ResourceStorage for MyBackend {
//!     fn backend_name(&self) -> &'static str {
//!         "my-backend"
//!     }
//!
//!     async fn create(
//!         &self,
//!         resource_type: &str,
//!         resource: serde_json::Value,
//!     ) -> StorageResult<StoredResource> {
//!         todo!()
//!     }
//!
//!     // ... implement other required methods
//! }
//! ```

pub mod history;
pub mod search;
pub mod storage;
pub mod versioned;

pub use history::{HistoryEntry, HistoryMethod, HistoryPage, HistoryParams, InstanceHistoryProvider};
pub use search::{CompartmentSearchProvider, SearchProvider, SearchResult};
pub use storage::{normalize_criteria, ConditionalCreateResult, ConditionalStorage, ResourceStorage};
pub use versioned::{check_version_match, normalize_etag, VersionConflictInfo, VersionedStorage};
