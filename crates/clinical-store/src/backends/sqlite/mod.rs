//! SQLite backend implementation.
//!
//! This module provides a complete SQLite implementation of the storage,
//! search and re-index traits. It supports both in-memory databases (great
//! for testing) and file-based databases.
//!
//! # Features
//!
//! - In-memory and file-based modes
//! - Versioned CRUD with history and optimistic locking
//! - Conditional create with a unique-key backstop
//! - Indexed search, including composite, chained and compartment queries
//! - Page-by-page re-indexing of the derived search rows
//!
//! # Example
//!
//! ```no_run
//! use helios_clinical_store::backends::sqlite::SqliteBackend;
//! use helios_clinical_store::core::ResourceStorage;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // In-memory databases come with their schema initialized
//! let backend = SqliteBackend::in_memory()?;
//!
//! let patient = backend
//!     .create("Patient", json!({"name": [{"family": "Smith"}]}))
//!     .await?;
//! assert_eq!(patient.version_id(), "1");
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! -- Current state, one row per identity (tombstones included)
//! CREATE TABLE resources (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     resource_type TEXT NOT NULL,
//!     logical_id TEXT NOT NULL,
//!     version_id INTEGER NOT NULL,
//!     data BLOB NOT NULL,
//!     is_deleted INTEGER NOT NULL DEFAULT 0,
//!     under_indexed INTEGER NOT NULL DEFAULT 0,
//!     ...
//!     UNIQUE (resource_type, logical_id)
//! );
//!
//! -- Every version ever written
//! CREATE TABLE resource_history (..., UNIQUE (resource_id, version_id));
//!
//! -- Derived rows, rebuilt on every write
//! CREATE TABLE search_params (...);
//! CREATE TABLE resource_references (...);
//! CREATE TABLE compartments (...);
//!
//! -- Conditional-create backstop
//! CREATE TABLE conditional_keys (..., UNIQUE (resource_type, criteria));
//! ```

mod backend;
mod schema;
pub(crate) mod search;
mod search_impl;
mod storage;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use schema::SCHEMA_VERSION;
