//! Search parameter management, indexing and query planning.
//!
//! - [`registry`] - declarative per-type table of search parameters
//! - [`standard`] - the built-in parameter and compartment table
//! - [`extractor`] - path-based value extraction from resources
//! - [`converters`] - conversion of extracted JSON into typed index values
//! - [`references`] - reference classification and compartment derivation
//! - [`composite`] - decoding of `$`-separated composite search values
//! - [`planner`] - turns a raw search request into an executable plan
//! - [`reindex`] - resumable bulk rebuild of the derived search rows
//! - [`errors`] - search-specific error types
//!
//! # Indexing Pipeline
//!
//! ```text
//! resource ──► SearchParameterExtractor ──► Extraction { values, issues }
//!     │                                          │
//!     └──────► ReferenceResolver ──► normalize ──┤
//!                   │                            ▼
//!                   └── references, compartments ──► derived rows
//! ```
//!
//! # Adding a Parameter at Runtime
//!
//! New parameters apply to resources written afterwards. Existing resources
//! pick them up on the next [`ReindexOperation`] run.
//!
//! ```
//! use helios_clinical_store::search::{SearchParameterDefinition, SearchParameterRegistry};
//! use helios_clinical_store::types::SearchParamType;
//!
//! let mut registry = SearchParameterRegistry::with_standard_params();
//! registry
//!     .register(
//!         SearchParameterDefinition::new(
//!             "http://example.org/SearchParameter/Patient-nickname",
//!             "nickname",
//!             SearchParamType::String,
//!             "Patient.name.text",
//!         )
//!         .with_base(["Patient"]),
//!     )
//!     .unwrap();
//!
//! assert!(registry.get_param("Patient", "nickname").is_some());
//! ```

pub mod composite;
pub mod converters;
pub mod errors;
pub mod extractor;
pub mod planner;
pub mod references;
pub mod registry;
pub mod reindex;
pub mod standard;

pub use composite::{translate, ComponentFilter, CompositeMatch};
pub use converters::{DateRange, IndexValue, QuantityLiteral, ValueConverter};
pub use errors::{RegistryError, ReindexError};
pub use extractor::{
    ExtractedValue, Extraction, PathExpression, RawReference, SearchParameterExtractor,
};
pub use planner::{
    Clause, ClauseKind, QueryPlan, QueryPlanner, ResourceColumn, SortKey,
};
pub use references::{
    classify, ReferenceKind, ReferenceLookup, ReferenceResolver, ResolvedReference,
    ResolvedReferences,
};
pub use registry::{
    CompositeComponentDef, SearchParameterDefinition, SearchParameterRegistry,
    SearchParameterSource, SearchParameterStatus,
};
pub use reindex::{
    ReindexOperation, ReindexOutcome, ReindexProgress, ReindexProgressError, ReindexRequest,
    ReindexStatus, ReindexableStorage, ResourcePage,
};
