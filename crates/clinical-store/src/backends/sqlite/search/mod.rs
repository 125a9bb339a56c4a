//! SQLite search implementation.
//!
//! - [`query_builder`] translates query plans into SQL
//! - [`parameter_handlers`] build per-type value conditions
//! - [`writer`] maintains the derived search rows

pub mod parameter_handlers;
pub mod query_builder;
pub mod writer;

pub use query_builder::{BuiltQuery, QueryBuilder, SqlFragment, SqlParam};
pub use writer::SqliteSearchIndexWriter;
