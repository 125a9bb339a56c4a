//! Parameter-specific SQL handlers.
//!
//! Each handler builds the condition for one search value against one
//! `search_params` row, addressed through a table alias. Only the columns of
//! the handler's own type are referenced.

mod composite;
mod date;
mod number;
mod quantity;
mod reference;
mod string;
mod token;

pub use composite::CompositeHandler;
pub use date::DateHandler;
pub use number::NumberHandler;
pub use quantity::QuantityHandler;
pub use reference::ReferenceHandler;
pub use string::StringHandler;
pub use token::TokenHandler;

use crate::types::{SearchModifier, SearchParamType, SearchValue};

use super::query_builder::SqlFragment;

/// Builds the condition for one value of a parameter of `param_type`.
pub fn value_condition(
    alias: &str,
    param_type: SearchParamType,
    modifier: Option<&SearchModifier>,
    value: &SearchValue,
) -> SqlFragment {
    match param_type {
        SearchParamType::String => StringHandler::build_sql(alias, value, modifier),
        SearchParamType::Token => TokenHandler::build_sql(alias, value),
        SearchParamType::Date => DateHandler::build_sql(&format!("{}.value_date", alias), &format!("{}.value_date_end", alias), value),
        SearchParamType::Number => NumberHandler::build_sql(&format!("{}.value_number", alias), value),
        SearchParamType::Quantity => QuantityHandler::build_sql(alias, value),
        SearchParamType::Reference => ReferenceHandler::build_sql(alias, value),
        SearchParamType::Composite => SqlFragment::never(),
    }
}
