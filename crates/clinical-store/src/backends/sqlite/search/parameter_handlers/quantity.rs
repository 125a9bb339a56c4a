//! Quantity parameter SQL handler.

use crate::search::converters::QuantityLiteral;
use crate::types::SearchValue;

use super::super::query_builder::{SqlFragment, SqlParam};
use super::NumberHandler;

/// Handles quantity parameter SQL generation.
pub struct QuantityHandler;

impl QuantityHandler {
    /// Builds SQL for a quantity value: `[prefix]number[|system|code]`.
    ///
    /// The numeric part compares like a number; a given system or code must
    /// also match.
    pub fn build_sql(alias: &str, value: &SearchValue) -> SqlFragment {
        let Some(literal) = QuantityLiteral::parse(&value.value) else {
            return SqlFragment::never();
        };

        let mut fragment =
            NumberHandler::compare(&format!("{}.value_quantity_value", alias), value.prefix, literal.value);
        if let Some(system) = literal.system {
            fragment = fragment.and(SqlFragment::with_params(
                format!("{}.value_quantity_system = ?", alias),
                vec![SqlParam::string(system)],
            ));
        }
        if let Some(code) = literal.code {
            fragment = fragment.and(SqlFragment::with_params(
                format!("{}.value_quantity_code = ?", alias),
                vec![SqlParam::string(code)],
            ));
        }
        fragment
    }
}
