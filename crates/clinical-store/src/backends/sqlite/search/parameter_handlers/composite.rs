//! Composite parameter SQL handler.

use crate::search::ComponentFilter;

use super::super::query_builder::{SqlFragment, SqlParam};
use super::value_condition;

/// Handles composite parameter SQL generation.
pub struct CompositeHandler;

impl CompositeHandler {
    /// Builds an `EXISTS` over one composite alternative.
    ///
    /// One `search_params` alias per component is joined on the same
    /// resource, parameter and composite group, so every component must be
    /// satisfied by rows that came from the same source element.
    pub fn build_sql(resource_alias: &str, param_name: &str, filters: &[ComponentFilter]) -> SqlFragment {
        if filters.is_empty() {
            return SqlFragment::never();
        }

        let mut from = String::from("search_params c0");
        for i in 1..filters.len() {
            from.push_str(&format!(
                " JOIN search_params c{i} ON c{i}.resource_id = c0.resource_id \
                 AND c{i}.param_name = c0.param_name \
                 AND c{i}.composite_group = c0.composite_group"
            ));
        }

        let mut where_clause = SqlFragment::with_params(
            format!("c0.resource_id = {}.id AND c0.param_name = ?", resource_alias),
            vec![SqlParam::string(param_name)],
        );
        for (i, filter) in filters.iter().enumerate() {
            let alias = format!("c{}", i);
            where_clause = where_clause
                .and(SqlFragment::with_params(
                    format!("{}.component_name = ?", alias),
                    vec![SqlParam::string(&filter.component)],
                ))
                .and(value_condition(&alias, filter.param_type, None, &filter.value));
        }

        SqlFragment::with_params(
            format!("EXISTS (SELECT 1 FROM {} WHERE {})", from, where_clause.sql),
            where_clause.params,
        )
    }
}
