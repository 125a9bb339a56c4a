//! Reference parameter SQL handler.

use crate::types::SearchValue;

use super::super::query_builder::{escape_like, SqlFragment, SqlParam};

/// Handles reference parameter SQL generation.
pub struct ReferenceHandler;

impl ReferenceHandler {
    /// Builds SQL for a reference parameter value.
    ///
    /// The planner has already normalized `Type/id`, absolute URLs and
    /// `:Type` modifiers. A bare id matches a reference to any type.
    pub fn build_sql(alias: &str, value: &SearchValue) -> SqlFragment {
        let column = format!("{}.value_reference", alias);
        let ref_value = &value.value;

        if ref_value.contains('/') {
            SqlFragment::with_params(format!("{} = ?", column), vec![SqlParam::string(ref_value)])
        } else {
            SqlFragment::with_params(
                format!("({} = ? OR {} LIKE ? ESCAPE '\\')", column, column),
                vec![
                    SqlParam::string(ref_value),
                    SqlParam::string(format!("%/{}", escape_like(ref_value))),
                ],
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_reference() {
        let frag = ReferenceHandler::build_sql("sp", &SearchValue::eq("Patient/123"));
        assert_eq!(frag.sql, "sp.value_reference = ?");
    }

    #[test]
    fn test_bare_id_matches_any_type() {
        let frag = ReferenceHandler::build_sql("sp", &SearchValue::eq("123"));
        assert_eq!(frag.params.len(), 2);
        assert!(matches!(&frag.params[1], SqlParam::String(s) if s == "%/123"));
    }
}
