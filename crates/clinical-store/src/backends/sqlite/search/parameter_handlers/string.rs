//! String parameter SQL handler.

use crate::types::{SearchModifier, SearchValue};

use super::super::query_builder::{escape_like, SqlFragment, SqlParam};

/// Handles string parameter SQL generation.
pub struct StringHandler;

impl StringHandler {
    /// Builds SQL for a string parameter value.
    ///
    /// - no modifier: case-insensitive prefix match
    /// - `:exact`: case-sensitive equality on the stored original-case value
    /// - `:contains`: case-insensitive substring match
    pub fn build_sql(alias: &str, value: &SearchValue, modifier: Option<&SearchModifier>) -> SqlFragment {
        let column = format!("{}.value_string", alias);
        let escaped = escape_like(&value.value);

        match modifier {
            Some(SearchModifier::Exact) => SqlFragment::with_params(
                format!("{} = ?", column),
                vec![SqlParam::string(&value.value)],
            ),
            Some(SearchModifier::Contains) => SqlFragment::with_params(
                format!("{} LIKE ? ESCAPE '\\'", column),
                vec![SqlParam::string(format!("%{}%", escaped))],
            ),
            _ => SqlFragment::with_params(
                format!("{} LIKE ? ESCAPE '\\'", column),
                vec![SqlParam::string(format!("{}%", escaped))],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_prefix() {
        let frag = StringHandler::build_sql("sp", &SearchValue::eq("Smi"), None);
        assert_eq!(frag.sql, "sp.value_string LIKE ? ESCAPE '\\'");
        assert!(matches!(&frag.params[0], SqlParam::String(s) if s == "Smi%"));
    }

    #[test]
    fn test_exact_and_contains() {
        let exact = StringHandler::build_sql("sp", &SearchValue::eq("Smith"), Some(&SearchModifier::Exact));
        assert_eq!(exact.sql, "sp.value_string = ?");

        let contains =
            StringHandler::build_sql("sp", &SearchValue::eq("10%"), Some(&SearchModifier::Contains));
        assert!(matches!(&contains.params[0], SqlParam::String(s) if s == "%10\\%%"));
    }
}
