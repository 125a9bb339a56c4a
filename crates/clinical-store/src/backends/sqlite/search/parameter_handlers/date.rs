//! Date parameter SQL handler.

use crate::search::converters::DateRange;
use crate::types::{SearchPrefix, SearchValue};

use super::super::query_builder::{SqlFragment, SqlParam};

/// Handles date parameter SQL generation.
///
/// Both the indexed value and the search literal are half-open ranges: the
/// indexed `[start, end)` and the literal's precision range `[ps, pe)`.
pub struct DateHandler;

impl DateHandler {
    /// Builds SQL comparing an indexed range with a date search value.
    ///
    /// - `eq`: the value lies within the search range
    /// - `ne`: it does not
    /// - `gt` / `lt`: part of the value lies after / before the search range
    /// - `ge` / `le`: `gt` / `lt` or `eq`
    pub fn build_sql(start_col: &str, end_col: &str, value: &SearchValue) -> SqlFragment {
        let Some(range) = DateRange::parse(&value.value) else {
            return SqlFragment::never();
        };
        let (ps, pe) = (range.start_key(), range.end_key());

        let within = || {
            SqlFragment::with_params(
                format!("({} >= ? AND {} <= ?)", start_col, end_col),
                vec![SqlParam::string(&ps), SqlParam::string(&pe)],
            )
        };
        let after = || SqlFragment::with_params(format!("{} > ?", end_col), vec![SqlParam::string(&pe)]);
        let before = || SqlFragment::with_params(format!("{} < ?", start_col), vec![SqlParam::string(&ps)]);

        match value.prefix {
            SearchPrefix::Eq => within(),
            SearchPrefix::Ne => within().negate(),
            SearchPrefix::Gt => after(),
            SearchPrefix::Lt => before(),
            SearchPrefix::Ge => after().or(within()),
            SearchPrefix::Le => before().or(within()),
        }
    }

    /// Builds SQL comparing an instant column with a date search value.
    ///
    /// `column` must yield text in the index date-key format.
    pub fn build_instant_sql(column: &str, value: &SearchValue) -> SqlFragment {
        let Some(range) = DateRange::parse(&value.value) else {
            return SqlFragment::never();
        };
        let (ps, pe) = (range.start_key(), range.end_key());
        let cmp = |op: &str, key: &str| {
            SqlFragment::with_params(format!("{} {} ?", column, op), vec![SqlParam::string(key)])
        };

        match value.prefix {
            SearchPrefix::Eq => cmp(">=", &ps).and(cmp("<", &pe)),
            SearchPrefix::Ne => cmp(">=", &ps).and(cmp("<", &pe)).negate(),
            SearchPrefix::Gt => cmp(">=", &pe),
            SearchPrefix::Ge => cmp(">=", &ps),
            SearchPrefix::Lt => cmp("<", &ps),
            SearchPrefix::Le => cmp("<", &pe),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_within_precision_range() {
        let frag = DateHandler::build_sql("sp.value_date", "sp.value_date_end", &SearchValue::eq("2024-01"));
        assert_eq!(frag.sql, "(sp.value_date >= ? AND sp.value_date_end <= ?)");
        assert!(matches!(&frag.params[0], SqlParam::String(s) if s == "2024-01-01T00:00:00.000"));
        assert!(matches!(&frag.params[1], SqlParam::String(s) if s == "2024-02-01T00:00:00.000"));
    }

    #[test]
    fn test_ge_includes_eq() {
        let frag = DateHandler::build_sql(
            "sp.value_date",
            "sp.value_date_end",
            &SearchValue::new(SearchPrefix::Ge, "2024"),
        );
        assert_eq!(frag.params.len(), 3);
        assert!(frag.sql.contains(" OR "));
    }

    #[test]
    fn test_instant_comparison() {
        let frag = DateHandler::build_instant_sql("ts", &SearchValue::new(SearchPrefix::Gt, "2024-01-01"));
        assert_eq!(frag.sql, "ts >= ?");
        assert!(matches!(&frag.params[0], SqlParam::String(s) if s == "2024-01-02T00:00:00.000"));
    }

    #[test]
    fn test_malformed_matches_nothing() {
        let frag = DateHandler::build_sql("a", "b", &SearchValue::eq("soon"));
        assert_eq!(frag.sql, "1 = 0");
    }
}
