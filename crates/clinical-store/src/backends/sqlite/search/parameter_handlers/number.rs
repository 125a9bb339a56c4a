//! Number parameter SQL handler.

use rust_decimal::prelude::ToPrimitive;

use crate::search::converters::{implicit_range, parse_decimal};
use crate::types::{SearchPrefix, SearchValue};

use super::super::query_builder::{SqlFragment, SqlParam};

/// Handles number parameter SQL generation.
pub struct NumberHandler;

impl NumberHandler {
    /// Builds SQL comparing `column` with a number search value.
    ///
    /// `eq` and `ne` use the implicit precision of the literal, so `100`
    /// matches `[99.5, 100.5)`. A literal with no representable range is
    /// compared exactly. The other comparators are exact.
    pub fn build_sql(column: &str, value: &SearchValue) -> SqlFragment {
        let Some(number) = parse_decimal(&value.value) else {
            return SqlFragment::never();
        };
        Self::compare(column, value.prefix, number)
    }

    pub(crate) fn compare(column: &str, prefix: SearchPrefix, number: rust_decimal::Decimal) -> SqlFragment {
        let Some(exact) = number.to_f64() else {
            return SqlFragment::never();
        };

        match prefix {
            SearchPrefix::Eq => match implicit_range(number) {
                Some((low, high)) => SqlFragment::with_params(
                    format!("({} >= ? AND {} < ?)", column, column),
                    vec![SqlParam::float(low), SqlParam::float(high)],
                ),
                None => SqlFragment::with_params(format!("{} = ?", column), vec![SqlParam::float(exact)]),
            },
            SearchPrefix::Ne => match implicit_range(number) {
                Some((low, high)) => SqlFragment::with_params(
                    format!("({} < ? OR {} >= ?)", column, column),
                    vec![SqlParam::float(low), SqlParam::float(high)],
                ),
                None => SqlFragment::with_params(format!("{} <> ?", column), vec![SqlParam::float(exact)]),
            },
            SearchPrefix::Gt => SqlFragment::with_params(format!("{} > ?", column), vec![SqlParam::float(exact)]),
            SearchPrefix::Ge => SqlFragment::with_params(format!("{} >= ?", column), vec![SqlParam::float(exact)]),
            SearchPrefix::Lt => SqlFragment::with_params(format!("{} < ?", column), vec![SqlParam::float(exact)]),
            SearchPrefix::Le => SqlFragment::with_params(format!("{} <= ?", column), vec![SqlParam::float(exact)]),
        }
    }
}
