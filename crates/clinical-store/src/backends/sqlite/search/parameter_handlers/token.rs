//! Token parameter SQL handler.

use crate::types::SearchValue;

use super::super::query_builder::{SqlFragment, SqlParam};

/// Handles token parameter SQL generation.
pub struct TokenHandler;

impl TokenHandler {
    /// Builds SQL for a token parameter value.
    ///
    /// Token values can be:
    /// - `code` - any system
    /// - `system|code` - both must match
    /// - `|code` - code without a system
    /// - `system|` - any code in the system
    pub fn build_sql(alias: &str, value: &SearchValue) -> SqlFragment {
        let system_col = format!("{}.value_token_system", alias);
        let code_col = format!("{}.value_token_code", alias);

        match value.value.split_once('|') {
            Some(("", code)) => SqlFragment::with_params(
                format!("{} IS NULL AND {} = ?", system_col, code_col),
                vec![SqlParam::string(code)],
            ),
            Some((system, "")) => SqlFragment::with_params(
                format!("{} = ?", system_col),
                vec![SqlParam::string(system)],
            ),
            Some((system, code)) => SqlFragment::with_params(
                format!("{} = ? AND {} = ?", system_col, code_col),
                vec![SqlParam::string(system), SqlParam::string(code)],
            ),
            None => SqlFragment::with_params(
                format!("{} = ?", code_col),
                vec![SqlParam::string(&value.value)],
            ),
        }
    }
}
