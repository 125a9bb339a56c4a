//! Search request types.
//!
//! This module defines the parameter types, modifiers and comparison
//! prefixes understood by the search engine, and [`SearchQuery`], the raw
//! multi-valued request handed to a [`SearchProvider`](crate::core::SearchProvider).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Semantic type of a search parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A code, optionally qualified by a system.
    Token,
    /// A reference to another resource.
    Reference,
    /// A number with units.
    Quantity,
    /// A parameter whose value combines several component parameters.
    Composite,
}

impl SearchParamType {
    /// Returns true if values of this type accept comparison prefixes.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            SearchParamType::Number | SearchParamType::Date | SearchParamType::Quantity
        )
    }
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Composite => write!(f, "composite"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "quantity" => Ok(SearchParamType::Quantity),
            "composite" => Ok(SearchParamType::Composite),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

/// Search modifiers that can be applied to a parameter name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// Case-sensitive whole-value match (string parameters).
    Exact,
    /// Case-insensitive substring match (string parameters).
    Contains,
    /// Negation (token parameters).
    Not,
    /// Presence test: `true` means absent, anything else means present.
    Missing,
    /// Restricts a reference to a target type, e.g. `subject:Patient`.
    Type(String),
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchModifier::Exact => write!(f, "exact"),
            SearchModifier::Contains => write!(f, "contains"),
            SearchModifier::Not => write!(f, "not"),
            SearchModifier::Missing => write!(f, "missing"),
            SearchModifier::Type(t) => write!(f, "{}", t),
        }
    }
}

impl SearchModifier {
    /// Parses a modifier string, returning None for unknown modifiers.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(SearchModifier::Exact),
            "contains" => Some(SearchModifier::Contains),
            "not" => Some(SearchModifier::Not),
            "missing" => Some(SearchModifier::Missing),
            _ => {
                if s.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)
                    && s.chars().all(|c| c.is_ascii_alphanumeric())
                {
                    Some(SearchModifier::Type(s.to_string()))
                } else {
                    None
                }
            }
        }
    }

    /// Returns true if this modifier is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchModifier::Exact | SearchModifier::Contains => {
                param_type == SearchParamType::String
            }
            SearchModifier::Not => param_type == SearchParamType::Token,
            SearchModifier::Missing => true,
            SearchModifier::Type(_) => param_type == SearchParamType::Reference,
        }
    }
}

/// Comparison prefixes for ordered parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPrefix::Eq => write!(f, "eq"),
            SearchPrefix::Ne => write!(f, "ne"),
            SearchPrefix::Gt => write!(f, "gt"),
            SearchPrefix::Lt => write!(f, "lt"),
            SearchPrefix::Ge => write!(f, "ge"),
            SearchPrefix::Le => write!(f, "le"),
        }
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

impl SearchPrefix {
    /// Extracts a prefix from the beginning of a value string.
    ///
    /// Returns the prefix and the remaining value. Values that do not start
    /// with a known two-letter prefix keep the default `eq`.
    pub fn extract(value: &str) -> (Self, &str) {
        if let (Some(prefix), Some(rest)) = (value.get(..2), value.get(2..)) {
            if let Ok(p) = prefix.parse() {
                return (p, rest);
            }
        }
        (SearchPrefix::Eq, value)
    }
}

/// A single search value with its comparison prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchValue {
    /// The comparison prefix.
    pub prefix: SearchPrefix,

    /// The value to search for, without the prefix.
    pub value: String,
}

impl SearchValue {
    /// Creates a new search value with the given prefix and value.
    pub fn new(prefix: SearchPrefix, value: impl Into<String>) -> Self {
        Self {
            prefix,
            value: value.into(),
        }
    }

    /// Creates a search value with the default (eq) prefix.
    pub fn eq(value: impl Into<String>) -> Self {
        Self::new(SearchPrefix::Eq, value)
    }

    /// Parses a raw value for a parameter of the given type.
    ///
    /// Only ordered types (number, date, quantity) take a prefix; for the
    /// others a leading `gt` is part of the value.
    pub fn parse_for(param_type: SearchParamType, raw: &str) -> Self {
        if param_type.is_ordered() {
            let (prefix, value) = SearchPrefix::extract(raw);
            Self::new(prefix, value)
        } else {
            Self::eq(raw)
        }
    }
}

/// Splits a raw parameter value on unescaped commas.
///
/// `\,` is kept as a literal comma. Empty alternatives are dropped.
pub fn split_or_values(raw: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => values.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    values.push(current);

    values.into_iter().filter(|v| !v.is_empty()).collect()
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

/// A single sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortDirective {
    /// The parameter to sort by.
    pub parameter: String,

    /// The sort direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses one sort key (e.g. `-_lastUpdated`).
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('-') {
            Some(name) => Self {
                parameter: name.to_string(),
                direction: SortDirection::Descending,
            },
            None => Self {
                parameter: s.to_string(),
                direction: SortDirection::Ascending,
            },
        }
    }

    /// Parses a comma-separated `_sort` value.
    pub fn parse_list(s: &str) -> Vec<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty() && *k != "-")
            .map(Self::parse)
            .collect()
    }
}

/// Restricts a search to members of one compartment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompartmentScope {
    /// Compartment type, e.g. "Patient".
    pub compartment_type: String,
    /// Logical id of the compartment owner.
    pub compartment_id: String,
}

/// A search request against one resource type.
///
/// Parameters are kept as raw `(name, value)` pairs exactly as received,
/// including any `:modifier` suffix on the name. They are interpreted by the
/// [`QueryPlanner`](crate::search::QueryPlanner).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The resource type being searched.
    pub resource_type: String,

    /// Raw parameters in request order.
    pub parameters: Vec<(String, String)>,

    /// Sort keys in priority order.
    pub sort: Vec<SortDirective>,

    /// Page size.
    pub count: Option<u32>,

    /// Number of matches to skip.
    pub offset: Option<u32>,

    /// Optional compartment restriction.
    pub compartment: Option<CompartmentScope>,
}

impl SearchQuery {
    /// Creates an empty query for a resource type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    /// Builds a query from `name=value` pairs separated by `&`.
    ///
    /// Values are taken literally; callers decode any transport encoding first.
    pub fn parse(resource_type: impl Into<String>, query_string: &str) -> Self {
        let mut query = Self::new(resource_type);
        for pair in query_string.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            query.parameters.push((name.to_string(), value.to_string()));
        }
        query
    }

    /// Adds a raw parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// Adds a sort key.
    pub fn with_sort(mut self, sort: SortDirective) -> Self {
        self.sort.push(sort);
        self
    }

    /// Sets the page size.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the number of matches to skip.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Restricts the search to one compartment.
    pub fn in_compartment(
        mut self,
        compartment_type: impl Into<String>,
        compartment_id: impl Into<String>,
    ) -> Self {
        self.compartment = Some(CompartmentScope {
            compartment_type: compartment_type.into(),
            compartment_id: compartment_id.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_extract() {
        assert_eq!(SearchPrefix::extract("gt90"), (SearchPrefix::Gt, "90"));
        assert_eq!(SearchPrefix::extract("le2024-01"), (SearchPrefix::Le, "2024-01"));
        assert_eq!(SearchPrefix::extract("90"), (SearchPrefix::Eq, "90"));
        assert_eq!(SearchPrefix::extract("9"), (SearchPrefix::Eq, "9"));
        assert_eq!(SearchPrefix::extract("ñx"), (SearchPrefix::Eq, "ñx"));
    }

    #[test]
    fn test_value_parse_respects_type() {
        let number = SearchValue::parse_for(SearchParamType::Number, "ge5");
        assert_eq!(number, SearchValue::new(SearchPrefix::Ge, "5"));

        let token = SearchValue::parse_for(SearchParamType::Token, "gender");
        assert_eq!(token, SearchValue::eq("gender"));
    }

    #[test]
    fn test_modifier_parse() {
        assert_eq!(SearchModifier::parse("missing"), Some(SearchModifier::Missing));
        assert_eq!(SearchModifier::parse("Contains"), Some(SearchModifier::Contains));
        assert_eq!(
            SearchModifier::parse("Patient"),
            Some(SearchModifier::Type("Patient".to_string()))
        );
        assert_eq!(SearchModifier::parse("bogus"), None);
        assert!(SearchModifier::Exact.is_valid_for(SearchParamType::String));
        assert!(!SearchModifier::Exact.is_valid_for(SearchParamType::Token));
    }

    #[test]
    fn test_split_or_values() {
        assert_eq!(split_or_values("a,b"), vec!["a", "b"]);
        assert_eq!(split_or_values("a\\,b"), vec!["a,b"]);
        assert_eq!(split_or_values("a,,b,"), vec!["a", "b"]);
        assert!(split_or_values("").is_empty());
    }

    #[test]
    fn test_sort_parse_list() {
        let keys = SortDirective::parse_list("-_lastUpdated, name");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].parameter, "_lastUpdated");
        assert_eq!(keys[0].direction, SortDirection::Descending);
        assert_eq!(keys[1].direction, SortDirection::Ascending);
    }

    #[test]
    fn test_query_parse() {
        let query = SearchQuery::parse("Patient", "identifier=http://a|1&name:exact=Smith&flag");
        assert_eq!(
            query.parameters,
            vec![
                ("identifier".to_string(), "http://a|1".to_string()),
                ("name:exact".to_string(), "Smith".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_param_type_round_trip() {
        for t in ["string", "number", "date", "token", "reference", "quantity", "composite"] {
            let parsed: SearchParamType = t.parse().unwrap();
            assert_eq!(parsed.to_string(), t);
        }
        assert!("uri".parse::<SearchParamType>().is_err());
    }
}
