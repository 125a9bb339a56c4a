//! Value converters for the search index.
//!
//! Converts JSON fragments located by an extraction path into typed
//! [`IndexValue`]s. Each value type maps onto exactly one group of index
//! columns, so a string never lands in a number column and vice versa.
//!
//! Dates are normalized to half-open UTC ranges `[start, end)` whose width is
//! the precision of the source literal (`2024` covers the whole year). Range
//! keys share one fixed-width format so they compare correctly as text.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{SearchParamType, SearchValue};

/// Format of every date key written to or compared against the index.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Lower bound used for open-started periods.
pub const MIN_DATE_KEY: &str = "0001-01-01T00:00:00.000";

/// Upper bound used for open-ended periods.
pub const MAX_DATE_KEY: &str = "9999-12-31T23:59:59.999";

static DATE_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2}):(\d{2})(?::(\d{2})(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?)?)?)?$",
    )
    .expect("invalid date literal regex")
});

/// A value extracted and converted for the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    /// String value, original case preserved.
    String(String),

    /// Token value (code with optional system).
    Token {
        /// Code system URI (e.g., "http://loinc.org").
        system: Option<String>,
        /// Code value.
        code: String,
    },

    /// Date range `[start, end)` in [`DATE_KEY_FORMAT`].
    Date {
        /// Inclusive range start.
        start: String,
        /// Exclusive range end.
        end: String,
    },

    /// Numeric value.
    Number(f64),

    /// Quantity value with optional unit coding.
    Quantity {
        /// Numeric value.
        value: f64,
        /// Unit system URI (e.g., "http://unitsofmeasure.org").
        system: Option<String>,
        /// Unit code (e.g., "mm[Hg]").
        code: Option<String>,
    },

    /// Raw reference string, normalized later by the reference resolver.
    Reference(String),
}

impl IndexValue {
    /// Creates a string index value.
    pub fn string(s: impl Into<String>) -> Self {
        IndexValue::String(s.into())
    }

    /// Creates a token index value with system and code.
    pub fn token(system: Option<String>, code: impl Into<String>) -> Self {
        IndexValue::Token {
            system,
            code: code.into(),
        }
    }

    /// Creates a token index value with code only.
    pub fn token_code(code: impl Into<String>) -> Self {
        IndexValue::token(None, code)
    }

    /// Creates a date index value from a parsed range.
    pub fn date(range: &DateRange) -> Self {
        IndexValue::Date {
            start: range.start_key(),
            end: range.end_key(),
        }
    }

    /// Creates a number index value.
    pub fn number(value: f64) -> Self {
        IndexValue::Number(value)
    }

    /// Creates a quantity index value.
    pub fn quantity(value: f64, system: Option<String>, code: Option<String>) -> Self {
        IndexValue::Quantity {
            value,
            system,
            code,
        }
    }

    /// Creates a reference index value.
    pub fn reference(reference: impl Into<String>) -> Self {
        IndexValue::Reference(reference.into())
    }

    /// Returns the parameter type this value belongs to.
    pub fn param_type(&self) -> SearchParamType {
        match self {
            IndexValue::String(_) => SearchParamType::String,
            IndexValue::Token { .. } => SearchParamType::Token,
            IndexValue::Date { .. } => SearchParamType::Date,
            IndexValue::Number(_) => SearchParamType::Number,
            IndexValue::Quantity { .. } => SearchParamType::Quantity,
            IndexValue::Reference(_) => SearchParamType::Reference,
        }
    }
}

/// A half-open UTC date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// Inclusive start.
    pub start: NaiveDateTime,
    /// Exclusive end.
    pub end: NaiveDateTime,
}

impl DateRange {
    /// Parses a date, partial date or date-time literal.
    ///
    /// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD` and `YYYY-MM-DDThh:mm[:ss[.fff]][Z|±hh:mm]`.
    /// Date-times without an offset are taken as UTC. Returns `None` for
    /// anything else, including impossible calendar dates.
    pub fn parse(literal: &str) -> Option<Self> {
        let caps = DATE_LITERAL.captures(literal.trim())?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let Some(month) = num(2) else {
            let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
            let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
            return Some(Self::days(start, end));
        };
        let Some(day) = num(3) else {
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            let end = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)?
            };
            return Some(Self::days(start, end));
        };
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let Some(hour) = num(4) else {
            return Some(Self::days(date, date.succ_opt()?));
        };

        let minute = num(5)?;
        let second = num(6);
        let millis = caps
            .get(7)
            .map(|m| {
                let digits: String = m.as_str()[1..].chars().chain("000".chars()).take(3).collect();
                digits.parse::<u32>().unwrap_or(0)
            })
            .unwrap_or(0);
        let time = NaiveTime::from_hms_milli_opt(hour, minute, second.unwrap_or(0), millis)?;
        let local = date.and_time(time);

        let start = match caps.get(8).map(|m| m.as_str()) {
            None | Some("Z") => local,
            Some(offset) => {
                let sign = if offset.starts_with('-') { -1 } else { 1 };
                let hours: i32 = offset.get(1..3)?.parse().ok()?;
                let minutes: i32 = offset.get(4..6)?.parse().ok()?;
                let tz = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
                tz.from_local_datetime(&local).single()?.naive_utc()
            }
        };

        let width = if caps.get(7).is_some() {
            Duration::milliseconds(1)
        } else if second.is_some() {
            Duration::seconds(1)
        } else {
            Duration::minutes(1)
        };

        Some(Self {
            start,
            end: start + width,
        })
    }

    fn days(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start.and_time(NaiveTime::MIN),
            end: end.and_time(NaiveTime::MIN),
        }
    }

    /// Returns the start as an index key.
    pub fn start_key(&self) -> String {
        self.start.format(DATE_KEY_FORMAT).to_string()
    }

    /// Returns the exclusive end as an index key.
    pub fn end_key(&self) -> String {
        if self.end.year() > 9999 {
            return MAX_DATE_KEY.to_string();
        }
        self.end.format(DATE_KEY_FORMAT).to_string()
    }
}

/// Parses a decimal search literal.
pub fn parse_decimal(literal: &str) -> Option<Decimal> {
    literal.trim().parse::<Decimal>().ok()
}

/// Returns the implicit precision range `[low, high)` of a decimal literal.
///
/// `100` covers `[99.5, 100.5)` and `100.0` covers `[99.95, 100.05)`.
/// Returns `None` when the literal is already at full decimal precision or
/// the range would leave the decimal domain.
pub fn implicit_range(value: Decimal) -> Option<(f64, f64)> {
    let half = Decimal::try_new(5, value.scale() + 1).ok()?;
    let low = value.checked_sub(half)?.to_f64()?;
    let high = value.checked_add(half)?.to_f64()?;
    Some((low, high))
}

/// A quantity search literal: `number`, `number|system|code` or `number||code`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityLiteral {
    /// The numeric part.
    pub value: Decimal,
    /// Unit system, if given.
    pub system: Option<String>,
    /// Unit code, if given.
    pub code: Option<String>,
}

impl QuantityLiteral {
    /// Parses a quantity literal, splitting on the first `|` only.
    ///
    /// A remainder without a second `|` is taken as the unit code.
    pub fn parse(literal: &str) -> Option<Self> {
        let (number, rest) = match literal.split_once('|') {
            Some((number, rest)) => (number, Some(rest)),
            None => (literal, None),
        };
        let value = parse_decimal(number)?;

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let (system, code) = match rest {
            Some(rest) => match rest.split_once('|') {
                Some((system, code)) => (non_empty(system), non_empty(code)),
                None => (None, non_empty(rest)),
            },
            None => (None, None),
        };

        Some(Self {
            value,
            system,
            code,
        })
    }
}

/// Checks that a search value is well formed for a parameter type.
pub fn check_search_value(param_type: SearchParamType, value: &SearchValue) -> Result<(), String> {
    let literal = value.value.as_str();
    let ok = match param_type {
        SearchParamType::Number => parse_decimal(literal).is_some(),
        SearchParamType::Quantity => QuantityLiteral::parse(literal).is_some(),
        SearchParamType::Date => DateRange::parse(literal).is_some(),
        SearchParamType::Token => !literal.is_empty() && literal != "|",
        SearchParamType::String | SearchParamType::Reference => !literal.is_empty(),
        SearchParamType::Composite => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("'{}' is not a valid {} value", literal, param_type))
    }
}

/// Converter for transforming JSON values to index values.
pub struct ValueConverter;

impl ValueConverter {
    /// Converts a single (non-array) JSON value.
    ///
    /// Returns `Ok(vec![])` when the value simply carries nothing indexable
    /// and `Err(message)` when a value is present but cannot be classified.
    pub fn convert(value: &Value, target_type: SearchParamType) -> Result<Vec<IndexValue>, String> {
        match target_type {
            SearchParamType::String => Self::convert_to_string(value),
            SearchParamType::Token => Self::convert_to_token(value),
            SearchParamType::Date => Self::convert_to_date(value),
            SearchParamType::Number => Self::convert_to_number(value),
            SearchParamType::Quantity => Self::convert_to_quantity(value),
            SearchParamType::Reference => Self::convert_to_reference(value),
            SearchParamType::Composite => Ok(Vec::new()),
        }
    }

    fn convert_to_string(value: &Value) -> Result<Vec<IndexValue>, String> {
        let mut results = Vec::new();

        match value {
            Value::String(s) => results.push(IndexValue::string(s.clone())),
            Value::Object(obj) => {
                // HumanName
                if let Some(family) = obj.get("family").and_then(|v| v.as_str()) {
                    results.push(IndexValue::string(family));
                }
                for key in ["given", "prefix", "suffix", "line"] {
                    if let Some(parts) = obj.get(key).and_then(|v| v.as_array()) {
                        results.extend(
                            parts
                                .iter()
                                .filter_map(|p| p.as_str())
                                .map(IndexValue::string),
                        );
                    }
                }
                if let Some(text) = obj.get("text").and_then(|v| v.as_str()) {
                    results.push(IndexValue::string(text));
                }

                // Address
                for key in ["city", "district", "state", "postalCode", "country"] {
                    if let Some(part) = obj.get(key).and_then(|v| v.as_str()) {
                        results.push(IndexValue::string(part));
                    }
                }
            }
            Value::Null => {}
            other => return Err(format!("expected text, found {}", other)),
        }

        Ok(results)
    }

    fn convert_to_token(value: &Value) -> Result<Vec<IndexValue>, String> {
        let mut results = Vec::new();

        match value {
            Value::String(s) => results.push(IndexValue::token_code(s.clone())),
            Value::Bool(b) => results.push(IndexValue::token_code(b.to_string())),
            Value::Object(obj) => {
                let system = obj.get("system").and_then(|v| v.as_str()).map(String::from);

                // Coding
                if let Some(code) = obj.get("code").and_then(|v| v.as_str()) {
                    if !obj.contains_key("coding") && !code.is_empty() {
                        results.push(IndexValue::token(system.clone(), code));
                    }
                }

                // CodeableConcept
                if let Some(coding) = obj.get("coding").and_then(|v| v.as_array()) {
                    for c in coding {
                        if let Some(code) = c.get("code").and_then(|v| v.as_str()) {
                            let system = c.get("system").and_then(|v| v.as_str()).map(String::from);
                            results.push(IndexValue::token(system, code));
                        }
                    }
                }

                // Identifier and ContactPoint
                if !obj.contains_key("code") && !obj.contains_key("coding") {
                    if let Some(value) = obj.get("value").and_then(|v| v.as_str()) {
                        if !value.is_empty() {
                            results.push(IndexValue::token(system, value));
                        }
                    }
                }
            }
            Value::Null => {}
            other => return Err(format!("expected a code, found {}", other)),
        }

        Ok(results)
    }

    fn convert_to_date(value: &Value) -> Result<Vec<IndexValue>, String> {
        let parse = |s: &str| DateRange::parse(s).ok_or_else(|| format!("'{}' is not a date", s));

        match value {
            Value::String(s) => Ok(vec![IndexValue::date(&parse(s)?)]),
            Value::Object(obj) => {
                // Period
                let start = obj.get("start").and_then(|v| v.as_str());
                let end = obj.get("end").and_then(|v| v.as_str());
                if start.is_none() && end.is_none() {
                    return Ok(Vec::new());
                }
                let start = match start {
                    Some(s) => parse(s)?.start_key(),
                    None => MIN_DATE_KEY.to_string(),
                };
                let end = match end {
                    Some(e) => parse(e)?.end_key(),
                    None => MAX_DATE_KEY.to_string(),
                };
                Ok(vec![IndexValue::Date { start, end }])
            }
            Value::Null => Ok(Vec::new()),
            other => Err(format!("expected a date, found {}", other)),
        }
    }

    fn convert_to_number(value: &Value) -> Result<Vec<IndexValue>, String> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(|f| vec![IndexValue::number(f)])
                .ok_or_else(|| format!("'{}' is not representable", n)),
            Value::String(s) => parse_decimal(s)
                .and_then(|d| d.to_f64())
                .map(|f| vec![IndexValue::number(f)])
                .ok_or_else(|| format!("'{}' is not numeric", s)),
            Value::Null => Ok(Vec::new()),
            other => Err(format!("expected a number, found {}", other)),
        }
    }

    fn convert_to_quantity(value: &Value) -> Result<Vec<IndexValue>, String> {
        let obj = match value {
            Value::Object(obj) => obj,
            Value::Number(_) => return Self::convert_to_number(value).map(|values| {
                values
                    .into_iter()
                    .map(|v| match v {
                        IndexValue::Number(n) => IndexValue::quantity(n, None, None),
                        other => other,
                    })
                    .collect()
            }),
            Value::Null => return Ok(Vec::new()),
            other => return Err(format!("expected a quantity, found {}", other)),
        };

        let number = match obj.get("value") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => parse_decimal(s).and_then(|d| d.to_f64()),
            Some(_) => None,
        };
        let Some(number) = number else {
            return Err(format!(
                "quantity value {} is not numeric",
                obj.get("value").map(|v| v.to_string()).unwrap_or_default()
            ));
        };

        let system = obj.get("system").and_then(|v| v.as_str()).map(String::from);
        let code = obj
            .get("code")
            .or_else(|| obj.get("unit"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(vec![IndexValue::quantity(number, system, code)])
    }

    fn convert_to_reference(value: &Value) -> Result<Vec<IndexValue>, String> {
        match value {
            Value::String(s) => Ok(vec![IndexValue::reference(s.clone())]),
            Value::Object(obj) => Ok(obj
                .get("reference")
                .and_then(|v| v.as_str())
                .map(|r| vec![IndexValue::reference(r)])
                .unwrap_or_default()),
            Value::Null => Ok(Vec::new()),
            other => Err(format!("expected a reference, found {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_date_range_precision() {
        let year = DateRange::parse("2024").unwrap();
        assert_eq!(year.start_key(), "2024-01-01T00:00:00.000");
        assert_eq!(year.end_key(), "2025-01-01T00:00:00.000");

        let month = DateRange::parse("2024-12").unwrap();
        assert_eq!(month.end_key(), "2025-01-01T00:00:00.000");

        let day = DateRange::parse("2024-02-29").unwrap();
        assert_eq!(day.end_key(), "2024-03-01T00:00:00.000");

        let second = DateRange::parse("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(second.start_key(), "2024-01-15T10:30:00.000");
        assert_eq!(second.end_key(), "2024-01-15T10:30:01.000");
    }

    #[test]
    fn test_date_range_offset_normalized_to_utc() {
        let range = DateRange::parse("2024-01-15T10:30:00+02:00").unwrap();
        assert_eq!(range.start_key(), "2024-01-15T08:30:00.000");
    }

    #[test]
    fn test_date_range_rejects_garbage() {
        assert!(DateRange::parse("yesterday").is_none());
        assert!(DateRange::parse("2023-02-30").is_none());
        assert!(DateRange::parse("2024-13").is_none());
        assert!(DateRange::parse("").is_none());
    }

    #[test]
    fn test_implicit_range() {
        assert_eq!(implicit_range(parse_decimal("100").unwrap()), Some((99.5, 100.5)));
        assert_eq!(implicit_range(parse_decimal("100.0").unwrap()), Some((99.95, 100.05)));
    }

    #[test]
    fn test_implicit_range_at_decimal_limits() {
        let full_scale = parse_decimal("0.1234567890123456789012345678").unwrap();
        assert_eq!(implicit_range(full_scale), None);

        // Extremes never panic; any range returned stays ordered
        let max = parse_decimal("79228162514264337593543950335").unwrap();
        for value in [max, -max] {
            if let Some((low, high)) = implicit_range(value) {
                assert!(low <= high);
            }
        }
        assert!(parse_decimal("abc").is_none());
    }

    #[test]
    fn test_convert_human_name_keeps_case() {
        let name = json!({"family": "McDonald", "given": ["Ann", "Marie"]});
        let values = ValueConverter::convert(&name, SearchParamType::String).unwrap();
        assert_eq!(
            values,
            vec![
                IndexValue::string("McDonald"),
                IndexValue::string("Ann"),
                IndexValue::string("Marie"),
            ]
        );
    }

    #[test]
    fn test_convert_codeable_concept() {
        let concept = json!({
            "coding": [
                {"system": "http://loinc.org", "code": "8480-6"},
                {"code": "systolic"}
            ],
            "text": "Systolic"
        });
        let values = ValueConverter::convert(&concept, SearchParamType::Token).unwrap();
        assert_eq!(
            values,
            vec![
                IndexValue::token(Some("http://loinc.org".to_string()), "8480-6"),
                IndexValue::token_code("systolic"),
            ]
        );
    }

    #[test]
    fn test_convert_identifier_and_boolean() {
        let identifier = json!({"system": "http://hospital.org/mrn", "value": "12345"});
        let values = ValueConverter::convert(&identifier, SearchParamType::Token).unwrap();
        assert_eq!(
            values,
            vec![IndexValue::token(Some("http://hospital.org/mrn".to_string()), "12345")]
        );

        let values = ValueConverter::convert(&json!(true), SearchParamType::Token).unwrap();
        assert_eq!(values, vec![IndexValue::token_code("true")]);
    }

    #[test]
    fn test_convert_period() {
        let period = json!({"start": "2024-01-01"});
        let values = ValueConverter::convert(&period, SearchParamType::Date).unwrap();
        assert_eq!(
            values,
            vec![IndexValue::Date {
                start: "2024-01-01T00:00:00.000".to_string(),
                end: MAX_DATE_KEY.to_string(),
            }]
        );
    }

    #[test]
    fn test_convert_unclassifiable_values() {
        assert!(ValueConverter::convert(&json!("not-a-date"), SearchParamType::Date).is_err());
        assert!(
            ValueConverter::convert(&json!({"value": "lots"}), SearchParamType::Quantity).is_err()
        );
        assert!(ValueConverter::convert(&json!("x1"), SearchParamType::Number).is_err());
    }

    #[test]
    fn test_convert_quantity() {
        let quantity = json!({
            "value": 120,
            "unit": "mmHg",
            "system": "http://unitsofmeasure.org",
            "code": "mm[Hg]"
        });
        let values = ValueConverter::convert(&quantity, SearchParamType::Quantity).unwrap();
        assert_eq!(
            values,
            vec![IndexValue::quantity(
                120.0,
                Some("http://unitsofmeasure.org".to_string()),
                Some("mm[Hg]".to_string())
            )]
        );
    }

    #[test]
    fn test_convert_reference() {
        let values =
            ValueConverter::convert(&json!({"reference": "Patient/1"}), SearchParamType::Reference)
                .unwrap();
        assert_eq!(values, vec![IndexValue::reference("Patient/1")]);

        let values =
            ValueConverter::convert(&json!({"display": "x"}), SearchParamType::Reference).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_quantity_literal() {
        let full = QuantityLiteral::parse("5.4|http://unitsofmeasure.org|mg").unwrap();
        assert_eq!(full.value, Decimal::new(54, 1));
        assert_eq!(full.system.as_deref(), Some("http://unitsofmeasure.org"));
        assert_eq!(full.code.as_deref(), Some("mg"));

        let code_only = QuantityLiteral::parse("5.4||mg").unwrap();
        assert_eq!(code_only.system, None);
        assert_eq!(code_only.code.as_deref(), Some("mg"));

        let bare = QuantityLiteral::parse("120").unwrap();
        assert_eq!(bare.code, None);

        assert!(QuantityLiteral::parse("abc|x|y").is_none());
    }

    #[test]
    fn test_check_search_value() {
        assert!(check_search_value(SearchParamType::Date, &SearchValue::eq("2024-02")).is_ok());
        assert!(check_search_value(SearchParamType::Date, &SearchValue::eq("02/2024")).is_err());
        assert!(check_search_value(SearchParamType::Number, &SearchValue::eq("x1")).is_err());
        assert!(check_search_value(SearchParamType::Token, &SearchValue::eq("|")).is_err());
    }
}
