//! Search parameter value extractor.
//!
//! Evaluates the path expressions of the registry's descriptors against a
//! resource and converts what they reach into [`IndexValue`]s.
//!
//! The path language is deliberately small:
//!
//! ```text
//! Observation.component.code            field navigation, arrays flattened
//! Observation.value.ofType(Quantity)    polymorphic field (valueQuantity)
//! Observation.effective                 any effective[x] present
//! Observation.code | Observation.component.code   union
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IndexingError;
use crate::types::SearchParamType;

use super::converters::{IndexValue, ValueConverter};
use super::registry::{SearchParameterDefinition, SearchParameterRegistry};

/// A value extracted from a resource for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedValue {
    /// The parameter name (e.g., "name", "identifier").
    pub param_name: String,

    /// The type of the value; for composite rows, the component's type.
    pub param_type: SearchParamType,

    /// The extracted and converted value.
    pub value: IndexValue,

    /// Component name, for composite rows.
    pub component: Option<String>,

    /// Composite group ID. Rows sharing a group came from the same element.
    pub composite_group: Option<u32>,
}

impl ExtractedValue {
    /// Creates a new extracted value.
    pub fn new(param_name: impl Into<String>, value: IndexValue) -> Self {
        Self {
            param_name: param_name.into(),
            param_type: value.param_type(),
            value,
            component: None,
            composite_group: None,
        }
    }

    /// Marks the value as one component of a composite group.
    pub fn with_component(mut self, component: impl Into<String>, group: u32) -> Self {
        self.component = Some(component.into());
        self.composite_group = Some(group);
        self
    }
}

/// The outcome of extracting one resource.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Every indexable value found.
    pub values: Vec<ExtractedValue>,

    /// Values that were present but could not be indexed.
    pub issues: Vec<IndexingError>,
}

impl Extraction {
    /// Returns true if at least one value was skipped.
    pub fn is_under_indexed(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Returns the values for one parameter.
    pub fn values_for<'a>(&'a self, param_name: &'a str) -> impl Iterator<Item = &'a ExtractedValue> {
        self.values.iter().filter(move |v| v.param_name == param_name)
    }
}

/// A raw reference string found in a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    /// The reference parameter that located it.
    pub param_name: String,
    /// The parameter's path expression.
    pub path: String,
    /// The reference as written.
    pub value: String,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    alternatives: Vec<Vec<PathSegment>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    /// A field name, matching `name` or any `name[X]` choice field.
    Field(String),
    /// A polymorphic field narrowed by `ofType(X)`.
    Choice { field: String, type_name: String },
}

impl PathExpression {
    /// Parses an expression.
    ///
    /// A leading capitalized segment names the resource type and is skipped,
    /// so `Observation` alone denotes the resource itself.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let mut alternatives = Vec::new();

        for alternative in expression.split('|').map(str::trim) {
            if alternative.is_empty() {
                return Err(format!("empty alternative in '{}'", expression));
            }

            let mut segments: Vec<PathSegment> = Vec::new();
            for (i, part) in alternative.split('.').enumerate() {
                if i == 0 && part.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                    continue;
                }
                if let Some(type_name) = part
                    .strip_prefix("ofType(")
                    .and_then(|rest| rest.strip_suffix(')'))
                {
                    if !is_identifier(type_name) {
                        return Err(format!("bad type name in '{}'", alternative));
                    }
                    match segments.pop() {
                        Some(PathSegment::Field(field)) => segments.push(PathSegment::Choice {
                            field,
                            type_name: type_name.to_string(),
                        }),
                        _ => {
                            return Err(format!(
                                "ofType() must follow a field in '{}'",
                                alternative
                            ));
                        }
                    }
                } else if is_identifier(part) {
                    segments.push(PathSegment::Field(part.to_string()));
                } else {
                    return Err(format!("unsupported path segment '{}'", part));
                }
            }
            alternatives.push(segments);
        }

        Ok(Self { alternatives })
    }

    /// Evaluates the expression, flattening arrays at every step.
    pub fn evaluate<'a>(&self, value: &'a Value) -> Vec<&'a Value> {
        let mut out = Vec::new();
        for segments in &self.alternatives {
            navigate(value, segments, &mut out);
        }
        out
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_choice_of(key: &str, field: &str) -> bool {
    key.strip_prefix(field)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

fn choice_key(field: &str, type_name: &str) -> String {
    let mut chars = type_name.chars();
    match chars.next() {
        Some(first) => format!("{}{}{}", field, first.to_ascii_uppercase(), chars.as_str()),
        None => field.to_string(),
    }
}

fn navigate<'a>(value: &'a Value, segments: &[PathSegment], out: &mut Vec<&'a Value>) {
    if let Value::Array(items) = value {
        for item in items {
            navigate(item, segments, out);
        }
        return;
    }

    let Some((first, rest)) = segments.split_first() else {
        if !value.is_null() {
            out.push(value);
        }
        return;
    };

    let Value::Object(obj) = value else {
        return;
    };

    match first {
        PathSegment::Field(name) => {
            if let Some(child) = obj.get(name) {
                navigate(child, rest, out);
            } else {
                for (_, child) in obj.iter().filter(|(key, _)| is_choice_of(key, name)) {
                    navigate(child, rest, out);
                }
            }
        }
        PathSegment::Choice { field, type_name } => {
            if let Some(child) = obj.get(&choice_key(field, type_name)) {
                navigate(child, rest, out);
            }
        }
    }
}

/// Extracts searchable values from resources using the registry's paths.
pub struct SearchParameterExtractor {
    registry: Arc<RwLock<SearchParameterRegistry>>,
}

impl SearchParameterExtractor {
    /// Creates a new extractor with the given registry.
    pub fn new(registry: Arc<RwLock<SearchParameterRegistry>>) -> Self {
        Self { registry }
    }

    /// Returns the registry this extractor reads.
    pub fn registry(&self) -> &Arc<RwLock<SearchParameterRegistry>> {
        &self.registry
    }

    /// Extracts all searchable values from a resource.
    ///
    /// Extraction is total: absent paths yield nothing and unclassifiable
    /// values are reported in [`Extraction::issues`] instead of failing.
    pub fn extract(&self, resource_type: &str, resource: &Value) -> Extraction {
        let mut extraction = Extraction::default();
        if !resource.is_object() {
            return extraction;
        }

        let params = {
            let registry = self.registry.read();
            registry.get_active_params(resource_type)
        };

        let mut next_group = 0u32;
        for param in &params {
            if param.is_composite() {
                self.extract_composite(resource_type, resource, param, &mut next_group, &mut extraction);
            } else {
                self.extract_for_param(resource_type, resource, param, &mut extraction);
            }
        }

        for issue in &extraction.issues {
            tracing::warn!(resource_type, issue = %issue, "value skipped during indexing");
        }
        extraction
    }

    /// Extracts values for a single non-composite parameter.
    pub fn extract_for_param(
        &self,
        resource_type: &str,
        resource: &Value,
        param: &SearchParameterDefinition,
        extraction: &mut Extraction,
    ) {
        let path = match PathExpression::parse(&param.expression) {
            Ok(path) => path,
            Err(message) => {
                extraction.issues.push(IndexingError::InvalidPath {
                    path: param.expression.clone(),
                    message,
                });
                return;
            }
        };

        for value in path.evaluate(resource) {
            match ValueConverter::convert(value, param.param_type) {
                Ok(converted) => extraction.values.extend(
                    converted
                        .into_iter()
                        .map(|v| ExtractedValue::new(&param.code, v)),
                ),
                Err(message) => extraction.issues.push(IndexingError::UnclassifiableValue {
                    resource_type: resource_type.to_string(),
                    param_name: param.code.clone(),
                    message,
                }),
            }
        }
    }

    /// Extracts one group per root element of a composite parameter.
    fn extract_composite(
        &self,
        resource_type: &str,
        resource: &Value,
        param: &SearchParameterDefinition,
        next_group: &mut u32,
        extraction: &mut Extraction,
    ) {
        let parsed = PathExpression::parse(&param.expression).and_then(|root| {
            param
                .components()
                .iter()
                .map(|c| PathExpression::parse(&c.expression).map(|p| (c, p)))
                .collect::<Result<Vec<_>, _>>()
                .map(|components| (root, components))
        });
        let (root, components) = match parsed {
            Ok(parsed) => parsed,
            Err(message) => {
                extraction.issues.push(IndexingError::InvalidPath {
                    path: param.expression.clone(),
                    message,
                });
                return;
            }
        };

        for element in root.evaluate(resource) {
            let group = *next_group;
            *next_group += 1;

            for (component, path) in &components {
                for value in path.evaluate(element) {
                    match ValueConverter::convert(value, component.param_type) {
                        Ok(converted) => extraction.values.extend(converted.into_iter().map(|v| {
                            ExtractedValue::new(&param.code, v).with_component(&component.name, group)
                        })),
                        Err(message) => extraction.issues.push(IndexingError::UnclassifiableValue {
                            resource_type: resource_type.to_string(),
                            param_name: format!("{}.{}", param.code, component.name),
                            message,
                        }),
                    }
                }
            }
        }
    }

    /// Returns every raw reference string reachable through the reference
    /// parameters of `resource_type`.
    pub fn extract_references(&self, resource_type: &str, resource: &Value) -> Vec<RawReference> {
        let params = {
            let registry = self.registry.read();
            registry.get_active_params(resource_type)
        };

        let mut references = Vec::new();
        for param in params
            .iter()
            .filter(|p| p.param_type == SearchParamType::Reference)
        {
            let Ok(path) = PathExpression::parse(&param.expression) else {
                continue;
            };
            for value in path.evaluate(resource) {
                if let Ok(converted) = ValueConverter::convert(value, SearchParamType::Reference) {
                    for v in converted {
                        if let IndexValue::Reference(raw) = v {
                            references.push(RawReference {
                                param_name: param.code.clone(),
                                path: param.expression.clone(),
                                value: raw,
                            });
                        }
                    }
                }
            }
        }
        references
    }
}

impl std::fmt::Debug for SearchParameterExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterExtractor").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_extractor() -> SearchParameterExtractor {
        let registry = SearchParameterRegistry::with_standard_params();
        SearchParameterExtractor::new(Arc::new(RwLock::new(registry)))
    }

    #[test]
    fn test_parse_paths() {
        assert!(PathExpression::parse("Patient.name.family").is_ok());
        assert!(PathExpression::parse("Observation.value.ofType(Quantity)").is_ok());
        assert!(PathExpression::parse("Observation.code | Observation.component.code").is_ok());
        assert!(PathExpression::parse("Patient.ofType(Quantity)").is_err());
        assert!(PathExpression::parse("Patient.name.where(use='official')").is_err());
        assert!(PathExpression::parse("Patient.name |").is_err());
    }

    #[test]
    fn test_root_path_is_resource_itself() {
        let resource = json!({"resourceType": "Observation", "status": "final"});
        let path = PathExpression::parse("Observation").unwrap();
        assert_eq!(path.evaluate(&resource), vec![&resource]);
    }

    #[test]
    fn test_choice_navigation() {
        let resource = json!({"effectivePeriod": {"start": "2024-01-01"}, "valueQuantity": {"value": 1}});

        let implicit = PathExpression::parse("Observation.effective").unwrap();
        assert_eq!(implicit.evaluate(&resource).len(), 1);

        let typed = PathExpression::parse("Observation.value.ofType(Quantity)").unwrap();
        assert_eq!(typed.evaluate(&resource), vec![&json!({"value": 1})]);

        let wrong_type = PathExpression::parse("Observation.value.ofType(string)").unwrap();
        assert!(wrong_type.evaluate(&resource).is_empty());
    }

    #[test]
    fn test_extract_patient_name_and_identifier() {
        let extractor = create_test_extractor();
        let patient = json!({
            "resourceType": "Patient",
            "id": "123",
            "name": [{"family": "Smith", "given": ["John", "James"]}],
            "identifier": [{"system": "http://hospital.org/mrn", "value": "12345"}]
        });

        let extraction = extractor.extract("Patient", &patient);
        assert!(!extraction.is_under_indexed());

        let given: Vec<_> = extraction.values_for("given").map(|v| &v.value).collect();
        assert_eq!(
            given,
            vec![&IndexValue::string("John"), &IndexValue::string("James")]
        );

        let identifier: Vec<_> = extraction.values_for("identifier").collect();
        assert_eq!(identifier.len(), 1);
        assert_eq!(
            identifier[0].value,
            IndexValue::token(Some("http://hospital.org/mrn".to_string()), "12345")
        );
    }

    #[test]
    fn test_absent_paths_produce_nothing() {
        let extractor = create_test_extractor();
        let patient = json!({"resourceType": "Patient", "id": "1"});
        let extraction = extractor.extract("Patient", &patient);
        assert!(extraction.values.is_empty());
        assert!(extraction.issues.is_empty());
    }

    #[test]
    fn test_unclassifiable_value_is_reported_not_fatal() {
        let extractor = create_test_extractor();
        let patient = json!({
            "resourceType": "Patient",
            "birthDate": "yesterday",
            "gender": "female"
        });

        let extraction = extractor.extract("Patient", &patient);
        assert!(extraction.is_under_indexed());
        assert!(matches!(
            &extraction.issues[0],
            IndexingError::UnclassifiableValue { param_name, .. } if param_name == "birthdate"
        ));
        assert_eq!(extraction.values_for("gender").count(), 1);
    }

    #[test]
    fn test_composite_groups_follow_source_elements() {
        let extractor = create_test_extractor();
        let observation = json!({
            "resourceType": "Observation",
            "component": [
                {
                    "code": {"coding": [{"system": "http://loinc.org", "code": "8480-6"}]},
                    "valueQuantity": {"value": 80}
                },
                {
                    "code": {"coding": [{"system": "http://loinc.org", "code": "8462-4"}]},
                    "valueQuantity": {"value": 120}
                }
            ]
        });

        let extraction = extractor.extract("Observation", &observation);
        let rows: Vec<_> = extraction
            .values_for("component-code-value-quantity")
            .collect();
        assert_eq!(rows.len(), 4);

        let group_of = |code: &str| {
            rows.iter()
                .find(|r| matches!(&r.value, IndexValue::Token { code: c, .. } if c == code))
                .and_then(|r| r.composite_group)
        };
        let group_of_value = |value: f64| {
            rows.iter()
                .find(|r| matches!(r.value, IndexValue::Quantity { value: v, .. } if v == value))
                .and_then(|r| r.composite_group)
        };
        assert_eq!(group_of("8480-6"), group_of_value(80.0));
        assert_eq!(group_of("8462-4"), group_of_value(120.0));
        assert_ne!(group_of("8480-6"), group_of("8462-4"));
    }

    #[test]
    fn test_extract_references() {
        let extractor = create_test_extractor();
        let condition = json!({
            "resourceType": "Condition",
            "subject": {"reference": "Patient/p1"},
            "asserter": {"reference": "Practitioner/dr1"}
        });

        let references = extractor.extract_references("Condition", &condition);
        let params: Vec<_> = references.iter().map(|r| r.param_name.as_str()).collect();
        assert_eq!(params, vec!["asserter", "patient", "subject"]);
        assert!(references.iter().all(|r| !r.value.is_empty()));
    }
}
