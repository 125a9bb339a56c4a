//! Reference resolution and compartment derivation.
//!
//! Every reference a resource holds through a reference-typed search
//! parameter is classified and, where possible, normalized to a
//! `(target_type, target_id)` pair:
//!
//! | Raw form | Kind |
//! |---|---|
//! | `Patient/123`, `Patient/123/_history/2` | [`ReferenceKind::Relative`] |
//! | `http://server/fhir/Patient/123` | [`ReferenceKind::Absolute`] |
//! | `urn:uuid:…` found in the lookup | [`ReferenceKind::Logical`] |
//! | `#contained`, unknown `urn:` | [`ReferenceKind::Unresolved`] |
//!
//! Logical references are resolved only through an explicit
//! [`ReferenceLookup`] built by the caller for one request or one job.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

use super::converters::IndexValue;
use super::extractor::{Extraction, SearchParameterExtractor};
use super::registry::SearchParameterRegistry;

/// Compartment type derived by the resolver.
pub const PATIENT_COMPARTMENT: &str = "Patient";

const URN_UUID_PREFIX: &str = "urn:uuid:";

static RELATIVE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Za-z]+)/([A-Za-z0-9\-.]{1,64})(?:/_history/([A-Za-z0-9\-.]{1,64}))?$")
        .expect("invalid reference regex")
});

static ABSOLUTE_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/([A-Z][A-Za-z]+)/([A-Za-z0-9\-.]{1,64})(?:/_history/([A-Za-z0-9\-.]{1,64}))?$")
        .expect("invalid reference regex")
});

/// Maps logical ids (the part after `urn:uuid:`) to resource types.
#[derive(Debug, Clone, Default)]
pub struct ReferenceLookup {
    types_by_id: HashMap<String, String>,
}

impl ReferenceLookup {
    /// Creates an empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` names a resource of `resource_type`.
    pub fn insert(&mut self, id: impl Into<String>, resource_type: impl Into<String>) {
        self.types_by_id.insert(id.into(), resource_type.into());
    }

    /// Returns the resource type recorded for `id`.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.types_by_id.get(id).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.types_by_id.len()
    }

    /// Returns true if the lookup is empty.
    pub fn is_empty(&self) -> bool {
        self.types_by_id.is_empty()
    }
}

/// How a raw reference was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `Type/id`.
    Relative,
    /// A URL ending in `Type/id`.
    Absolute,
    /// `urn:uuid:` resolved through the lookup.
    Logical,
    /// Contained, unknown `urn:` or otherwise unparseable.
    Unresolved,
}

/// One classified reference occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    /// The reference parameter that located it.
    pub param_name: String,
    /// The parameter's path expression.
    pub path: String,
    /// The reference as written.
    pub raw: String,
    /// Classification.
    pub kind: ReferenceKind,
    /// Target type, when resolved.
    pub target_type: Option<String>,
    /// Target id, when resolved.
    pub target_id: Option<String>,
    /// Pinned version (`/_history/n`), if any.
    pub version: Option<String>,
}

impl ResolvedReference {
    /// Returns true if a target was determined.
    pub fn is_resolved(&self) -> bool {
        self.target_type.is_some() && self.target_id.is_some()
    }

    /// The value written to the search index: `Type/id` when resolved,
    /// otherwise the raw string.
    pub fn search_value(&self) -> String {
        match (&self.target_type, &self.target_id) {
            (Some(t), Some(id)) => format!("{}/{}", t, id),
            _ => self.raw.clone(),
        }
    }
}

/// The classification of a single raw reference, without parameter context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    /// Classification.
    pub kind: ReferenceKind,
    /// Target type, when resolved.
    pub target_type: Option<String>,
    /// Target id, when resolved.
    pub target_id: Option<String>,
    /// Pinned version, if any.
    pub version: Option<String>,
}

impl ReferenceTarget {
    fn unresolved() -> Self {
        Self {
            kind: ReferenceKind::Unresolved,
            target_type: None,
            target_id: None,
            version: None,
        }
    }

    fn from_captures(kind: ReferenceKind, caps: &regex::Captures<'_>) -> Self {
        Self {
            kind,
            target_type: caps.get(1).map(|m| m.as_str().to_string()),
            target_id: caps.get(2).map(|m| m.as_str().to_string()),
            version: caps.get(3).map(|m| m.as_str().to_string()),
        }
    }

    /// `Type/id` when resolved.
    pub fn type_and_id(&self) -> Option<String> {
        match (&self.target_type, &self.target_id) {
            (Some(t), Some(id)) => Some(format!("{}/{}", t, id)),
            _ => None,
        }
    }
}

/// Classifies a raw reference string.
pub fn classify(raw: &str, lookup: &ReferenceLookup) -> ReferenceTarget {
    let raw = raw.trim();

    if raw.starts_with('#') {
        return ReferenceTarget::unresolved();
    }

    if let Some(id) = raw.strip_prefix(URN_UUID_PREFIX) {
        return match lookup.get(id) {
            Some(resource_type) => ReferenceTarget {
                kind: ReferenceKind::Logical,
                target_type: Some(resource_type.to_string()),
                target_id: Some(id.to_string()),
                version: None,
            },
            None => ReferenceTarget::unresolved(),
        };
    }

    if raw.starts_with("urn:") {
        return ReferenceTarget::unresolved();
    }

    if raw.starts_with("http://") || raw.starts_with("https://") {
        return ABSOLUTE_TAIL
            .captures(raw)
            .map(|caps| ReferenceTarget::from_captures(ReferenceKind::Absolute, &caps))
            .unwrap_or_else(ReferenceTarget::unresolved);
    }

    RELATIVE_REFERENCE
        .captures(raw)
        .map(|caps| ReferenceTarget::from_captures(ReferenceKind::Relative, &caps))
        .unwrap_or_else(ReferenceTarget::unresolved)
}

/// Returns the id of a `urn:uuid:` reference.
pub fn urn_uuid_id(raw: &str) -> Option<&str> {
    raw.trim().strip_prefix(URN_UUID_PREFIX)
}

/// The references and compartment memberships of one resource.
#[derive(Debug, Clone, Default)]
pub struct ResolvedReferences {
    /// Every reference occurrence.
    pub references: Vec<ResolvedReference>,
    /// `(compartment_type, compartment_id)` pairs, deduplicated.
    pub compartments: Vec<(String, String)>,
}

impl ResolvedReferences {
    /// References that could not be resolved.
    pub fn unresolved(&self) -> impl Iterator<Item = &ResolvedReference> {
        self.references.iter().filter(|r| !r.is_resolved())
    }
}

/// Resolves references and derives compartments for resources.
pub struct ReferenceResolver {
    registry: Arc<RwLock<SearchParameterRegistry>>,
    extractor: Arc<SearchParameterExtractor>,
}

impl ReferenceResolver {
    /// Creates a resolver sharing the extractor's registry.
    pub fn new(
        registry: Arc<RwLock<SearchParameterRegistry>>,
        extractor: Arc<SearchParameterExtractor>,
    ) -> Self {
        Self {
            registry,
            extractor,
        }
    }

    /// Classifies every reference of `resource` and derives its compartments.
    pub fn resolve(
        &self,
        resource_type: &str,
        resource_id: &str,
        resource: &Value,
        lookup: &ReferenceLookup,
    ) -> ResolvedReferences {
        let references: Vec<ResolvedReference> = self
            .extractor
            .extract_references(resource_type, resource)
            .into_iter()
            .map(|raw| {
                let target = classify(&raw.value, lookup);
                ResolvedReference {
                    param_name: raw.param_name,
                    path: raw.path,
                    raw: raw.value,
                    kind: target.kind,
                    target_type: target.target_type,
                    target_id: target.target_id,
                    version: target.version,
                }
            })
            .collect();

        let membership_params = self
            .registry
            .read()
            .compartment_params(PATIENT_COMPARTMENT, resource_type);

        let mut patients: BTreeSet<String> = references
            .iter()
            .filter(|r| membership_params.contains(&r.param_name))
            .filter(|r| r.target_type.as_deref() == Some(PATIENT_COMPARTMENT))
            .filter_map(|r| r.target_id.clone())
            .collect();
        if resource_type == PATIENT_COMPARTMENT {
            patients.insert(resource_id.to_string());
        }

        let compartments = patients
            .into_iter()
            .map(|id| (PATIENT_COMPARTMENT.to_string(), id))
            .collect();

        ResolvedReferences {
            references,
            compartments,
        }
    }

    /// Rewrites reference index values to their normalized `Type/id` form.
    pub fn normalize_extraction(&self, extraction: &mut Extraction, lookup: &ReferenceLookup) {
        for value in &mut extraction.values {
            if let IndexValue::Reference(raw) = &mut value.value {
                if let Some(normalized) = classify(raw, lookup).type_and_id() {
                    *raw = normalized;
                }
            }
        }
    }
}

impl std::fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_resolver() -> ReferenceResolver {
        let registry = Arc::new(RwLock::new(SearchParameterRegistry::with_standard_params()));
        let extractor = Arc::new(SearchParameterExtractor::new(registry.clone()));
        ReferenceResolver::new(registry, extractor)
    }

    #[test]
    fn test_classify_relative() {
        let target = classify("Patient/123", &ReferenceLookup::new());
        assert_eq!(target.kind, ReferenceKind::Relative);
        assert_eq!(target.type_and_id().as_deref(), Some("Patient/123"));

        let versioned = classify("Patient/123/_history/4", &ReferenceLookup::new());
        assert_eq!(versioned.version.as_deref(), Some("4"));
        assert_eq!(versioned.type_and_id().as_deref(), Some("Patient/123"));
    }

    #[test]
    fn test_classify_absolute() {
        let target = classify("https://example.org/fhir/Practitioner/dr-1", &ReferenceLookup::new());
        assert_eq!(target.kind, ReferenceKind::Absolute);
        assert_eq!(target.type_and_id().as_deref(), Some("Practitioner/dr-1"));

        let bare = classify("https://example.org/fhir", &ReferenceLookup::new());
        assert_eq!(bare.kind, ReferenceKind::Unresolved);
    }

    #[test]
    fn test_classify_logical() {
        let mut lookup = ReferenceLookup::new();
        lookup.insert("1b6f3c3a-7a1e-4c1e-9d55-1f0c0a6f2e11", "Patient");

        let resolved = classify("urn:uuid:1b6f3c3a-7a1e-4c1e-9d55-1f0c0a6f2e11", &lookup);
        assert_eq!(resolved.kind, ReferenceKind::Logical);
        assert_eq!(
            resolved.type_and_id().as_deref(),
            Some("Patient/1b6f3c3a-7a1e-4c1e-9d55-1f0c0a6f2e11")
        );

        let unknown = classify("urn:uuid:00000000-0000-0000-0000-000000000000", &lookup);
        assert_eq!(unknown.kind, ReferenceKind::Unresolved);
    }

    #[test]
    fn test_classify_unresolvable() {
        let lookup = ReferenceLookup::new();
        assert_eq!(classify("#contained-1", &lookup).kind, ReferenceKind::Unresolved);
        assert_eq!(classify("urn:oid:1.2.3", &lookup).kind, ReferenceKind::Unresolved);
        assert_eq!(classify("patient/1", &lookup).kind, ReferenceKind::Unresolved);
        assert_eq!(classify("Patient/", &lookup).kind, ReferenceKind::Unresolved);
    }

    #[test]
    fn test_resolve_compartments() {
        let resolver = create_test_resolver();
        let condition = json!({
            "resourceType": "Condition",
            "subject": {"reference": "Patient/p1"},
            "asserter": {"reference": "Patient/p2"},
            "encounter": {"reference": "Encounter/e1"}
        });

        let resolved = resolver.resolve("Condition", "c1", &condition, &ReferenceLookup::new());
        assert_eq!(
            resolved.compartments,
            vec![
                ("Patient".to_string(), "p1".to_string()),
                ("Patient".to_string(), "p2".to_string())
            ]
        );
        assert!(resolved.unresolved().next().is_none());
    }

    #[test]
    fn test_resolve_deduplicates_compartments() {
        let resolver = create_test_resolver();
        let observation = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/p1"},
            "performer": [{"reference": "Patient/p1"}, {"reference": "Practitioner/dr"}]
        });

        let resolved = resolver.resolve("Observation", "o1", &observation, &ReferenceLookup::new());
        assert_eq!(resolved.compartments.len(), 1);
    }

    #[test]
    fn test_patient_is_member_of_own_compartment() {
        let resolver = create_test_resolver();
        let patient = json!({"resourceType": "Patient", "id": "p9"});
        let resolved = resolver.resolve("Patient", "p9", &patient, &ReferenceLookup::new());
        assert_eq!(
            resolved.compartments,
            vec![("Patient".to_string(), "p9".to_string())]
        );
    }

    #[test]
    fn test_normalize_extraction() {
        let resolver = create_test_resolver();
        let extractor = SearchParameterExtractor::new(Arc::new(RwLock::new(
            SearchParameterRegistry::with_standard_params(),
        )));
        let mut lookup = ReferenceLookup::new();
        lookup.insert("abc", "Patient");

        let observation = json!({
            "resourceType": "Observation",
            "subject": {"reference": "urn:uuid:abc"},
            "encounter": {"reference": "http://example.org/fhir/Encounter/e1"}
        });
        let mut extraction = extractor.extract("Observation", &observation);
        resolver.normalize_extraction(&mut extraction, &lookup);

        let subject: Vec<_> = extraction.values_for("subject").map(|v| &v.value).collect();
        assert_eq!(subject, vec![&IndexValue::reference("Patient/abc")]);
        let encounter: Vec<_> = extraction.values_for("encounter").map(|v| &v.value).collect();
        assert_eq!(encounter, vec![&IndexValue::reference("Encounter/e1")]);
    }
}
