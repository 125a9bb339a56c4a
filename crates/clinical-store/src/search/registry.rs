//! Search parameter registry.
//!
//! The registry maintains an in-memory table of search parameter
//! descriptors, indexed by both (resource_type, param_code) and canonical
//! URL, together with the reference parameters that place a resource in a
//! compartment.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::SearchParamType;

use super::errors::RegistryError;
use super::extractor::PathExpression;
use super::standard;

/// Status of a search parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterStatus {
    /// Active - indexed and usable in searches.
    #[default]
    Active,
    /// Draft - registered but not yet indexed.
    Draft,
    /// Retired - no longer indexed or searchable.
    Retired,
}

impl SearchParameterStatus {
    /// Returns true if this status allows the parameter to be used.
    pub fn is_usable(&self) -> bool {
        *self == SearchParameterStatus::Active
    }
}

/// Source of a search parameter definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterSource {
    /// Built-in standard table.
    #[default]
    Embedded,
    /// Registered at runtime.
    Custom,
}

/// Component of a composite search parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeComponentDef {
    /// Component name, also used as the index `component_name`.
    pub name: String,
    /// Type of the component value.
    pub param_type: SearchParamType,
    /// Path relative to the composite group root.
    pub expression: String,
}

impl CompositeComponentDef {
    /// Creates a component definition.
    pub fn new(
        name: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            expression: expression.into(),
        }
    }
}

/// Complete definition of a search parameter.
///
/// For composite parameters `expression` locates the group roots and each
/// component's expression is evaluated relative to one root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    /// Canonical URL (unique identifier).
    pub url: String,

    /// Parameter code (the name used in queries, e.g., "name", "identifier").
    pub code: String,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// Path expression for extracting values.
    pub expression: String,

    /// Resource types this parameter applies to.
    pub base: Vec<String>,

    /// Target resource types (for reference parameters).
    pub target: Option<Vec<String>>,

    /// Components (for composite parameters).
    pub component: Option<Vec<CompositeComponentDef>>,

    /// Current status.
    pub status: SearchParameterStatus,

    /// Source of this definition.
    pub source: SearchParameterSource,
}

impl SearchParameterDefinition {
    /// Creates a new search parameter definition.
    pub fn new(
        url: impl Into<String>,
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            code: code.into(),
            param_type,
            expression: expression.into(),
            base: Vec::new(),
            target: None,
            component: None,
            status: SearchParameterStatus::Active,
            source: SearchParameterSource::Embedded,
        }
    }

    /// Sets the base resource types.
    pub fn with_base<I, S>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base = base.into_iter().map(Into::into).collect();
        self
    }

    /// Sets target types for reference parameters.
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the components of a composite parameter.
    pub fn with_components(mut self, components: Vec<CompositeComponentDef>) -> Self {
        self.component = Some(components);
        self
    }

    /// Sets the source.
    pub fn with_source(mut self, source: SearchParameterSource) -> Self {
        self.source = source;
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: SearchParameterStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns whether this is a composite parameter.
    pub fn is_composite(&self) -> bool {
        self.param_type == SearchParamType::Composite
            && self.component.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Returns the composite components, or an empty slice.
    pub fn components(&self) -> &[CompositeComponentDef] {
        self.component.as_deref().unwrap_or_default()
    }

    /// Returns the declared reference targets, or an empty slice.
    pub fn targets(&self) -> &[String] {
        self.target.as_deref().unwrap_or_default()
    }

    /// Returns whether this parameter applies to the given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base.iter().any(|b| b == resource_type)
    }

    /// Checks the definition is usable for indexing.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |message: String| RegistryError::InvalidDefinition {
            url: self.url.clone(),
            message,
        };

        if self.code.is_empty() || self.code.starts_with('_') || self.code.contains('.') {
            return Err(invalid(format!("'{}' is not a valid parameter code", self.code)));
        }
        if self.base.is_empty() {
            return Err(invalid("no base resource type".to_string()));
        }
        PathExpression::parse(&self.expression).map_err(invalid)?;

        if self.param_type == SearchParamType::Composite {
            let components = self.components();
            if components.len() < 2 {
                return Err(invalid(
                    "a composite parameter needs at least two components".to_string(),
                ));
            }
            for component in components {
                if component.param_type == SearchParamType::Composite {
                    return Err(invalid(format!(
                        "component '{}' cannot itself be composite",
                        component.name
                    )));
                }
                PathExpression::parse(&component.expression).map_err(invalid)?;
            }
        }
        Ok(())
    }
}

/// In-memory registry of search parameter definitions.
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, param_code).
    params_by_type: HashMap<String, HashMap<String, Arc<SearchParameterDefinition>>>,

    /// Parameters indexed by canonical URL.
    params_by_url: HashMap<String, Arc<SearchParameterDefinition>>,

    /// compartment type -> member resource type -> reference parameter codes.
    compartments: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl SearchParameterRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            params_by_type: HashMap::new(),
            params_by_url: HashMap::new(),
            compartments: HashMap::new(),
        }
    }

    /// Creates a registry loaded with the standard table.
    pub fn with_standard_params() -> Self {
        let mut registry = Self::new();
        for param in standard::standard_parameters() {
            if !registry.params_by_url.contains_key(&param.url) {
                registry.register_internal(param);
            }
        }
        for (resource_type, codes) in standard::PATIENT_COMPARTMENT {
            for code in codes.iter() {
                registry.add_compartment_param("Patient", resource_type, code);
            }
        }
        registry
    }

    /// Returns the number of registered parameters.
    pub fn len(&self) -> usize {
        self.params_by_url.len()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.params_by_url.is_empty()
    }

    /// Gets all active parameters for a resource type, ordered by code.
    pub fn get_active_params(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>> {
        let mut params: Vec<_> = self
            .params_by_type
            .get(resource_type)
            .map(|params| {
                params
                    .values()
                    .filter(|p| p.status.is_usable())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        params.sort_by(|a, b| a.code.cmp(&b.code));
        params
    }

    /// Gets an active parameter by resource type and code.
    pub fn get_param(
        &self,
        resource_type: &str,
        code: &str,
    ) -> Option<Arc<SearchParameterDefinition>> {
        self.params_by_type
            .get(resource_type)
            .and_then(|params| params.get(code))
            .filter(|p| p.status.is_usable())
            .cloned()
    }

    /// Gets a parameter by its canonical URL.
    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameterDefinition>> {
        self.params_by_url.get(url).cloned()
    }

    /// Registers a new parameter after validating it.
    pub fn register(&mut self, param: SearchParameterDefinition) -> Result<(), RegistryError> {
        if self.params_by_url.contains_key(&param.url) {
            return Err(RegistryError::DuplicateUrl { url: param.url });
        }
        param.validate()?;
        for base in &param.base {
            if self.get_param(base, &param.code).is_some() {
                return Err(RegistryError::InvalidDefinition {
                    url: param.url.clone(),
                    message: format!("{} already has a parameter '{}'", base, param.code),
                });
            }
        }

        tracing::debug!(url = %param.url, code = %param.code, "registered search parameter");
        self.register_internal(param);
        Ok(())
    }

    fn register_internal(&mut self, param: SearchParameterDefinition) {
        let param = Arc::new(param);

        self.params_by_url
            .insert(param.url.clone(), Arc::clone(&param));

        for base in &param.base {
            self.params_by_type
                .entry(base.clone())
                .or_default()
                .insert(param.code.clone(), Arc::clone(&param));
        }
    }

    /// Declares that `code` on `resource_type` places a resource in the
    /// compartment of the referenced `compartment_type`.
    pub fn add_compartment_param(
        &mut self,
        compartment_type: &str,
        resource_type: &str,
        code: &str,
    ) {
        self.compartments
            .entry(compartment_type.to_string())
            .or_default()
            .entry(resource_type.to_string())
            .or_default()
            .insert(code.to_string());
    }

    /// Returns the reference parameters of `resource_type` that denote
    /// membership in `compartment_type` compartments.
    pub fn compartment_params(&self, compartment_type: &str, resource_type: &str) -> Vec<String> {
        self.compartments
            .get(compartment_type)
            .and_then(|types| types.get(resource_type))
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the compartment types that have at least one declared member type.
    pub fn compartment_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.compartments.keys().cloned().collect();
        types.sort();
        types
    }

    /// Returns all resource types that have registered parameters, sorted.
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.params_by_type.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for SearchParameterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SearchParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterRegistry")
            .field("params_count", &self.params_by_url.len())
            .field("resource_types", &self.resource_types())
            .finish()
    }
}
