//! Composite search value translation.
//!
//! A composite value such as `http://loinc.org|8480-6$gt100` is split on `$`
//! into one literal per declared component. Each literal is decoded for its
//! component's type, and the result is a conjunction that must be satisfied
//! by a single composite group of the indexed resource.

use crate::types::{SearchParamType, SearchValue};

use super::converters::check_search_value;
use super::registry::SearchParameterDefinition;

/// One decoded component of a composite search value.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentFilter {
    /// Component name as declared on the parameter.
    pub component: String,
    /// Component type.
    pub param_type: SearchParamType,
    /// Decoded value with its comparator.
    pub value: SearchValue,
}

/// Result of translating one composite search value.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositeMatch {
    /// The value cannot match anything.
    Empty,
    /// All filters must hold within one composite group.
    Conjunction(Vec<ComponentFilter>),
}

impl CompositeMatch {
    /// Returns true for [`CompositeMatch::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, CompositeMatch::Empty)
    }
}

/// Translates a raw composite value against its definition.
pub fn translate(definition: &SearchParameterDefinition, raw: &str) -> CompositeMatch {
    let components = definition.components();
    let parts: Vec<&str> = raw.split('$').collect();

    if components.is_empty() || parts.len() != components.len() {
        tracing::debug!(
            param = %definition.code,
            expected = components.len(),
            actual = parts.len(),
            "composite component count mismatch"
        );
        return CompositeMatch::Empty;
    }

    let mut filters = Vec::with_capacity(parts.len());
    for (component, part) in components.iter().zip(parts) {
        let value = SearchValue::parse_for(component.param_type, part);
        if let Err(message) = check_search_value(component.param_type, &value) {
            tracing::debug!(
                param = %definition.code,
                component = %component.name,
                %message,
                "malformed composite component"
            );
            return CompositeMatch::Empty;
        }
        filters.push(ComponentFilter {
            component: component.name.clone(),
            param_type: component.param_type,
            value,
        });
    }

    CompositeMatch::Conjunction(filters)
}
