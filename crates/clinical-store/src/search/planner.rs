//! Search query planning.
//!
//! The planner turns a raw [`SearchQuery`] into a [`QueryPlan`]: one
//! [`Clause`] per distinct parameter key, plus sort keys and paging. Planning
//! never fails. Problems are recorded as [`QueryError`] warnings and degrade
//! the affected clause:
//!
//! - an unknown parameter is dropped;
//! - a malformed value is dropped from its clause, and a clause left with no
//!   value becomes [`ClauseKind::NoMatch`];
//! - an unknown or inapplicable modifier makes the clause `NoMatch`;
//! - chained and composite clauses in one request make the whole plan empty.
//!
//! Values of one key are ORed; clauses are ANDed.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::QueryError;
use crate::types::{
    split_or_values, CompartmentScope, SearchModifier, SearchParamType, SearchQuery, SearchValue,
    SortDirection, SortDirective,
};

use super::composite::{translate, ComponentFilter, CompositeMatch};
use super::converters::check_search_value;
use super::references::{classify, ReferenceLookup};
use super::registry::{SearchParameterDefinition, SearchParameterRegistry};

/// Columns of the resource row that can be searched directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceColumn {
    /// The logical id (`_id`).
    Id,
    /// The last-updated instant (`_lastUpdated`).
    LastUpdated,
}

/// How one parameter key is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseKind {
    /// Indexed parameter compared against its typed column.
    Simple {
        /// Parameter type.
        param_type: SearchParamType,
        /// Optional modifier.
        modifier: Option<SearchModifier>,
        /// ORed values.
        values: Vec<SearchValue>,
    },
    /// Composite parameter; each alternative must hold within one group.
    Composite {
        /// ORed alternatives.
        alternatives: Vec<Vec<ComponentFilter>>,
    },
    /// `ref.param` evaluated against referenced resources.
    Chained {
        /// Reference parameter on the base type.
        reference_param: String,
        /// Candidate target types that declare `target_param`.
        target_types: Vec<String>,
        /// Parameter evaluated on the target.
        target_param: String,
        /// Type of `target_param`.
        param_type: SearchParamType,
        /// Modifier on `target_param`.
        modifier: Option<SearchModifier>,
        /// ORed values.
        values: Vec<SearchValue>,
    },
    /// `:missing`.
    Missing {
        /// True when the parameter must be absent.
        missing: bool,
    },
    /// Compared against the resource row itself.
    ResourceColumn {
        /// The column.
        column: ResourceColumn,
        /// ORed values.
        values: Vec<SearchValue>,
    },
    /// Matches nothing.
    NoMatch,
}

/// One ANDed filter of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// The parameter key as received, including modifier.
    pub name: String,
    /// How to evaluate it.
    pub kind: ClauseKind,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// By logical id.
    Id(SortDirection),
    /// By last-updated instant.
    LastUpdated(SortDirection),
    /// By the smallest (ascending) or largest (descending) indexed value.
    Param {
        /// Parameter name.
        name: String,
        /// Parameter type, which selects the value column.
        param_type: SearchParamType,
        /// Direction.
        direction: SortDirection,
    },
}

/// An executable search plan.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Base resource type.
    pub resource_type: String,
    /// ANDed clauses.
    pub clauses: Vec<Clause>,
    /// Sort keys; empty means newest first.
    pub sort: Vec<SortKey>,
    /// Page size, already clamped.
    pub count: u32,
    /// Matches to skip.
    pub offset: u32,
    /// Optional compartment restriction.
    pub compartment: Option<CompartmentScope>,
    /// When true the plan matches nothing regardless of clauses.
    pub empty: bool,
    /// Problems recorded while planning.
    pub warnings: Vec<QueryError>,
}

impl QueryPlan {
    /// Returns true if any clause is chained.
    pub fn has_chained(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c.kind, ClauseKind::Chained { .. }))
    }

    /// Returns true if any clause is composite.
    pub fn has_composite(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c.kind, ClauseKind::Composite { .. }))
    }
}

/// Builds [`QueryPlan`]s from raw queries.
pub struct QueryPlanner {
    registry: Arc<RwLock<SearchParameterRegistry>>,
    default_count: u32,
    max_count: u32,
}

impl QueryPlanner {
    /// Creates a planner with the given paging limits.
    pub fn new(
        registry: Arc<RwLock<SearchParameterRegistry>>,
        default_count: u32,
        max_count: u32,
    ) -> Self {
        Self {
            registry,
            default_count,
            max_count: max_count.max(1),
        }
    }

    /// Plans a query.
    pub fn plan(&self, query: &SearchQuery) -> QueryPlan {
        let mut warnings = Vec::new();
        let mut sort_directives: Vec<SortDirective> = query.sort.clone();
        let mut count = query.count;
        let mut offset = query.offset;

        // Group by full key, keeping first-seen order.
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for (name, raw) in &query.parameters {
            match name.as_str() {
                "_count" => {
                    match raw.trim().parse::<u32>() {
                        Ok(n) => count = count.or(Some(n)),
                        Err(_) => warnings.push(malformed(name, format!("'{}' is not a count", raw))),
                    }
                    continue;
                }
                "_offset" => {
                    match raw.trim().parse::<u32>() {
                        Ok(n) => offset = offset.or(Some(n)),
                        Err(_) => {
                            warnings.push(malformed(name, format!("'{}' is not an offset", raw)))
                        }
                    }
                    continue;
                }
                "_sort" => {
                    sort_directives.extend(SortDirective::parse_list(raw));
                    continue;
                }
                _ => {}
            }

            let mut values = split_or_values(raw);
            if values.is_empty() {
                // `:missing` with no value still filters, as `false`.
                if !name.ends_with(":missing") {
                    continue;
                }
                values.push(String::new());
            }
            match groups.iter_mut().find(|(key, _)| key == name) {
                Some((_, existing)) => existing.extend(values),
                None => groups.push((name.clone(), values)),
            }
        }

        let registry = self.registry.read();
        let mut clauses = Vec::new();
        for (key, values) in groups {
            if let Some(kind) = self.plan_clause(&registry, &query.resource_type, &key, &values, &mut warnings) {
                clauses.push(Clause { name: key, kind });
            }
        }

        let sort = self.plan_sort(&registry, &query.resource_type, &sort_directives, &mut warnings);
        drop(registry);

        let mut plan = QueryPlan {
            resource_type: query.resource_type.clone(),
            clauses,
            sort,
            count: count.unwrap_or(self.default_count).min(self.max_count),
            offset: offset.unwrap_or(0),
            compartment: query.compartment.clone(),
            empty: false,
            warnings,
        };

        if plan.has_chained() && plan.has_composite() {
            plan.empty = true;
            plan.warnings.push(QueryError::UnsupportedCombination {
                message: "chained and composite parameters cannot be combined".to_string(),
            });
        }

        for warning in &plan.warnings {
            tracing::debug!(resource_type = %plan.resource_type, %warning, "search parameter degraded");
        }
        plan
    }

    fn plan_clause(
        &self,
        registry: &SearchParameterRegistry,
        resource_type: &str,
        key: &str,
        values: &[String],
        warnings: &mut Vec<QueryError>,
    ) -> Option<ClauseKind> {
        if let Some((head, tail)) = key.split_once('.') {
            return self.plan_chained(registry, resource_type, key, head, tail, values, warnings);
        }

        let (name, modifier) = match key.split_once(':') {
            Some((name, modifier)) => (name, Some(modifier)),
            None => (key, None),
        };

        match name {
            "_id" => return Some(plan_resource_column(key, ResourceColumn::Id, modifier, values, warnings)),
            "_lastUpdated" => {
                return Some(plan_resource_column(
                    key,
                    ResourceColumn::LastUpdated,
                    modifier,
                    values,
                    warnings,
                ));
            }
            _ => {}
        }

        let Some(def) = registry.get_param(resource_type, name) else {
            warnings.push(QueryError::UnknownParameter {
                resource_type: resource_type.to_string(),
                name: name.to_string(),
            });
            return None;
        };

        let modifier = match modifier.map(|m| (m, SearchModifier::parse(m))) {
            None => None,
            Some((_, Some(m))) if m.is_valid_for(def.param_type) => Some(m),
            Some((raw, _)) => {
                warnings.push(malformed(key, format!("modifier ':{}' is not supported here", raw)));
                return Some(ClauseKind::NoMatch);
            }
        };

        if modifier == Some(SearchModifier::Missing) {
            let missing = values.first().map(|v| v == "true").unwrap_or(false);
            return Some(ClauseKind::Missing { missing });
        }

        if def.is_composite() {
            return Some(plan_composite(key, &def, values, warnings));
        }

        let values = parse_values(key, def.param_type, modifier.as_ref(), values, warnings);
        if values.is_empty() {
            return Some(ClauseKind::NoMatch);
        }
        Some(ClauseKind::Simple {
            param_type: def.param_type,
            modifier,
            values,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_chained(
        &self,
        registry: &SearchParameterRegistry,
        resource_type: &str,
        key: &str,
        head: &str,
        tail: &str,
        values: &[String],
        warnings: &mut Vec<QueryError>,
    ) -> Option<ClauseKind> {
        if tail.contains('.') {
            warnings.push(QueryError::UnsupportedCombination {
                message: format!("'{}' chains more than one reference", key),
            });
            return Some(ClauseKind::NoMatch);
        }

        let (reference_param, explicit_type) = match head.split_once(':') {
            Some((param, target_type)) => (param, Some(target_type)),
            None => (head, None),
        };

        let Some(reference) = registry
            .get_param(resource_type, reference_param)
            .filter(|d| d.param_type == SearchParamType::Reference)
        else {
            warnings.push(QueryError::UnknownParameter {
                resource_type: resource_type.to_string(),
                name: reference_param.to_string(),
            });
            return None;
        };

        let candidates: Vec<String> = match explicit_type {
            Some(t) => vec![t.to_string()],
            None => reference.targets().to_vec(),
        };

        let (target_param, target_modifier) = match tail.split_once(':') {
            Some((param, modifier)) => (param, Some(modifier)),
            None => (tail, None),
        };

        let (target_types, param_type) = if target_param == "_id" {
            (candidates, SearchParamType::Token)
        } else {
            let mut found: Option<SearchParamType> = None;
            let mut types = Vec::new();
            for candidate in &candidates {
                if let Some(def) = registry.get_param(candidate, target_param) {
                    if found.is_none() || found == Some(def.param_type) {
                        found = Some(def.param_type);
                        types.push(candidate.clone());
                    }
                }
            }
            match found {
                Some(t) => (types, t),
                None => {
                    warnings.push(QueryError::UnknownParameter {
                        resource_type: candidates.join(","),
                        name: target_param.to_string(),
                    });
                    return None;
                }
            }
        };

        if param_type == SearchParamType::Composite {
            warnings.push(QueryError::UnsupportedCombination {
                message: format!("'{}' chains into a composite parameter", key),
            });
            return Some(ClauseKind::NoMatch);
        }

        let modifier = match target_modifier.map(|m| (m, SearchModifier::parse(m))) {
            None => None,
            Some((_, Some(m))) if m != SearchModifier::Missing && m.is_valid_for(param_type) => Some(m),
            Some((raw, _)) => {
                warnings.push(malformed(key, format!("modifier ':{}' is not supported in a chain", raw)));
                return Some(ClauseKind::NoMatch);
            }
        };

        let values = parse_values(key, param_type, modifier.as_ref(), values, warnings);
        if values.is_empty() || target_types.is_empty() {
            return Some(ClauseKind::NoMatch);
        }

        Some(ClauseKind::Chained {
            reference_param: reference_param.to_string(),
            target_types,
            target_param: target_param.to_string(),
            param_type,
            modifier,
            values,
        })
    }

    fn plan_sort(
        &self,
        registry: &SearchParameterRegistry,
        resource_type: &str,
        directives: &[SortDirective],
        warnings: &mut Vec<QueryError>,
    ) -> Vec<SortKey> {
        let mut keys = Vec::new();
        for directive in directives {
            let key = match directive.parameter.as_str() {
                "_id" => SortKey::Id(directive.direction),
                "_lastUpdated" => SortKey::LastUpdated(directive.direction),
                name => match registry
                    .get_param(resource_type, name)
                    .filter(|d| !d.is_composite())
                {
                    Some(def) => SortKey::Param {
                        name: name.to_string(),
                        param_type: def.param_type,
                        direction: directive.direction,
                    },
                    None => {
                        warnings.push(QueryError::UnknownParameter {
                            resource_type: resource_type.to_string(),
                            name: format!("_sort={}", name),
                        });
                        continue;
                    }
                },
            };
            keys.push(key);
        }
        keys
    }
}

impl std::fmt::Debug for QueryPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlanner")
            .field("default_count", &self.default_count)
            .field("max_count", &self.max_count)
            .finish()
    }
}

fn malformed(name: &str, message: String) -> QueryError {
    QueryError::MalformedValue {
        name: name.to_string(),
        message,
    }
}

fn plan_resource_column(
    key: &str,
    column: ResourceColumn,
    modifier: Option<&str>,
    raw_values: &[String],
    warnings: &mut Vec<QueryError>,
) -> ClauseKind {
    if let Some(modifier) = modifier {
        warnings.push(malformed(key, format!("modifier ':{}' is not supported here", modifier)));
        return ClauseKind::NoMatch;
    }

    let values: Vec<SearchValue> = match column {
        ResourceColumn::Id => raw_values.iter().map(SearchValue::eq).collect(),
        ResourceColumn::LastUpdated => raw_values
            .iter()
            .map(|raw| SearchValue::parse_for(SearchParamType::Date, raw))
            .filter(|value| match check_search_value(SearchParamType::Date, value) {
                Ok(()) => true,
                Err(message) => {
                    warnings.push(malformed(key, message));
                    false
                }
            })
            .collect(),
    };

    if values.is_empty() {
        ClauseKind::NoMatch
    } else {
        ClauseKind::ResourceColumn { column, values }
    }
}

fn plan_composite(
    key: &str,
    def: &SearchParameterDefinition,
    raw_values: &[String],
    warnings: &mut Vec<QueryError>,
) -> ClauseKind {
    let mut alternatives = Vec::new();
    for raw in raw_values {
        match translate(def, raw) {
            CompositeMatch::Conjunction(filters) => alternatives.push(filters),
            CompositeMatch::Empty => warnings.push(malformed(
                key,
                format!("'{}' does not match the {} declared components", raw, def.components().len()),
            )),
        }
    }

    if alternatives.is_empty() {
        ClauseKind::NoMatch
    } else {
        ClauseKind::Composite { alternatives }
    }
}

fn parse_values(
    key: &str,
    param_type: SearchParamType,
    modifier: Option<&SearchModifier>,
    raw_values: &[String],
    warnings: &mut Vec<QueryError>,
) -> Vec<SearchValue> {
    let lookup = ReferenceLookup::new();
    let mut values = Vec::new();

    for raw in raw_values {
        let mut value = SearchValue::parse_for(param_type, raw);
        if let Err(message) = check_search_value(param_type, &value) {
            warnings.push(malformed(key, message));
            continue;
        }

        if param_type == SearchParamType::Reference {
            if let Some(normalized) = classify(&value.value, &lookup).type_and_id() {
                value.value = normalized;
            } else if let Some(SearchModifier::Type(target)) = modifier {
                if !value.value.contains('/') {
                    value.value = format!("{}/{}", target, value.value);
                }
            }
        }
        values.push(value);
    }
    values
}
