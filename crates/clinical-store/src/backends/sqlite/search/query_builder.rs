//! SQL query builder for planned searches.
//!
//! Translates a [`QueryPlan`] into SELECT and COUNT statements over the
//! `resources` table, with one `EXISTS` subquery per clause against the
//! derived `search_params`, `resource_references` and `compartments` tables.
//!
//! Placeholders are anonymous `?`; parameters are kept in the order their
//! placeholders appear in the SQL text.

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};

use crate::search::{ClauseKind, QueryPlan, ResourceColumn, SortKey};
use crate::types::{SearchModifier, SearchParamType, SearchValue, SortDirection};

use super::parameter_handlers::{value_condition, CompositeHandler, DateHandler};

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
    /// Null parameter.
    Null,
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    /// Creates an integer parameter.
    pub fn integer(i: i64) -> Self {
        SqlParam::Integer(i)
    }

    /// Creates a float parameter.
    pub fn float(f: f64) -> Self {
        SqlParam::Float(f)
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::String(s) => ToSqlOutput::from(s.as_str()),
            SqlParam::Integer(i) => ToSqlOutput::from(*i),
            SqlParam::Float(f) => ToSqlOutput::from(*f),
            SqlParam::Null => ToSqlOutput::Owned(SqlValue::Null),
        })
    }
}

impl SqlFragment {
    /// Creates a new SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A condition that is never true.
    pub fn never() -> Self {
        Self::new("1 = 0")
    }

    /// Combines with another fragment using AND.
    pub fn and(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) AND ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Combines with another fragment using OR.
    pub fn or(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) OR ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Wraps the fragment in `NOT (...)`.
    pub fn negate(self) -> Self {
        Self {
            sql: format!("NOT ({})", self.sql),
            params: self.params,
        }
    }

    /// Returns true if this fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Escapes `LIKE` wildcards; use with `ESCAPE '\'`.
pub fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// ORs one condition per value; no values matches nothing.
fn any_of<F>(values: &[SearchValue], mut condition: F) -> SqlFragment
where
    F: FnMut(&SearchValue) -> SqlFragment,
{
    values
        .iter()
        .map(&mut condition)
        .reduce(SqlFragment::or)
        .unwrap_or_else(SqlFragment::never)
}

/// Column holding the sortable value for a parameter type.
fn sort_column(param_type: SearchParamType) -> &'static str {
    match param_type {
        SearchParamType::String => "value_string",
        SearchParamType::Number => "value_number",
        SearchParamType::Date => "value_date",
        SearchParamType::Token => "value_token_code",
        SearchParamType::Reference => "value_reference",
        SearchParamType::Quantity => "value_quantity_value",
        SearchParamType::Composite => "value_string",
    }
}

/// Columns selected for each matching resource, in row order.
pub const RESOURCE_COLUMNS: &str = "r.id, r.resource_type, r.logical_id, r.version_id, r.data, \
     r.created_at, r.last_updated, r.under_indexed";

/// A complete statement with its parameters.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    /// SQL text.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlParam>,
}

/// Builds SQL statements from a [`QueryPlan`].
pub struct QueryBuilder<'a> {
    plan: &'a QueryPlan,
}

impl<'a> QueryBuilder<'a> {
    /// Creates a builder for `plan`.
    pub fn new(plan: &'a QueryPlan) -> Self {
        Self { plan }
    }

    /// Builds the WHERE condition shared by the select and count statements.
    pub fn where_clause(&self) -> SqlFragment {
        let mut fragment = SqlFragment::with_params(
            "r.resource_type = ? AND r.is_deleted = 0",
            vec![SqlParam::string(&self.plan.resource_type)],
        );

        if let Some(scope) = &self.plan.compartment {
            fragment = fragment.and(SqlFragment::with_params(
                "r.id IN (SELECT resource_id FROM compartments \
                 WHERE compartment_type = ? AND compartment_id = ?)",
                vec![
                    SqlParam::string(&scope.compartment_type),
                    SqlParam::string(&scope.compartment_id),
                ],
            ));
        }

        for clause in &self.plan.clauses {
            fragment = fragment.and(Self::clause_condition(&clause.name, &clause.kind));
        }

        fragment
    }

    fn clause_condition(name: &str, kind: &ClauseKind) -> SqlFragment {
        let param_name = name.split(':').next().unwrap_or(name);

        match kind {
            ClauseKind::Simple {
                param_type,
                modifier,
                values,
            } => {
                let values_sql = any_of(values, |v| value_condition("sp", *param_type, modifier.as_ref(), v));
                let exists = Self::param_exists("sp", "r.id", param_name, values_sql);
                if modifier == &Some(SearchModifier::Not) {
                    exists.negate()
                } else {
                    exists
                }
            }

            ClauseKind::Missing { missing } => {
                let exists = SqlFragment::with_params(
                    "EXISTS (SELECT 1 FROM search_params sp \
                     WHERE sp.resource_id = r.id AND sp.param_name = ?)",
                    vec![SqlParam::string(param_name)],
                );
                if *missing {
                    exists.negate()
                } else {
                    exists
                }
            }

            ClauseKind::Composite { alternatives } => alternatives
                .iter()
                .map(|filters| CompositeHandler::build_sql("r", param_name, filters))
                .reduce(SqlFragment::or)
                .unwrap_or_else(SqlFragment::never),

            ClauseKind::Chained {
                reference_param,
                target_types,
                target_param,
                param_type,
                modifier,
                values,
            } => Self::chained_condition(
                reference_param,
                target_types,
                target_param,
                *param_type,
                modifier.as_ref(),
                values,
            ),

            ClauseKind::ResourceColumn { column, values } => match column {
                ResourceColumn::Id => {
                    if values.is_empty() {
                        return SqlFragment::never();
                    }
                    let placeholders = vec!["?"; values.len()].join(", ");
                    SqlFragment::with_params(
                        format!("r.logical_id IN ({})", placeholders),
                        values.iter().map(|v| SqlParam::string(&v.value)).collect(),
                    )
                }
                ResourceColumn::LastUpdated => any_of(values, |v| {
                    DateHandler::build_instant_sql("substr(r.last_updated, 1, 23)", v)
                }),
            },

            ClauseKind::NoMatch => SqlFragment::never(),
        }
    }

    /// `EXISTS` over non-component rows of one parameter for `owner`.
    fn param_exists(alias: &str, owner: &str, param_name: &str, values: SqlFragment) -> SqlFragment {
        let mut params = vec![SqlParam::string(param_name)];
        params.extend(values.params);
        SqlFragment::with_params(
            format!(
                "EXISTS (SELECT 1 FROM search_params {a} WHERE {a}.resource_id = {owner} \
                 AND {a}.param_name = ? AND {a}.component_name IS NULL AND ({values}))",
                a = alias,
                owner = owner,
                values = values.sql
            ),
            params,
        )
    }

    fn chained_condition(
        reference_param: &str,
        target_types: &[String],
        target_param: &str,
        param_type: SearchParamType,
        modifier: Option<&SearchModifier>,
        values: &[SearchValue],
    ) -> SqlFragment {
        if target_types.is_empty() {
            return SqlFragment::never();
        }

        let target_condition = if target_param == "_id" {
            any_of(values, |v| {
                SqlFragment::with_params("t.logical_id = ?", vec![SqlParam::string(&v.value)])
            })
        } else {
            let values_sql = any_of(values, |v| value_condition("tsp", param_type, modifier, v));
            let exists = Self::param_exists("tsp", "t.id", target_param, values_sql);
            if modifier == Some(&SearchModifier::Not) {
                exists.negate()
            } else {
                exists
            }
        };

        let type_placeholders = vec!["?"; target_types.len()].join(", ");
        let mut params = vec![SqlParam::string(reference_param)];
        params.extend(target_types.iter().map(SqlParam::string));
        params.extend(target_condition.params);

        SqlFragment::with_params(
            format!(
                "EXISTS (SELECT 1 FROM resource_references rr \
                 JOIN resources t ON t.resource_type = rr.target_type AND t.logical_id = rr.target_id \
                 WHERE rr.source_id = r.id AND rr.param_name = ? AND t.is_deleted = 0 \
                 AND rr.target_type IN ({}) AND ({}))",
                type_placeholders, target_condition.sql
            ),
            params,
        )
    }

    /// Builds the ORDER BY clause and its parameters.
    fn order_by(&self) -> SqlFragment {
        if self.plan.sort.is_empty() {
            return SqlFragment::new("r.last_updated DESC, r.id DESC");
        }

        let mut terms = Vec::with_capacity(self.plan.sort.len() + 1);
        let mut params = Vec::new();
        for key in &self.plan.sort {
            match key {
                SortKey::Id(direction) => terms.push(format!("r.logical_id {}", sql_direction(*direction))),
                SortKey::LastUpdated(direction) => {
                    terms.push(format!("r.last_updated {}", sql_direction(*direction)))
                }
                SortKey::Param {
                    name,
                    param_type,
                    direction,
                } => {
                    let aggregate = match direction {
                        SortDirection::Ascending => "MIN",
                        SortDirection::Descending => "MAX",
                    };
                    terms.push(format!(
                        "(SELECT {agg}(s.{col}) FROM search_params s WHERE s.resource_id = r.id \
                         AND s.param_name = ? AND s.component_name IS NULL) {dir}",
                        agg = aggregate,
                        col = sort_column(*param_type),
                        dir = sql_direction(*direction)
                    ));
                    params.push(SqlParam::string(name));
                }
            }
        }
        terms.push("r.id ASC".to_string());

        SqlFragment::with_params(terms.join(", "), params)
    }

    /// Builds the paged SELECT statement.
    pub fn build_select(&self) -> BuiltQuery {
        let where_clause = self.where_clause();
        let order = self.order_by();

        let mut params = where_clause.params;
        params.extend(order.params);
        params.push(SqlParam::integer(i64::from(self.plan.count)));
        params.push(SqlParam::integer(i64::from(self.plan.offset)));

        BuiltQuery {
            sql: format!(
                "SELECT {} FROM resources r WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
                RESOURCE_COLUMNS, where_clause.sql, order.sql
            ),
            params,
        }
    }

    /// Builds the COUNT statement over all matches.
    pub fn build_count(&self) -> BuiltQuery {
        let where_clause = self.where_clause();
        BuiltQuery {
            sql: format!("SELECT COUNT(*) FROM resources r WHERE {}", where_clause.sql),
            params: where_clause.params,
        }
    }
}

fn sql_direction(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Clause;
    use crate::types::{CompartmentScope, SearchPrefix};

    fn plan(clauses: Vec<Clause>) -> QueryPlan {
        QueryPlan {
            resource_type: "Observation".to_string(),
            clauses,
            sort: Vec::new(),
            count: 20,
            offset: 0,
            compartment: None,
            empty: false,
            warnings: Vec::new(),
        }
    }

    fn placeholders(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn test_base_query() {
        let plan = plan(Vec::new());
        let query = QueryBuilder::new(&plan).build_select();
        assert!(query.sql.contains("r.resource_type = ? AND r.is_deleted = 0"));
        assert!(query.sql.ends_with("ORDER BY r.last_updated DESC, r.id DESC LIMIT ? OFFSET ?"));
        assert_eq!(query.params.len(), 3);
    }

    #[test]
    fn test_params_follow_placeholders() {
        let mut plan = plan(vec![
            Clause {
                name: "status".to_string(),
                kind: ClauseKind::Simple {
                    param_type: SearchParamType::Token,
                    modifier: None,
                    values: vec![SearchValue::eq("final"), SearchValue::eq("amended")],
                },
            },
            Clause {
                name: "subject.name".to_string(),
                kind: ClauseKind::Chained {
                    reference_param: "subject".to_string(),
                    target_types: vec!["Patient".to_string()],
                    target_param: "name".to_string(),
                    param_type: SearchParamType::String,
                    modifier: None,
                    values: vec![SearchValue::eq("Smith")],
                },
            },
        ]);
        plan.sort = vec![SortKey::Param {
            name: "date".to_string(),
            param_type: SearchParamType::Date,
            direction: SortDirection::Descending,
        }];
        plan.compartment = Some(CompartmentScope {
            compartment_type: "Patient".to_string(),
            compartment_id: "p1".to_string(),
        });

        let query = QueryBuilder::new(&plan).build_select();
        assert_eq!(placeholders(&query.sql), query.params.len());
        assert!(query.sql.contains("MAX(s.value_date)"));
        assert!(matches!(query.params.last(), Some(SqlParam::Integer(0))));
    }

    #[test]
    fn test_not_modifier_negates_exists() {
        let plan = plan(vec![Clause {
            name: "status:not".to_string(),
            kind: ClauseKind::Simple {
                param_type: SearchParamType::Token,
                modifier: Some(SearchModifier::Not),
                values: vec![SearchValue::eq("final")],
            },
        }]);
        let query = QueryBuilder::new(&plan).build_count();
        assert!(query.sql.contains("NOT (EXISTS"));
        assert!(matches!(&query.params[1], SqlParam::String(s) if s == "status"));
    }

    #[test]
    fn test_missing_true_is_not_exists() {
        let plan = plan(vec![Clause {
            name: "value-quantity:missing".to_string(),
            kind: ClauseKind::Missing { missing: true },
        }]);
        let query = QueryBuilder::new(&plan).build_count();
        assert!(query.sql.contains("NOT (EXISTS (SELECT 1 FROM search_params sp"));
        assert!(matches!(&query.params[1], SqlParam::String(s) if s == "value-quantity"));
    }

    #[test]
    fn test_last_updated_column() {
        let plan = plan(vec![Clause {
            name: "_lastUpdated".to_string(),
            kind: ClauseKind::ResourceColumn {
                column: ResourceColumn::LastUpdated,
                values: vec![SearchValue::new(SearchPrefix::Ge, "2024-01-01")],
            },
        }]);
        let query = QueryBuilder::new(&plan).build_count();
        assert!(query.sql.contains("substr(r.last_updated, 1, 23) >= ?"));
        assert_eq!(placeholders(&query.sql), query.params.len());
    }

    #[test]
    fn test_no_match_clause() {
        let plan = plan(vec![Clause {
            name: "code".to_string(),
            kind: ClauseKind::NoMatch,
        }]);
        assert!(QueryBuilder::new(&plan).build_count().sql.contains("1 = 0"));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }
}
