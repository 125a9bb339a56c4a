//! Search implementation for the SQLite backend.
//!
//! Requests are planned by the shared [`QueryPlanner`](crate::search::QueryPlanner)
//! and executed as one COUNT and one paged SELECT over the derived rows.

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection};

use crate::core::{CompartmentSearchProvider, SearchProvider, SearchResult};
use crate::error::StorageResult;
use crate::search::QueryPlan;
use crate::types::{Page, PageInfo, SearchQuery, StoredResource};

use super::search::query_builder::RESOURCE_COLUMNS;
use super::search::QueryBuilder;
use super::storage::ResourceRow;
use super::SqliteBackend;

/// Counts every resource matching `plan`.
pub(crate) fn count_matches(conn: &Connection, plan: &QueryPlan) -> StorageResult<u64> {
    let query = QueryBuilder::new(plan).build_count();
    let count: i64 = conn.query_row(&query.sql, params_from_iter(query.params.iter()), |row| {
        row.get(0)
    })?;
    Ok(count as u64)
}

/// Loads the page of resources selected by `plan`.
pub(crate) fn select_matches(conn: &Connection, plan: &QueryPlan) -> StorageResult<Vec<StoredResource>> {
    let query = QueryBuilder::new(plan).build_select();
    tracing::trace!(sql = %query.sql, params = query.params.len(), "executing search");

    let mut stmt = conn.prepare(&query.sql)?;
    let rows = stmt
        .query_map(params_from_iter(query.params.iter()), ResourceRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(ResourceRow::into_stored).collect()
}

#[async_trait]
impl SearchProvider for SqliteBackend {
    async fn search(&self, query: &SearchQuery) -> StorageResult<SearchResult> {
        let plan = self.query_planner().plan(query);
        if plan.empty {
            return Ok(SearchResult::empty().with_warnings(plan.warnings));
        }

        let conn = self.get_connection()?;
        let total = count_matches(&conn, &plan)?;
        let resources = select_matches(&conn, &plan)?;

        let shown = u64::from(plan.offset) + resources.len() as u64;
        // A zero page size only reports the total.
        let page_info = if plan.count > 0 && shown < total {
            PageInfo::with_next_offset(plan.offset + plan.count)
        } else {
            PageInfo::end()
        }
        .with_total(total);

        tracing::debug!(
            resource_type = %plan.resource_type,
            clauses = plan.clauses.len(),
            total,
            returned = resources.len(),
            "search executed"
        );

        Ok(SearchResult::new(Page::new(resources, page_info), total).with_warnings(plan.warnings))
    }

    async fn search_count(&self, query: &SearchQuery) -> StorageResult<u64> {
        let plan = self.query_planner().plan(query);
        if plan.empty {
            return Ok(0);
        }
        let conn = self.get_connection()?;
        count_matches(&conn, &plan)
    }
}

#[async_trait]
impl CompartmentSearchProvider for SqliteBackend {
    async fn compartment_members(
        &self,
        compartment_type: &str,
        compartment_id: &str,
    ) -> StorageResult<Vec<StoredResource>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM resources r
             JOIN compartments c ON c.resource_id = r.id
             WHERE c.compartment_type = ? AND c.compartment_id = ? AND r.is_deleted = 0
             ORDER BY r.resource_type ASC, r.id ASC",
            RESOURCE_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![compartment_type, compartment_id], ResourceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(ResourceRow::into_stored).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceStorage;
    use serde_json::json;

    async fn seed(backend: &SqliteBackend) {
        for (id, family, birth) in [
            ("p1", "Smith", "1970-05-01"),
            ("p2", "Smythe", "1985-01-15"),
            ("p3", "Jones", "1990-12-31"),
        ] {
            backend
                .create(
                    "Patient",
                    json!({"id": id, "name": [{"family": family}], "birthDate": birth}),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_search_with_sort_and_paging() {
        let backend = SqliteBackend::in_memory().unwrap();
        seed(&backend).await;

        let query = SearchQuery::parse("Patient", "_sort=-birthdate&_count=2");
        let result = backend.search(&query).await.unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.ids(), vec!["p3", "p2"]);
        assert!(result.resources.page_info.has_next);

        let next = SearchQuery::parse("Patient", "_sort=-birthdate&_count=2&_offset=2");
        let result = backend.search(&next).await.unwrap();
        assert_eq!(result.ids(), vec!["p1"]);
        assert!(!result.resources.page_info.has_next);
    }

    #[tokio::test]
    async fn test_unknown_parameter_is_a_warning() {
        let backend = SqliteBackend::in_memory().unwrap();
        seed(&backend).await;

        let query = SearchQuery::new("Patient").with_param("shoe-size", "42");
        let result = backend.search(&query).await.unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_search_count_matches_total() {
        let backend = SqliteBackend::in_memory().unwrap();
        seed(&backend).await;

        let query = SearchQuery::new("Patient").with_param("family", "Sm");
        assert_eq!(backend.search_count(&query).await.unwrap(), 2);
    }
}
