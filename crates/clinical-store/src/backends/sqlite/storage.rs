//! ResourceStorage and VersionedStorage implementations for SQLite.
//!
//! Every mutation opens one `IMMEDIATE` transaction that covers the resource
//! row, its history row and the refresh of its derived search rows.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;

use crate::core::history::{
    HistoryEntry, HistoryMethod, HistoryPage, HistoryParams, InstanceHistoryProvider,
};
use crate::core::{
    check_version_match, normalize_criteria, ConditionalCreateResult, ConditionalStorage,
    ResourceStorage, VersionedStorage,
};
use crate::error::{
    BackendError, QueryError, ResourceError, StorageError, StorageResult, ValidationError,
};
use crate::search::references::urn_uuid_id;
use crate::search::reindex::{ReindexOutcome, ReindexableStorage, ResourcePage};
use crate::search::ReferenceLookup;
use crate::types::{Page, PageCursor, PageInfo, ResourceMethod, SearchQuery, StoredResource};

use super::search::query_builder::RESOURCE_COLUMNS;
use super::search_impl::{count_matches, select_matches};
use super::SqliteBackend;

fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

fn serialization_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::SerializationError { message })
}

fn not_found(resource_type: &str, id: &str) -> StorageError {
    StorageError::Resource(ResourceError::NotFound {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    })
}

/// Formats a timestamp for storage. The fixed width keeps text order equal
/// to time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| internal_error(format!("Failed to parse timestamp '{}': {}", s, e)))
}

fn validate_resource_type(resource_type: &str) -> StorageResult<()> {
    if resource_type.is_empty() || !resource_type.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(StorageError::Validation(
            ValidationError::UnsupportedResourceType {
                resource_type: resource_type.to_string(),
            },
        ));
    }
    Ok(())
}

/// Checks the document's identity fields and stamps `resourceType` and `id`.
fn prepare_document(resource_type: &str, id: &str, mut resource: Value) -> StorageResult<Value> {
    let Some(obj) = resource.as_object_mut() else {
        return Err(StorageError::Validation(ValidationError::InvalidResource {
            message: "resource must be a JSON object".to_string(),
        }));
    };

    if let Some(declared) = obj.get("resourceType").and_then(Value::as_str) {
        if declared != resource_type {
            return Err(StorageError::Validation(ValidationError::InvalidResource {
                message: format!(
                    "resourceType '{}' does not match '{}'",
                    declared, resource_type
                ),
            }));
        }
    }
    if let Some(declared) = obj.get("id").and_then(Value::as_str) {
        if declared != id {
            return Err(StorageError::Validation(ValidationError::InvalidResource {
                message: format!("id '{}' does not match '{}'", declared, id),
            }));
        }
    }

    obj.insert(
        "resourceType".to_string(),
        Value::String(resource_type.to_string()),
    );
    obj.insert("id".to_string(), Value::String(id.to_string()));
    Ok(resource)
}

/// A `resources` row as selected by
/// [`RESOURCE_COLUMNS`].
#[derive(Debug)]
pub(crate) struct ResourceRow {
    pub(crate) row_id: i64,
    pub(crate) resource_type: String,
    pub(crate) logical_id: String,
    pub(crate) version_id: i64,
    pub(crate) data: Vec<u8>,
    pub(crate) created_at: String,
    pub(crate) last_updated: String,
    pub(crate) under_indexed: bool,
}

impl ResourceRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: row.get(0)?,
            resource_type: row.get(1)?,
            logical_id: row.get(2)?,
            version_id: row.get(3)?,
            data: row.get(4)?,
            created_at: row.get(5)?,
            last_updated: row.get(6)?,
            under_indexed: row.get::<_, i64>(7)? != 0,
        })
    }

    pub(crate) fn into_stored(self) -> StorageResult<StoredResource> {
        let content: Value = serde_json::from_slice(&self.data)
            .map_err(|e| serialization_error(format!("Failed to deserialize resource: {}", e)))?;
        Ok(StoredResource::from_storage(
            self.resource_type,
            self.logical_id,
            self.version_id.to_string(),
            content,
            parse_timestamp(&self.created_at)?,
            parse_timestamp(&self.last_updated)?,
            None,
        )
        .with_under_indexed(self.under_indexed))
    }
}

/// The current row of one identity, live or tombstoned.
#[derive(Debug)]
struct CurrentRow {
    row_id: i64,
    version_id: i64,
    data: Vec<u8>,
    created_at: String,
    is_deleted: bool,
}

fn current_row(conn: &Connection, resource_type: &str, id: &str) -> StorageResult<Option<CurrentRow>> {
    let row = conn
        .query_row(
            "SELECT id, version_id, data, created_at, is_deleted
             FROM resources WHERE resource_type = ? AND logical_id = ?",
            params![resource_type, id],
            |row| {
                Ok(CurrentRow {
                    row_id: row.get(0)?,
                    version_id: row.get(1)?,
                    data: row.get(2)?,
                    created_at: row.get(3)?,
                    is_deleted: row.get::<_, i64>(4)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
fn insert_history(
    conn: &Connection,
    row_id: i64,
    resource_type: &str,
    id: &str,
    version: i64,
    method: ResourceMethod,
    data: &[u8],
    last_updated: &str,
) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO resource_history
            (resource_id, resource_type, logical_id, version_id, operation, data, last_updated)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            row_id,
            resource_type,
            id,
            version,
            method.as_operation(),
            data,
            last_updated
        ],
    )
    .map_err(|e| internal_error(format!("Failed to insert history: {}", e)))?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl SqliteBackend {
    /// Builds the logical-id lookup for the `urn:uuid:` references of one
    /// document. An id maps to a type only when exactly one live type has it.
    fn reference_lookup(
        &self,
        conn: &Connection,
        resource_type: &str,
        resource: &Value,
    ) -> StorageResult<ReferenceLookup> {
        let ids: BTreeSet<String> = self
            .search_extractor()
            .extract_references(resource_type, resource)
            .iter()
            .filter_map(|r| urn_uuid_id(&r.value).map(str::to_string))
            .collect();

        let mut lookup = ReferenceLookup::new();
        if ids.is_empty() {
            return Ok(lookup);
        }

        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT resource_type FROM resources WHERE logical_id = ? AND is_deleted = 0",
        )?;
        for id in ids {
            let types: Vec<String> = stmt
                .query_map([&id], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            if let [only] = types.as_slice() {
                lookup.insert(id.clone(), only.clone());
            }
        }
        Ok(lookup)
    }

    /// Replaces the derived rows of one resource and records its
    /// under-indexed flag.
    fn index_resource(
        &self,
        conn: &Connection,
        row_id: i64,
        resource_type: &str,
        id: &str,
        resource: &Value,
        lookup: &ReferenceLookup,
    ) -> StorageResult<ReindexOutcome> {
        let mut extraction = self.search_extractor().extract(resource_type, resource);
        self.reference_resolver()
            .normalize_extraction(&mut extraction, lookup);
        let references = self
            .reference_resolver()
            .resolve(resource_type, id, resource, lookup);

        let entries =
            self.index_writer()
                .write(conn, row_id, resource_type, &extraction, &references)?;

        let under_indexed = extraction.is_under_indexed();
        conn.execute(
            "UPDATE resources SET under_indexed = ? WHERE id = ?",
            params![under_indexed, row_id],
        )?;

        if under_indexed {
            tracing::warn!(
                resource_type,
                id,
                issues = extraction.issues.len(),
                "resource is under-indexed"
            );
        }
        tracing::debug!(resource_type, id, entries, "indexed resource");

        Ok(ReindexOutcome {
            entries: entries as u64,
            under_indexed,
        })
    }

    /// Re-indexes resources whose unresolved `urn:uuid:` reference names the
    /// newly created id.
    fn resolve_pending_references(&self, conn: &Connection, id: &str) -> StorageResult<()> {
        let urn = format!("urn:uuid:{}", id);
        let sources: Vec<i64> = conn
            .prepare(
                "SELECT DISTINCT rr.source_id FROM resource_references rr
                 JOIN resources s ON s.id = rr.source_id
                 WHERE rr.reference_value = ? AND rr.target_id IS NULL AND s.is_deleted = 0",
            )?
            .query_map([&urn], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        for source_id in sources {
            let (resource_type, logical_id, data): (String, String, Vec<u8>) = conn.query_row(
                "SELECT resource_type, logical_id, data FROM resources WHERE id = ?",
                [source_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let content: Value = serde_json::from_slice(&data)?;
            let lookup = self.reference_lookup(conn, &resource_type, &content)?;
            self.index_resource(conn, source_id, &resource_type, &logical_id, &content, &lookup)?;
            tracing::debug!(
                resource_type = %resource_type,
                id = %logical_id,
                target = %urn,
                "re-resolved pending reference"
            );
        }
        Ok(())
    }

    /// Writes version 1 of a new identity, or revives a tombstone.
    fn insert_version(
        &self,
        conn: &Connection,
        resource_type: &str,
        id: &str,
        resource: Value,
    ) -> StorageResult<StoredResource> {
        let data = serde_json::to_vec(&resource)
            .map_err(|e| serialization_error(format!("Failed to serialize resource: {}", e)))?;
        let now = Utc::now();
        let last_updated = format_timestamp(now);

        let (row_id, version, created_at) = match current_row(conn, resource_type, id)? {
            Some(row) if !row.is_deleted => {
                return Err(StorageError::Resource(ResourceError::AlreadyExists {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                }));
            }
            Some(row) => {
                let version = row.version_id + 1;
                conn.execute(
                    "UPDATE resources SET version_id = ?, data = ?, last_updated = ?,
                        is_deleted = 0, deleted_at = NULL
                     WHERE id = ?",
                    params![version, data, last_updated, row.row_id],
                )
                .map_err(|e| internal_error(format!("Failed to revive resource: {}", e)))?;
                (row.row_id, version, parse_timestamp(&row.created_at)?)
            }
            None => {
                conn.execute(
                    "INSERT INTO resources
                        (resource_type, logical_id, version_id, created_at, last_updated, data)
                     VALUES (?, ?, 1, ?, ?, ?)",
                    params![resource_type, id, last_updated, last_updated, data],
                )
                .map_err(|e| internal_error(format!("Failed to insert resource: {}", e)))?;
                (conn.last_insert_rowid(), 1, now)
            }
        };

        insert_history(
            conn,
            row_id,
            resource_type,
            id,
            version,
            ResourceMethod::Post,
            &data,
            &last_updated,
        )?;

        let lookup = self.reference_lookup(conn, resource_type, &resource)?;
        let outcome = self.index_resource(conn, row_id, resource_type, id, &resource, &lookup)?;
        self.resolve_pending_references(conn, id)?;

        Ok(StoredResource::from_storage(
            resource_type,
            id,
            version.to_string(),
            resource,
            created_at,
            now,
            None,
        )
        .with_method(ResourceMethod::Post)
        .with_under_indexed(outcome.under_indexed))
    }

    /// Writes the next version of a live identity.
    fn update_version(
        &self,
        conn: &Connection,
        current: &CurrentRow,
        resource_type: &str,
        id: &str,
        resource: Value,
    ) -> StorageResult<StoredResource> {
        let data = serde_json::to_vec(&resource)
            .map_err(|e| serialization_error(format!("Failed to serialize resource: {}", e)))?;
        let now = Utc::now();
        let last_updated = format_timestamp(now);
        let version = current.version_id + 1;

        conn.execute(
            "UPDATE resources SET version_id = ?, data = ?, last_updated = ? WHERE id = ?",
            params![version, data, last_updated, current.row_id],
        )
        .map_err(|e| internal_error(format!("Failed to update resource: {}", e)))?;

        insert_history(
            conn,
            current.row_id,
            resource_type,
            id,
            version,
            ResourceMethod::Put,
            &data,
            &last_updated,
        )?;

        let lookup = self.reference_lookup(conn, resource_type, &resource)?;
        let outcome =
            self.index_resource(conn, current.row_id, resource_type, id, &resource, &lookup)?;

        Ok(StoredResource::from_storage(
            resource_type,
            id,
            version.to_string(),
            resource,
            parse_timestamp(&current.created_at)?,
            now,
            None,
        )
        .with_method(ResourceMethod::Put)
        .with_under_indexed(outcome.under_indexed))
    }

    fn update_checked(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: Option<&str>,
        resource: Value,
    ) -> StorageResult<StoredResource> {
        validate_resource_type(resource_type)?;
        let resource = prepare_document(resource_type, id, resource)?;

        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = current_row(&tx, resource_type, id)?
            .filter(|row| !row.is_deleted)
            .ok_or_else(|| not_found(resource_type, id))?;
        if let Some(expected) = expected_version {
            check_version_match(resource_type, id, expected, &current.version_id.to_string())?;
        }

        let stored = self.update_version(&tx, &current, resource_type, id, resource)?;
        tx.commit()?;
        Ok(stored)
    }

    fn delete_checked(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: Option<&str>,
    ) -> StorageResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = current_row(&tx, resource_type, id)?
            .filter(|row| !row.is_deleted)
            .ok_or_else(|| not_found(resource_type, id))?;
        if let Some(expected) = expected_version {
            check_version_match(resource_type, id, expected, &current.version_id.to_string())?;
        }

        let deleted_at = format_timestamp(Utc::now());
        let version = current.version_id + 1;

        tx.execute(
            "UPDATE resources SET version_id = ?, is_deleted = 1, deleted_at = ?, last_updated = ?
             WHERE id = ?",
            params![version, deleted_at, deleted_at, current.row_id],
        )
        .map_err(|e| internal_error(format!("Failed to delete resource: {}", e)))?;

        insert_history(
            &tx,
            current.row_id,
            resource_type,
            id,
            version,
            ResourceMethod::Delete,
            &current.data,
            &deleted_at,
        )?;

        self.index_writer().clear(&tx, current.row_id)?;
        tx.execute(
            "DELETE FROM conditional_keys WHERE resource_id = ?",
            [current.row_id],
        )?;

        tx.commit()?;
        tracing::debug!(resource_type, id, version, "deleted resource");
        Ok(())
    }
}

#[async_trait]
impl ResourceStorage for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, resource_type: &str, resource: Value) -> StorageResult<StoredResource> {
        validate_resource_type(resource_type)?;

        // Extract or generate ID
        let id = resource
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let resource = prepare_document(resource_type, &id, resource)?;

        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = self.insert_version(&tx, resource_type, &id, resource)?;
        tx.commit()?;

        tracing::debug!(resource_type, id = %stored.id(), version = %stored.version_id(), "created resource");
        Ok(stored)
    }

    async fn create_or_update(
        &self,
        resource_type: &str,
        id: &str,
        resource: Value,
    ) -> StorageResult<(StoredResource, bool)> {
        validate_resource_type(resource_type)?;
        let resource = prepare_document(resource_type, id, resource)?;

        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = match current_row(&tx, resource_type, id)? {
            Some(current) if !current.is_deleted => {
                (self.update_version(&tx, &current, resource_type, id, resource)?, false)
            }
            _ => (self.insert_version(&tx, resource_type, id, resource)?, true),
        };

        tx.commit()?;
        Ok(result)
    }

    async fn read(&self, resource_type: &str, id: &str) -> StorageResult<Option<StoredResource>> {
        let conn = self.get_connection()?;

        let row = conn
            .query_row(
                "SELECT r.id, r.resource_type, r.logical_id, r.version_id, r.data,
                        r.created_at, r.last_updated, r.under_indexed, r.is_deleted, r.deleted_at
                 FROM resources r WHERE r.resource_type = ? AND r.logical_id = ?",
                params![resource_type, id],
                |row| {
                    let is_deleted: i64 = row.get(8)?;
                    let deleted_at: Option<String> = row.get(9)?;
                    Ok((ResourceRow::from_row(row)?, is_deleted != 0, deleted_at))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((_, true, deleted_at)) => Err(StorageError::Resource(ResourceError::Gone {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
            })),
            Some((row, false, _)) => Ok(Some(row.into_stored()?)),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        resource: Value,
    ) -> StorageResult<StoredResource> {
        self.update_checked(resource_type, id, None, resource)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> StorageResult<()> {
        self.delete_checked(resource_type, id, None)
    }

    async fn count(&self, resource_type: Option<&str>) -> StorageResult<u64> {
        let conn = self.get_connection()?;

        let count: i64 = match resource_type {
            Some(rt) => conn.query_row(
                "SELECT COUNT(*) FROM resources WHERE resource_type = ? AND is_deleted = 0",
                [rt],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM resources WHERE is_deleted = 0",
                [],
                |row| row.get(0),
            )?,
        };

        Ok(count as u64)
    }
}

#[async_trait]
impl VersionedStorage for SqliteBackend {
    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> StorageResult<Option<StoredResource>> {
        let Ok(version) = version_id.parse::<i64>() else {
            return Ok(None);
        };
        let conn = self.get_connection()?;

        let result = conn
            .query_row(
                "SELECT h.data, h.last_updated, h.operation, r.created_at
                 FROM resource_history h JOIN resources r ON r.id = h.resource_id
                 WHERE r.resource_type = ? AND r.logical_id = ? AND h.version_id = ?",
                params![resource_type, id, version],
                |row| {
                    let data: Vec<u8> = row.get(0)?;
                    let last_updated: String = row.get(1)?;
                    let operation: String = row.get(2)?;
                    let created_at: String = row.get(3)?;
                    Ok((data, last_updated, operation, created_at))
                },
            )
            .optional()?;

        let Some((data, last_updated, operation, created_at)) = result else {
            return Ok(None);
        };

        let content: Value = serde_json::from_slice(&data)
            .map_err(|e| serialization_error(format!("Failed to deserialize resource: {}", e)))?;
        let last_updated = parse_timestamp(&last_updated)?;
        let method = ResourceMethod::from_operation(&operation);
        let deleted_at = (method == Some(ResourceMethod::Delete)).then_some(last_updated);

        let mut stored = StoredResource::from_storage(
            resource_type,
            id,
            version.to_string(),
            content,
            parse_timestamp(&created_at)?,
            last_updated,
            deleted_at,
        );
        if let Some(method) = method {
            stored = stored.with_method(method);
        }
        Ok(Some(stored))
    }

    async fn update_with_match(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: &str,
        resource: Value,
    ) -> StorageResult<StoredResource> {
        self.update_checked(resource_type, id, Some(expected_version), resource)
    }

    async fn delete_with_match(
        &self,
        resource_type: &str,
        id: &str,
        expected_version: &str,
    ) -> StorageResult<()> {
        self.delete_checked(resource_type, id, Some(expected_version))
    }

    async fn list_versions(&self, resource_type: &str, id: &str) -> StorageResult<Vec<String>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            "SELECT h.version_id FROM resource_history h
             JOIN resources r ON r.id = h.resource_id
             WHERE r.resource_type = ? AND r.logical_id = ?
             ORDER BY h.version_id ASC",
        )?;

        let versions = stmt
            .query_map(params![resource_type, id], |row| row.get::<_, i64>(0))?
            .map(|v| v.map(|v| v.to_string()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(versions)
    }
}

#[async_trait]
impl InstanceHistoryProvider for SqliteBackend {
    async fn history_instance(
        &self,
        resource_type: &str,
        id: &str,
        params: &HistoryParams,
    ) -> StorageResult<HistoryPage> {
        let before_version = params
            .cursor
            .as_deref()
            .map(PageCursor::decode)
            .transpose()?
            .map(|cursor| {
                cursor.position_number().ok_or_else(|| QueryError::MalformedValue {
                    name: "cursor".to_string(),
                    message: "history cursor carries no version".to_string(),
                })
            })
            .transpose()?;

        let conn = self.get_connection()?;

        let mut sql = String::from(
            "SELECT h.version_id, h.data, h.last_updated, h.operation, r.created_at
             FROM resource_history h JOIN resources r ON r.id = h.resource_id
             WHERE r.resource_type = ? AND r.logical_id = ?",
        );
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(resource_type.to_string()), Box::new(id.to_string())];

        if !params.include_deleted {
            sql.push_str(" AND h.operation <> 'delete'");
        }
        if let Some(since) = params.since {
            sql.push_str(" AND h.last_updated >= ?");
            bind.push(Box::new(format_timestamp(since)));
        }
        if let Some(before) = params.before {
            sql.push_str(" AND h.last_updated < ?");
            bind.push(Box::new(format_timestamp(before)));
        }
        if let Some(version) = before_version {
            sql.push_str(" AND h.version_id < ?");
            bind.push(Box::new(version));
        }

        // One extra row tells whether another page exists.
        let count = params.count.max(1);
        sql.push_str(" ORDER BY h.version_id DESC LIMIT ?");
        bind.push(Box::new(i64::from(count) + 1));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind.iter()), |row| {
                let version_id: i64 = row.get(0)?;
                let data: Vec<u8> = row.get(1)?;
                let last_updated: String = row.get(2)?;
                let operation: String = row.get(3)?;
                let created_at: String = row.get(4)?;
                Ok((version_id, data, last_updated, operation, created_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = rows.len() > count as usize;
        let mut entries = Vec::with_capacity(rows.len().min(count as usize));

        for (version_id, data, last_updated, operation, created_at) in
            rows.into_iter().take(count as usize)
        {
            let content: Value = serde_json::from_slice(&data).map_err(|e| {
                serialization_error(format!("Failed to deserialize resource: {}", e))
            })?;
            let timestamp = parse_timestamp(&last_updated)?;
            let method = ResourceMethod::from_operation(&operation).ok_or_else(|| {
                internal_error(format!("Unknown history operation '{}'", operation))
            })?;
            let deleted_at = (method == ResourceMethod::Delete).then_some(timestamp);

            let resource = StoredResource::from_storage(
                resource_type,
                id,
                version_id.to_string(),
                content,
                parse_timestamp(&created_at)?,
                timestamp,
                deleted_at,
            )
            .with_method(method);

            entries.push(HistoryEntry {
                resource,
                method: HistoryMethod::from(method),
                timestamp,
            });
        }

        let page_info = match entries.last() {
            Some(last) if has_more => PageInfo::with_next(PageCursor::new(
                last.resource.version_number() as i64,
                id,
            )),
            _ => PageInfo::end(),
        };

        Ok(Page::new(entries, page_info))
    }

    async fn history_instance_count(&self, resource_type: &str, id: &str) -> StorageResult<u64> {
        let conn = self.get_connection()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM resource_history h
             JOIN resources r ON r.id = h.resource_id
             WHERE r.resource_type = ? AND r.logical_id = ?",
            params![resource_type, id],
            |row| row.get(0),
        )?;

        Ok(count as u64)
    }
}

#[async_trait]
impl ConditionalStorage for SqliteBackend {
    async fn conditional_create(
        &self,
        resource_type: &str,
        resource: Value,
        criteria: &str,
    ) -> StorageResult<ConditionalCreateResult> {
        validate_resource_type(resource_type)?;

        let key = normalize_criteria(criteria);
        let query = SearchQuery::parse(resource_type, &key);
        let mut plan = self.query_planner().plan(&query);
        if plan.clauses.is_empty() {
            return Err(StorageError::Query(QueryError::EmptyCriteria {
                criteria: criteria.to_string(),
            }));
        }
        plan.sort.clear();
        plan.offset = 0;
        plan.count = 2;

        let id = resource
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let resource = prepare_document(resource_type, &id, resource)?;

        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let matches = if plan.empty { 0 } else { count_matches(&tx, &plan)? };
        match matches {
            0 => {}
            1 => {
                let existing = select_matches(&tx, &plan)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| internal_error("matched resource vanished".to_string()))?;
                tx.commit()?;
                return Ok(ConditionalCreateResult::Exists(existing));
            }
            n => {
                tx.commit()?;
                return Ok(ConditionalCreateResult::MultipleMatches(n as usize));
            }
        }

        // The criteria match nothing, so any key left for them is stale.
        tx.execute(
            "DELETE FROM conditional_keys WHERE resource_type = ? AND criteria = ?",
            params![resource_type, key],
        )?;

        let created = self.insert_version(&tx, resource_type, &id, resource)?;
        let row_id: i64 = tx.query_row(
            "SELECT id FROM resources WHERE resource_type = ? AND logical_id = ?",
            params![resource_type, created.id()],
            |row| row.get(0),
        )?;

        match tx.execute(
            "INSERT INTO conditional_keys (resource_type, criteria, resource_id) VALUES (?, ?, ?)",
            params![resource_type, key, row_id],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                return existing_for_key(&conn, resource_type, &key);
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        tracing::debug!(resource_type, criteria = %key, id = %created.id(), "conditional create");
        Ok(ConditionalCreateResult::Created(created))
    }
}

/// Resolves a lost conditional-create race to the winner's resource.
fn existing_for_key(
    conn: &Connection,
    resource_type: &str,
    key: &str,
) -> StorageResult<ConditionalCreateResult> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM resources r JOIN conditional_keys k ON k.resource_id = r.id
                 WHERE k.resource_type = ? AND k.criteria = ? AND r.is_deleted = 0",
                RESOURCE_COLUMNS
            ),
            params![resource_type, key],
            ResourceRow::from_row,
        )
        .optional()?;

    match row {
        Some(row) => Ok(ConditionalCreateResult::Exists(row.into_stored()?)),
        None => Err(internal_error(format!(
            "conditional key '{}' points at no live resource",
            key
        ))),
    }
}

#[async_trait]
impl ReindexableStorage for SqliteBackend {
    async fn list_resource_types(&self) -> StorageResult<Vec<String>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT resource_type FROM resources WHERE is_deleted = 0 ORDER BY resource_type",
        )?;
        let types = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(types)
    }

    async fn count_resources(&self, resource_type: &str) -> StorageResult<u64> {
        self.count(Some(resource_type)).await
    }

    async fn fetch_resources_page(
        &self,
        resource_type: &str,
        cursor: Option<&PageCursor>,
        limit: u32,
    ) -> StorageResult<ResourcePage> {
        let after = match cursor {
            Some(c) => c.position_number().ok_or_else(|| QueryError::MalformedValue {
                name: "cursor".to_string(),
                message: "reindex cursor carries no row position".to_string(),
            })?,
            None => 0,
        };
        let limit = limit.max(1);

        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM resources r
             WHERE r.resource_type = ? AND r.is_deleted = 0 AND r.id > ?
             ORDER BY r.id ASC LIMIT ?",
            RESOURCE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![resource_type, after, i64::from(limit) + 1],
                ResourceRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = rows.len() > limit as usize;
        let mut resources = Vec::with_capacity(limit as usize);
        let mut last_row = None;
        for row in rows.into_iter().take(limit as usize) {
            last_row = Some((row.row_id, row.logical_id.clone()));
            resources.push(row.into_stored()?);
        }

        let next_cursor = match last_row {
            Some((row_id, id)) if has_more => Some(PageCursor::new(row_id, id)),
            _ => None,
        };

        Ok(ResourcePage {
            resources,
            next_cursor,
        })
    }

    async fn build_reference_lookup(&self) -> StorageResult<ReferenceLookup> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT logical_id, MIN(resource_type) FROM resources
             WHERE is_deleted = 0
             GROUP BY logical_id
             HAVING COUNT(DISTINCT resource_type) = 1",
        )?;

        let mut lookup = ReferenceLookup::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (id, resource_type) = row?;
            lookup.insert(id, resource_type);
        }

        tracing::info!(entries = lookup.len(), "built reindex reference lookup");
        Ok(lookup)
    }

    async fn reindex_resource(
        &self,
        resource: &StoredResource,
        lookup: &ReferenceLookup,
    ) -> StorageResult<ReindexOutcome> {
        let resource_type = resource.resource_type();
        let id = resource.id();

        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Index what is stored now; the page snapshot may be stale.
        let Some(current) = current_row(&tx, resource_type, id)?.filter(|row| !row.is_deleted) else {
            tracing::debug!(resource_type, id, "resource deleted before reindex, skipped");
            return Ok(ReindexOutcome::default());
        };
        let content: Value = serde_json::from_slice(&current.data)?;

        let outcome = self.index_resource(&tx, current.row_id, resource_type, id, &content, lookup)?;
        tx.commit()?;
        Ok(outcome)
    }
}
