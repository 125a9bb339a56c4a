//! SQLite schema definition and version checks.

use rusqlite::Connection;

use crate::error::{BackendError, StorageError, StorageResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

fn migration_error(context: &'static str) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |e| {
        StorageError::Backend(BackendError::MigrationError {
            message: format!("{}: {}", context, e),
        })
    }
}

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::info!(version = SCHEMA_VERSION, "created sqlite schema");
    } else if current_version != SCHEMA_VERSION {
        return Err(StorageError::Backend(BackendError::MigrationError {
            message: format!(
                "database schema version {} is not supported (expected {})",
                current_version, SCHEMA_VERSION
            ),
        }));
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> StorageResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(migration_error("failed to create schema_version table"))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(migration_error("failed to clear schema_version"))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(migration_error("failed to set schema_version"))?;
    Ok(())
}

/// Create all tables and indexes.
fn create_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS resources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_type TEXT NOT NULL,
            logical_id TEXT NOT NULL,
            version_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            under_indexed INTEGER NOT NULL DEFAULT 0,
            data BLOB NOT NULL,
            UNIQUE (resource_type, logical_id)
        );

        CREATE INDEX IF NOT EXISTS idx_resources_updated
            ON resources(resource_type, is_deleted, last_updated);

        CREATE TABLE IF NOT EXISTS resource_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_id INTEGER NOT NULL,
            resource_type TEXT NOT NULL,
            logical_id TEXT NOT NULL,
            version_id INTEGER NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
            data BLOB NOT NULL,
            last_updated TEXT NOT NULL,
            UNIQUE (resource_id, version_id)
        );

        CREATE TABLE IF NOT EXISTS search_params (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_id INTEGER NOT NULL,
            resource_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            param_type TEXT NOT NULL,
            value_string TEXT,
            value_number REAL,
            value_date TEXT,
            value_date_end TEXT,
            value_token_system TEXT,
            value_token_code TEXT,
            value_reference TEXT,
            value_quantity_value REAL,
            value_quantity_system TEXT,
            value_quantity_code TEXT,
            component_name TEXT,
            composite_group INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_search_params_resource
            ON search_params(resource_id, param_name);
        CREATE INDEX IF NOT EXISTS idx_search_params_string
            ON search_params(resource_type, param_name, value_string COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_search_params_token
            ON search_params(resource_type, param_name, value_token_code, value_token_system);
        CREATE INDEX IF NOT EXISTS idx_search_params_date
            ON search_params(resource_type, param_name, value_date, value_date_end);
        CREATE INDEX IF NOT EXISTS idx_search_params_reference
            ON search_params(resource_type, param_name, value_reference);
        CREATE INDEX IF NOT EXISTS idx_search_params_composite
            ON search_params(resource_id, param_name, composite_group);

        CREATE TABLE IF NOT EXISTS resource_references (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            source_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            target_type TEXT,
            target_id TEXT,
            path TEXT NOT NULL,
            reference_value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_references_source
            ON resource_references(source_id, param_name);
        CREATE INDEX IF NOT EXISTS idx_references_target
            ON resource_references(target_type, target_id);
        CREATE INDEX IF NOT EXISTS idx_references_raw
            ON resource_references(reference_value);

        CREATE TABLE IF NOT EXISTS compartments (
            compartment_type TEXT NOT NULL,
            compartment_id TEXT NOT NULL,
            resource_id INTEGER NOT NULL,
            UNIQUE (compartment_type, compartment_id, resource_id)
        );

        CREATE INDEX IF NOT EXISTS idx_compartments_member
            ON compartments(resource_id);

        CREATE TABLE IF NOT EXISTS conditional_keys (
            resource_type TEXT NOT NULL,
            criteria TEXT NOT NULL,
            resource_id INTEGER NOT NULL,
            UNIQUE (resource_type, criteria)
        );",
    )
    .map_err(migration_error("failed to create schema"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in [
            "resources",
            "resource_history",
            "search_params",
            "resource_references",
            "compartments",
            "conditional_keys",
        ] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_composite_and_indexing_columns_exist() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.prepare("SELECT component_name, composite_group FROM search_params")
            .unwrap();
        conn.prepare("SELECT under_indexed FROM resources").unwrap();
    }

    #[test]
    fn test_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(initialize_schema(&conn).is_err());
    }
}
