//! SQLite search index writer.
//!
//! Maintains the derived rows of one resource: `search_params`,
//! `resource_references` and `compartments`. Callers run it inside the
//! transaction that writes the resource row, so the derived rows always
//! describe the committed version.

use rusqlite::{params, Connection};

use crate::error::StorageResult;
use crate::search::{ExtractedValue, Extraction, IndexValue, ResolvedReferences};

const INSERT_PARAM_SQL: &str = "INSERT INTO search_params (
        resource_id, resource_type, param_name, param_type, component_name, composite_group,
        value_string, value_number, value_date, value_date_end,
        value_token_system, value_token_code, value_reference,
        value_quantity_value, value_quantity_system, value_quantity_code
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_REFERENCE_SQL: &str = "INSERT INTO resource_references (
        source_id, source_type, param_name, target_type, target_id, path, reference_value
    ) VALUES (?, ?, ?, ?, ?, ?, ?)";

const INSERT_COMPARTMENT_SQL: &str = "INSERT OR IGNORE INTO compartments (
        compartment_type, compartment_id, resource_id
    ) VALUES (?, ?, ?)";

/// Typed value columns of one `search_params` row.
///
/// Only the columns of the value's own type are set.
#[derive(Debug, Default, PartialEq)]
struct ValueColumns {
    string: Option<String>,
    number: Option<f64>,
    date: Option<String>,
    date_end: Option<String>,
    token_system: Option<String>,
    token_code: Option<String>,
    reference: Option<String>,
    quantity_value: Option<f64>,
    quantity_system: Option<String>,
    quantity_code: Option<String>,
}

impl From<&IndexValue> for ValueColumns {
    fn from(value: &IndexValue) -> Self {
        match value {
            IndexValue::String(s) => ValueColumns {
                string: Some(s.clone()),
                ..Default::default()
            },
            IndexValue::Number(n) => ValueColumns {
                number: Some(*n),
                ..Default::default()
            },
            IndexValue::Date { start, end } => ValueColumns {
                date: Some(start.clone()),
                date_end: Some(end.clone()),
                ..Default::default()
            },
            IndexValue::Token { system, code } => ValueColumns {
                token_system: system.clone(),
                token_code: Some(code.clone()),
                ..Default::default()
            },
            IndexValue::Reference(r) => ValueColumns {
                reference: Some(r.clone()),
                ..Default::default()
            },
            IndexValue::Quantity {
                value,
                system,
                code,
            } => ValueColumns {
                quantity_value: Some(*value),
                quantity_system: system.clone(),
                quantity_code: code.clone(),
                ..Default::default()
            },
        }
    }
}

/// Writes derived search rows for resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteSearchIndexWriter;

impl SqliteSearchIndexWriter {
    /// Creates a new writer.
    pub fn new() -> Self {
        Self
    }

    /// Removes every derived row of a resource.
    pub fn clear(&self, conn: &Connection, resource_id: i64) -> StorageResult<()> {
        conn.execute("DELETE FROM search_params WHERE resource_id = ?", [resource_id])?;
        conn.execute("DELETE FROM resource_references WHERE source_id = ?", [resource_id])?;
        conn.execute("DELETE FROM compartments WHERE resource_id = ?", [resource_id])?;
        Ok(())
    }

    /// Replaces the derived rows of a resource.
    ///
    /// Returns the number of `search_params` rows written.
    pub fn write(
        &self,
        conn: &Connection,
        resource_id: i64,
        resource_type: &str,
        extraction: &Extraction,
        references: &ResolvedReferences,
    ) -> StorageResult<usize> {
        self.clear(conn, resource_id)?;

        let mut insert_param = conn.prepare_cached(INSERT_PARAM_SQL)?;
        for value in &extraction.values {
            Self::insert_value(&mut insert_param, resource_id, resource_type, value)?;
        }

        let mut insert_reference = conn.prepare_cached(INSERT_REFERENCE_SQL)?;
        for reference in &references.references {
            insert_reference.execute(params![
                resource_id,
                resource_type,
                reference.param_name,
                reference.target_type,
                reference.target_id,
                reference.path,
                reference.raw,
            ])?;
        }

        let mut insert_compartment = conn.prepare_cached(INSERT_COMPARTMENT_SQL)?;
        for (compartment_type, compartment_id) in &references.compartments {
            insert_compartment.execute(params![compartment_type, compartment_id, resource_id])?;
        }

        tracing::trace!(
            resource_type,
            resource_id,
            entries = extraction.values.len(),
            references = references.references.len(),
            compartments = references.compartments.len(),
            "wrote search index"
        );

        Ok(extraction.values.len())
    }

    fn insert_value(
        stmt: &mut rusqlite::CachedStatement<'_>,
        resource_id: i64,
        resource_type: &str,
        value: &ExtractedValue,
    ) -> StorageResult<()> {
        let columns = ValueColumns::from(&value.value);
        stmt.execute(params![
            resource_id,
            resource_type,
            value.param_name,
            value.param_type.to_string(),
            value.component,
            value.composite_group,
            columns.string,
            columns.number,
            columns.date,
            columns.date_end,
            columns.token_system,
            columns.token_code,
            columns.reference,
            columns.quantity_value,
            columns.quantity_system,
            columns.quantity_code,
        ])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::schema::initialize_schema;
    use crate::search::{ReferenceKind, ResolvedReference};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_value_columns_only_set_own_type() {
        let columns = ValueColumns::from(&IndexValue::token(Some("http://loinc.org".into()), "8480-6"));
        assert_eq!(columns.token_code.as_deref(), Some("8480-6"));
        assert!(columns.string.is_none());
        assert!(columns.quantity_value.is_none());
    }

    #[test]
    fn test_write_replaces_rows() {
        let conn = setup();
        let writer = SqliteSearchIndexWriter::new();

        let extraction = Extraction {
            values: vec![
                ExtractedValue::new("code", IndexValue::token_code("8480-6")).with_component("code", 0),
                ExtractedValue::new("status", IndexValue::token_code("final")),
            ],
            issues: Vec::new(),
        };
        let references = ResolvedReferences {
            references: vec![ResolvedReference {
                param_name: "subject".into(),
                path: "Observation.subject".into(),
                raw: "Patient/p1".into(),
                kind: ReferenceKind::Relative,
                target_type: Some("Patient".into()),
                target_id: Some("p1".into()),
                version: None,
            }],
            compartments: vec![("Patient".into(), "p1".into())],
        };

        let written = writer.write(&conn, 7, "Observation", &extraction, &references).unwrap();
        assert_eq!(written, 2);
        // Writing again must not duplicate anything.
        writer.write(&conn, 7, "Observation", &extraction, &references).unwrap();

        let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0)).unwrap();
        assert_eq!(count("SELECT COUNT(*) FROM search_params WHERE resource_id = 7"), 2);
        assert_eq!(count("SELECT COUNT(*) FROM resource_references WHERE source_id = 7"), 1);
        assert_eq!(count("SELECT COUNT(*) FROM compartments WHERE resource_id = 7"), 1);
        assert_eq!(
            count("SELECT COUNT(*) FROM search_params WHERE composite_group = 0 AND component_name = 'code'"),
            1
        );

        writer.clear(&conn, 7).unwrap();
        assert_eq!(count("SELECT COUNT(*) FROM search_params"), 0);
    }
}
