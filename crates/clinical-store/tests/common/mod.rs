//! Shared helpers for the integration tests.

#![allow(dead_code)]

use serde_json::{Value, json};

use helios_clinical_store::backends::sqlite::SqliteBackend;

/// Creates a fresh in-memory backend.
pub fn create_backend() -> SqliteBackend {
    SqliteBackend::in_memory().expect("Failed to create SQLite backend")
}

pub fn patient(id: &str, family: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"family": family}]
    })
}

pub fn patient_with_mrn(id: &str, family: &str, mrn: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "identifier": [{"system": "http://hospital.org/mrn", "value": mrn}],
        "name": [{"family": family}]
    })
}

/// A LOINC-coded observation with a single quantity value.
pub fn observation(id: &str, code: &str, value: f64, subject: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
        "subject": {"reference": subject},
        "valueQuantity": {
            "value": value,
            "unit": "mmHg",
            "system": "http://unitsofmeasure.org",
            "code": "mm[Hg]"
        }
    })
}

/// A blood pressure panel: systolic and diastolic as components.
pub fn blood_pressure(id: &str, systolic: f64, diastolic: f64) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "85354-9"}]},
        "component": [
            {
                "code": {"coding": [{"system": "http://loinc.org", "code": "8480-6"}]},
                "valueQuantity": {"value": systolic, "unit": "mmHg"}
            },
            {
                "code": {"coding": [{"system": "http://loinc.org", "code": "8462-4"}]},
                "valueQuantity": {"value": diastolic, "unit": "mmHg"}
            }
        ]
    })
}

pub fn condition(id: &str, subject: &str, code: &str) -> Value {
    json!({
        "resourceType": "Condition",
        "id": id,
        "code": {"coding": [{"system": "http://snomed.info/sct", "code": code}]},
        "subject": {"reference": subject}
    })
}
