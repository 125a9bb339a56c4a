//! Conditional create tests.

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use helios_clinical_store::core::{ConditionalCreateResult, ConditionalStorage, ResourceStorage};
use helios_clinical_store::error::{QueryError, StorageError};

use common::{create_backend, patient_with_mrn};

const MRN: &str = "identifier=http://hospital.org/mrn|12345";

#[tokio::test]
async fn test_conditional_create_is_idempotent() {
    let backend = create_backend();

    let first = backend
        .conditional_create("Patient", patient_with_mrn("p1", "Smith", "12345"), MRN)
        .await
        .unwrap();
    assert!(first.is_created());

    let second = backend
        .conditional_create(
            "Patient",
            json!({
                "identifier": [{"system": "http://hospital.org/mrn", "value": "12345"}],
                "name": [{"family": "Other"}]
            }),
            MRN,
        )
        .await
        .unwrap();

    match second {
        ConditionalCreateResult::Exists(existing) => {
            assert_eq!(existing.id(), "p1");
            assert_eq!(existing.version_id(), "1");
        }
        other => panic!("expected Exists, got {other:?}"),
    }
    assert_eq!(backend.count(Some("Patient")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_conditional_create_reports_multiple_matches() {
    let backend = create_backend();
    assert_ok!(
        backend
            .create("Patient", json!({"id": "a", "gender": "female"}))
            .await
    );
    assert_ok!(
        backend
            .create("Patient", json!({"id": "b", "gender": "female"}))
            .await
    );

    let result = backend
        .conditional_create("Patient", json!({"gender": "female"}), "gender=female")
        .await
        .unwrap();
    assert!(matches!(result, ConditionalCreateResult::MultipleMatches(2)));
    assert_eq!(backend.count(Some("Patient")).await.unwrap(), 2);
}

#[tokio::test]
async fn test_conditional_create_without_usable_criteria() {
    let backend = create_backend();

    let err = assert_err!(
        backend
            .conditional_create("Patient", json!({}), "shoe-size=42")
            .await
    );
    assert!(matches!(
        err,
        StorageError::Query(QueryError::EmptyCriteria { .. })
    ));
    assert_eq!(backend.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_conditional_create_after_delete_creates_again() {
    let backend = create_backend();

    let first = backend
        .conditional_create("Patient", patient_with_mrn("p1", "Smith", "12345"), MRN)
        .await
        .unwrap();
    assert!(first.is_created());
    backend.delete("Patient", "p1").await.unwrap();

    let again = backend
        .conditional_create("Patient", patient_with_mrn("p2", "Smith", "12345"), MRN)
        .await
        .unwrap();
    assert!(again.is_created());
    assert_eq!(again.resource().unwrap().id(), "p2");
}

#[tokio::test]
async fn test_criteria_order_does_not_matter() {
    let backend = create_backend();

    let first = backend
        .conditional_create(
            "Patient",
            json!({"gender": "male", "identifier": [{"value": "9"}]}),
            "gender=male&identifier=9",
        )
        .await
        .unwrap();
    assert!(first.is_created());

    let second = backend
        .conditional_create(
            "Patient",
            json!({"gender": "male", "identifier": [{"value": "9"}]}),
            "identifier=9&gender=male",
        )
        .await
        .unwrap();
    assert!(!second.is_created());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_conditional_creates_produce_one_resource() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        helios_clinical_store::SqliteBackend::open(dir.path().join("race.db")).unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..8 {
        let backend = backend.clone();
        handles.push(tokio::spawn(async move {
            backend
                .conditional_create(
                    "Patient",
                    patient_with_mrn(&format!("racer-{i}"), "Smith", "12345"),
                    MRN,
                )
                .await
        }));
    }

    let mut created = 0;
    let mut existing_ids = Vec::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ConditionalCreateResult::Created(_) => created += 1,
            ConditionalCreateResult::Exists(r) => existing_ids.push(r.id().to_string()),
            ConditionalCreateResult::MultipleMatches(n) => panic!("{n} matches after a race"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(existing_ids.len(), 7);
    assert_eq!(backend.count(Some("Patient")).await.unwrap(), 1);
}
