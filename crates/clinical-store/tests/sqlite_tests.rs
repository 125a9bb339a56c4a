//! SQLite backend integration tests.
//!
//! These tests exercise the storage contract end to end: CRUD, versioning,
//! history and tombstones.

mod common;

use serde_json::json;

use helios_clinical_store::core::history::{HistoryMethod, HistoryParams, InstanceHistoryProvider};
use helios_clinical_store::core::{ResourceStorage, VersionedStorage};
use helios_clinical_store::error::{ConcurrencyError, ResourceError, StorageError, ValidationError};

use common::{create_backend, patient};

// ============================================================================
// Create Tests
// ============================================================================

#[tokio::test]
async fn test_create_resource() {
    let backend = create_backend();

    let created = backend
        .create(
            "Patient",
            json!({"resourceType": "Patient", "name": [{"family": "Smith", "given": ["John"]}]}),
        )
        .await
        .unwrap();

    assert_eq!(created.resource_type(), "Patient");
    assert!(!created.id().is_empty());
    assert_eq!(created.version_id(), "1");
    assert_eq!(created.content()["id"], created.id());
    assert_eq!(created.content()["resourceType"], "Patient");
}

#[tokio::test]
async fn test_create_stamps_missing_resource_type() {
    let backend = create_backend();

    let created = backend
        .create("Patient", json!({"name": [{"family": "Jones"}]}))
        .await
        .unwrap();
    assert_eq!(created.content()["resourceType"], "Patient");
}

#[tokio::test]
async fn test_create_duplicate_fails() {
    let backend = create_backend();

    backend
        .create("Patient", patient("duplicate-id", "Smith"))
        .await
        .unwrap();

    let result = backend
        .create("Patient", patient("duplicate-id", "Smith"))
        .await;
    assert!(matches!(
        result,
        Err(StorageError::Resource(ResourceError::AlreadyExists { .. }))
    ));
}

#[tokio::test]
async fn test_create_rejects_mismatched_type() {
    let backend = create_backend();

    let result = backend
        .create("Observation", json!({"resourceType": "Patient"}))
        .await;
    assert!(matches!(
        result,
        Err(StorageError::Validation(ValidationError::InvalidResource { .. }))
    ));
}

#[tokio::test]
async fn test_create_rejects_non_object() {
    let backend = create_backend();

    let result = backend.create("Patient", json!(["not", "an", "object"])).await;
    assert!(matches!(result, Err(StorageError::Validation(_))));
}

// ============================================================================
// Read / Update / Delete Tests
// ============================================================================

#[tokio::test]
async fn test_read_missing_is_none() {
    let backend = create_backend();
    assert!(backend.read("Patient", "nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_increments_version() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();

    let updated = backend
        .update("Patient", "p1", patient("p1", "Smythe"))
        .await
        .unwrap();
    assert_eq!(updated.version_id(), "2");

    let read = backend.read("Patient", "p1").await.unwrap().unwrap();
    assert_eq!(read.version_id(), "2");
    assert_eq!(read.content()["name"][0]["family"], "Smythe");
    assert_eq!(read.created_at(), updated.created_at());
}

#[tokio::test]
async fn test_update_missing_is_not_found() {
    let backend = create_backend();

    let err = backend
        .update("Patient", "ghost", patient("ghost", "Smith"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_create_or_update() {
    let backend = create_backend();

    let (first, created) = backend
        .create_or_update("Patient", "p1", patient("p1", "Smith"))
        .await
        .unwrap();
    assert!(created);
    assert_eq!(first.version_id(), "1");

    let (second, created) = backend
        .create_or_update("Patient", "p1", patient("p1", "Smythe"))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(second.version_id(), "2");
}

#[tokio::test]
async fn test_delete_leaves_tombstone() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();

    backend.delete("Patient", "p1").await.unwrap();

    let err = backend.read("Patient", "p1").await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Resource(ResourceError::Gone { .. })
    ));
    assert!(err.is_not_found());
    assert!(!backend.exists("Patient", "p1").await.unwrap());
    assert_eq!(backend.count(Some("Patient")).await.unwrap(), 0);

    // Deleting twice is not found
    let err = backend.delete("Patient", "p1").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_count_by_type() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();
    backend.create("Patient", patient("p2", "Jones")).await.unwrap();
    backend
        .create("Practitioner", json!({"id": "dr1"}))
        .await
        .unwrap();

    assert_eq!(backend.count(Some("Patient")).await.unwrap(), 2);
    assert_eq!(backend.count(None).await.unwrap(), 3);
}

// ============================================================================
// Versioning Tests
// ============================================================================

#[tokio::test]
async fn test_vread_survives_delete() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();
    backend
        .update("Patient", "p1", patient("p1", "Smythe"))
        .await
        .unwrap();
    backend.delete("Patient", "p1").await.unwrap();

    let v1 = backend.vread("Patient", "p1", "1").await.unwrap().unwrap();
    assert_eq!(v1.content()["name"][0]["family"], "Smith");

    let v2 = backend.vread("Patient", "p1", "2").await.unwrap().unwrap();
    assert_eq!(v2.content()["name"][0]["family"], "Smythe");

    assert!(backend.vread("Patient", "p1", "9").await.unwrap().is_none());
    assert!(backend.vread("Patient", "p1", "abc").await.unwrap().is_none());

    assert_eq!(
        backend.list_versions("Patient", "p1").await.unwrap(),
        vec!["1", "2", "3"]
    );
}

#[tokio::test]
async fn test_update_with_match() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();

    let updated = backend
        .update_with_match("Patient", "p1", "W/\"1\"", patient("p1", "Smythe"))
        .await
        .unwrap();
    assert_eq!(updated.version_id(), "2");

    let err = backend
        .update_with_match("Patient", "p1", "1", patient("p1", "Jones"))
        .await
        .unwrap_err();
    assert!(err.is_version_conflict());
    match err {
        StorageError::Concurrency(ConcurrencyError::VersionConflict {
            expected_version,
            actual_version,
            ..
        }) => {
            assert_eq!(expected_version, "1");
            assert_eq!(actual_version, "2");
        }
        other => panic!("expected a version conflict, got {other:?}"),
    }

    // The losing write left nothing behind
    let current = backend.read("Patient", "p1").await.unwrap().unwrap();
    assert_eq!(current.content()["name"][0]["family"], "Smythe");
    assert_eq!(backend.list_versions("Patient", "p1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delete_with_match() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();

    let err = backend
        .delete_with_match("Patient", "p1", "7")
        .await
        .unwrap_err();
    assert!(err.is_version_conflict());

    backend.delete_with_match("Patient", "p1", "1").await.unwrap();
    assert!(!backend.exists("Patient", "p1").await.unwrap());
}

#[tokio::test]
async fn test_current_version() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();
    backend
        .update("Patient", "p1", patient("p1", "Smith"))
        .await
        .unwrap();

    assert_eq!(
        backend.current_version("Patient", "p1").await.unwrap(),
        Some("2".to_string())
    );
}

// ============================================================================
// History Tests
// ============================================================================

#[tokio::test]
async fn test_history_is_newest_first() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();
    backend
        .update("Patient", "p1", patient("p1", "Smythe"))
        .await
        .unwrap();
    backend.delete("Patient", "p1").await.unwrap();

    let history = backend
        .history_instance("Patient", "p1", &HistoryParams::new())
        .await
        .unwrap();

    let methods: Vec<HistoryMethod> = history.items.iter().map(|e| e.method).collect();
    assert_eq!(
        methods,
        vec![HistoryMethod::Delete, HistoryMethod::Put, HistoryMethod::Post]
    );
    let versions: Vec<&str> = history
        .items
        .iter()
        .map(|e| e.resource.version_id())
        .collect();
    assert_eq!(versions, vec!["3", "2", "1"]);

    assert_eq!(
        backend.history_instance_count("Patient", "p1").await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_history_excluding_deletes() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();
    backend.delete("Patient", "p1").await.unwrap();

    let history = backend
        .history_instance("Patient", "p1", &HistoryParams::new().include_deleted(false))
        .await
        .unwrap();
    assert_eq!(history.items.len(), 1);
    assert_eq!(history.items[0].method, HistoryMethod::Post);
}

#[tokio::test]
async fn test_history_paging() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "v1")).await.unwrap();
    for family in ["v2", "v3", "v4", "v5"] {
        backend
            .update("Patient", "p1", patient("p1", family))
            .await
            .unwrap();
    }

    let first = backend
        .history_instance("Patient", "p1", &HistoryParams::new().count(2))
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].resource.version_id(), "5");
    assert!(first.page_info.has_next);

    let cursor = first.page_info.next_cursor.clone().unwrap();
    let second = backend
        .history_instance(
            "Patient",
            "p1",
            &HistoryParams::new().count(2).after_cursor(cursor),
        )
        .await
        .unwrap();
    let versions: Vec<&str> = second
        .items
        .iter()
        .map(|e| e.resource.version_id())
        .collect();
    assert_eq!(versions, vec!["3", "2"]);
}

#[tokio::test]
async fn test_recreate_after_delete_continues_versions() {
    let backend = create_backend();
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();
    backend.delete("Patient", "p1").await.unwrap();

    let revived = backend.create("Patient", patient("p1", "Smith")).await.unwrap();
    assert_eq!(revived.version_id(), "3");
    assert_eq!(
        backend.history_instance_count("Patient", "p1").await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_file_backend_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let backend = helios_clinical_store::SqliteBackend::open(&path).unwrap();
        backend.create("Patient", patient("p1", "Smith")).await.unwrap();
    }

    let reopened = helios_clinical_store::SqliteBackend::open(&path).unwrap();
    let read = reopened.read("Patient", "p1").await.unwrap().unwrap();
    assert_eq!(read.version_id(), "1");
}
