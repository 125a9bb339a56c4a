//! Re-index job tests.

mod common;

use std::sync::Arc;

use serde_json::json;

use helios_clinical_store::SqliteBackend;
use helios_clinical_store::core::{ResourceStorage, SearchProvider};
use helios_clinical_store::search::{
    ReindexOperation, ReindexRequest, ReindexStatus, SearchParameterDefinition,
};
use helios_clinical_store::types::{SearchParamType, SearchQuery};

use common::{patient, patient_with_mrn};

fn nickname_param() -> SearchParameterDefinition {
    SearchParameterDefinition::new(
        "http://example.org/SearchParameter/Patient-nickname",
        "nickname",
        SearchParamType::String,
        "Patient.name.text",
    )
    .with_base(["Patient"])
}

async fn seed_nicknames(backend: &SqliteBackend, count: usize) {
    for i in 0..count {
        backend
            .create(
                "Patient",
                json!({"id": format!("p{i}"), "name": [{"family": "Smith", "text": format!("Nick{i}")}]}),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_reindex_applies_new_parameter_to_existing_resources() {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    seed_nicknames(&backend, 3).await;

    backend.register_search_parameter(nickname_param()).unwrap();

    let query = SearchQuery::new("Patient").with_param("nickname", "Nick1");
    let before = backend.search(&query).await.unwrap();
    assert_eq!(before.total, 0);
    assert!(before.warnings.is_empty());

    let reindex = ReindexOperation::new(backend.clone());
    let job_id = reindex
        .start(ReindexRequest::for_types(["Patient"]))
        .await
        .unwrap();
    let progress = reindex.run(&job_id).await.unwrap();

    assert_eq!(progress.status, ReindexStatus::Completed);
    assert_eq!(progress.total_resources, 3);
    assert_eq!(progress.processed_resources, 3);
    assert!(progress.errors.is_empty());

    assert_eq!(backend.search(&query).await.unwrap().ids(), vec!["p1"]);
}

#[tokio::test]
async fn test_reindex_resumes_from_saved_progress() {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    seed_nicknames(&backend, 5).await;
    backend.register_search_parameter(nickname_param()).unwrap();

    let first = ReindexOperation::new(backend.clone());
    let job_id = first
        .start(ReindexRequest::for_types(["Patient"]).with_batch_size(2))
        .await
        .unwrap();

    assert_eq!(first.step(&job_id).await.unwrap(), ReindexStatus::InProgress);
    first.cancel(&job_id).await.unwrap();

    let saved = first.get_progress(&job_id).await.unwrap();
    assert_eq!(saved.status, ReindexStatus::Cancelled);
    assert_eq!(saved.processed_resources, 2);
    assert!(saved.cursor.is_some());

    // Only the first page is searchable so far
    let all = SearchQuery::new("Patient").with_param("nickname", "Nick");
    assert_eq!(backend.search_count(&all).await.unwrap(), 2);

    // A new operation picks the job up where it stopped
    let second = ReindexOperation::new(backend.clone());
    let resumed_id = second.resume(saved).await.unwrap();
    assert_eq!(resumed_id, job_id);

    let progress = second.run(&job_id).await.unwrap();
    assert_eq!(progress.status, ReindexStatus::Completed);
    assert_eq!(progress.processed_resources, 5);
    assert_eq!(backend.search_count(&all).await.unwrap(), 5);
}

#[tokio::test]
async fn test_reindex_after_adding_identifier() {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    backend.create("Patient", patient("p1", "Smith")).await.unwrap();

    let missing = SearchQuery::new("Patient").with_param("identifier:missing", "true");
    let present = SearchQuery::new("Patient").with_param("identifier:missing", "false");
    assert_eq!(backend.search(&missing).await.unwrap().ids(), vec!["p1"]);

    backend
        .update("Patient", "p1", patient_with_mrn("p1", "Smith", "12345"))
        .await
        .unwrap();

    let reindex = ReindexOperation::new(backend.clone());
    let job_id = reindex.start(ReindexRequest::all()).await.unwrap();
    reindex.run(&job_id).await.unwrap();

    assert_eq!(backend.search_count(&missing).await.unwrap(), 0);
    assert_eq!(backend.search(&present).await.unwrap().ids(), vec!["p1"]);
}

#[tokio::test]
async fn test_reindex_counts_under_indexed_resources() {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    let bad = backend
        .create("Patient", json!({"id": "bad", "birthDate": "sometime in spring"}))
        .await
        .unwrap();
    assert!(bad.is_under_indexed());
    backend.create("Patient", patient("good", "Smith")).await.unwrap();

    let reindex = ReindexOperation::new(backend.clone());
    let job_id = reindex.start(ReindexRequest::all()).await.unwrap();
    let progress = reindex.run(&job_id).await.unwrap();

    assert_eq!(progress.processed_resources, 2);
    assert_eq!(progress.under_indexed_resources, 1);

    // Fixing the document clears the flag
    let fixed = backend
        .update("Patient", "bad", json!({"id": "bad", "birthDate": "1980-04-01"}))
        .await
        .unwrap();
    assert!(!fixed.is_under_indexed());
}

#[tokio::test]
async fn test_reindex_skips_deleted_resources() {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    seed_nicknames(&backend, 3).await;
    backend.delete("Patient", "p0").await.unwrap();

    let reindex = ReindexOperation::new(backend.clone());
    let job_id = reindex.start(ReindexRequest::all()).await.unwrap();
    let progress = reindex.run(&job_id).await.unwrap();

    assert_eq!(progress.total_resources, 2);
    assert_eq!(progress.processed_resources, 2);
}
