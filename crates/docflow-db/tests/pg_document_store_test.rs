//! PostgreSQL document store tests.
//!
//! Require a running database: `cargo test -p docflow-db --features migrations -- --ignored`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;

use docflow_db::test_fixtures::{test_database_url, test_project_id};
use docflow_db::{
    expected_jobs, AggregateStatus, CellStatus, Database, DispatchKey, DocType, DocumentStore,
    Error, JobType, NewDocument, Outcome,
};

async fn setup_test_db() -> Database {
    dotenvy::dotenv().ok();
    let db = Database::connect(&test_database_url())
        .await
        .expect("Failed to connect to test database");
    #[cfg(feature = "migrations")]
    db.migrate().await.expect("Failed to run migrations");
    db
}

#[tokio::test]
#[ignore]
async fn test_create_document_seeds_pending_cells() {
    let db = setup_test_db().await;
    let project_id = test_project_id();

    let doc = db
        .documents
        .create_document(NewDocument::new(project_id, DocType::Video, "clip.mp4"))
        .await
        .unwrap();
    let fetched = db.documents.get_document(doc.id).await.unwrap();

    assert_eq!(fetched.id, doc.id);
    assert_eq!(fetched.doctype, DocType::Video);
    assert_eq!(fetched.completion.len(), expected_jobs(DocType::Video).len());
    assert_eq!(fetched.completion.pending_jobs().len(), fetched.completion.len());
    assert_eq!(fetched.status(), AggregateStatus::Processing);
}

#[tokio::test]
#[ignore]
async fn test_get_missing_document_is_not_found() {
    let db = setup_test_db().await;
    let err = db.documents.get_document(test_project_id()).await.unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_record_outcome_failed_is_sticky() {
    let db = setup_test_db().await;
    let doc = db
        .documents
        .create_document(NewDocument::new(test_project_id(), DocType::Text, "a.html"))
        .await
        .unwrap();

    let failed = db
        .documents
        .record_outcome(doc.id, JobType::DetectLanguage, Outcome::Failed)
        .await
        .unwrap();
    assert!(failed.became_terminal());

    let late = db
        .documents
        .record_outcome(doc.id, JobType::DetectLanguage, Outcome::Succeeded)
        .await
        .unwrap();
    assert!(!late.cell_changed);

    let fetched = db.documents.get_document(doc.id).await.unwrap();
    assert_eq!(fetched.completion.get(JobType::DetectLanguage), Some(CellStatus::Failed));
    assert_eq!(fetched.status(), AggregateStatus::Erroneous);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_recordings_finish_once() {
    let db = setup_test_db().await;
    let store = Arc::new(db.documents.clone());
    let doc = store
        .create_document(NewDocument::new(test_project_id(), DocType::Audio, "talk.mp3"))
        .await
        .unwrap();

    let tasks = expected_jobs(DocType::Audio).iter().map(|jt| {
        let store = store.clone();
        let jt = *jt;
        let id = doc.id;
        tokio::spawn(async move { store.record_outcome(id, jt, Outcome::Succeeded).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.became_terminal()).count(), 1);
    let fetched = store.get_document(doc.id).await.unwrap();
    assert_eq!(fetched.status(), AggregateStatus::Finished);
}

#[tokio::test]
#[ignore]
async fn test_mark_dispatched_first_caller_wins() {
    let db = setup_test_db().await;
    let key = DispatchKey {
        job_type: JobType::Spacy,
        subject: test_project_id().to_string(),
    };
    assert!(db.documents.mark_dispatched(&key).await.unwrap());
    assert!(!db.documents.mark_dispatched(&key).await.unwrap());

    db.documents.release_dispatched(&key).await.unwrap();
    assert!(db.documents.mark_dispatched(&key).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_finished_document_rejects_late_failure() {
    let db = setup_test_db().await;
    let doc = db
        .documents
        .create_document(NewDocument::new(test_project_id(), DocType::Image, "cat.png"))
        .await
        .unwrap();
    for jt in expected_jobs(DocType::Image) {
        db.documents
            .record_outcome(doc.id, *jt, Outcome::Succeeded)
            .await
            .unwrap();
    }

    let late = db
        .documents
        .record_outcome(doc.id, JobType::ImageThumbnail, Outcome::Failed)
        .await
        .unwrap();
    assert!(!late.cell_changed);
    assert_eq!(late.current, AggregateStatus::Finished);

    let fetched = db.documents.get_document(doc.id).await.unwrap();
    assert_eq!(fetched.completion.get(JobType::ImageThumbnail), Some(CellStatus::Succeeded));
    assert_eq!(fetched.status(), AggregateStatus::Finished);
}

#[tokio::test]
#[ignore]
async fn test_delete_document_removes_cells() {
    let db = setup_test_db().await;
    let doc = db
        .documents
        .create_document(NewDocument::new(test_project_id(), DocType::Text, "a.html"))
        .await
        .unwrap();
    db.documents.delete_document(doc.id).await.unwrap();

    let err = db.documents.get_document(doc.id).await.unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_list_stale_and_list_documents() {
    let db = setup_test_db().await;
    let project_id = test_project_id();
    let pending = db
        .documents
        .create_document(NewDocument::new(project_id, DocType::Image, "cat.png"))
        .await
        .unwrap();
    let failed = db
        .documents
        .create_document(NewDocument::new(project_id, DocType::Image, "dog.png"))
        .await
        .unwrap();
    db.documents
        .record_outcome(failed.id, JobType::ImageCaption, Outcome::Failed)
        .await
        .unwrap();

    let stale: Vec<_> = db
        .documents
        .list_stale(Utc::now() + Duration::seconds(5))
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert!(stale.contains(&pending.id));
    assert!(!stale.contains(&failed.id));

    let docs = db.documents.list_documents(project_id).await.unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].id, pending.id);
}
