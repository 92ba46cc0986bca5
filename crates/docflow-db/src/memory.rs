//! In-memory document store.
//!
//! Used by the CLI simulator and by tests. Each document sits behind its own
//! mutex; the outer map lock is only held to look up or insert an entry, so
//! recordings for different documents never wait on each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use docflow_core::{
    new_v7, CellStatus, CompletionVector, DispatchKey, Document, DocumentStore, Error, JobType,
    NewDocument, Outcome, RecordOutcome, Result,
};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<Uuid, Arc<Mutex<Document>>>>,
    dispatched: Mutex<HashSet<DispatchKey>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents created so far.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Every document, oldest first.
    pub async fn all_documents(&self) -> Vec<Document> {
        let entries: Vec<_> = self.documents.read().await.values().cloned().collect();
        let mut docs = Vec::with_capacity(entries.len());
        for entry in entries {
            docs.push(entry.lock().await.clone());
        }
        docs.sort_by_key(|d| (d.created_at, d.id));
        docs
    }

    /// Backdate a document's last update (watchdog tests).
    pub async fn set_updated_at(&self, id: Uuid, updated_at: DateTime<Utc>) -> Result<()> {
        let entry = self.entry(id).await?;
        entry.lock().await.updated_at = updated_at;
        Ok(())
    }

    async fn entry(&self, id: Uuid) -> Result<Arc<Mutex<Document>>> {
        self.documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::DocumentNotFound(id))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_document(&self, doc: NewDocument) -> Result<Document> {
        let now = Utc::now();
        let document = Document {
            id: new_v7(),
            project_id: doc.project_id,
            doctype: doc.doctype,
            folder_id: doc.folder_id,
            file_path: doc.file_path,
            completion: CompletionVector::new(doc.doctype),
            created_at: now,
            updated_at: now,
        };

        self.documents
            .write()
            .await
            .insert(document.id, Arc::new(Mutex::new(document.clone())));

        info!(
            subsystem = "db",
            component = "memory_store",
            op = "create_document",
            document_id = %document.id,
            doctype = %document.doctype,
            "Document created"
        );
        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<Document> {
        let entry = self.entry(id).await?;
        let doc = entry.lock().await.clone();
        Ok(doc)
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        self.documents
            .write()
            .await
            .remove(&id)
            .ok_or(Error::DocumentNotFound(id))?;
        info!(
            subsystem = "db",
            component = "memory_store",
            op = "delete_document",
            document_id = %id,
            "Document deleted"
        );
        Ok(())
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        job_type: JobType,
        outcome: Outcome,
    ) -> Result<RecordOutcome> {
        let entry = self.entry(id).await?;
        let mut doc = entry.lock().await;
        let recorded = doc.completion.record(job_type, CellStatus::from(outcome));
        if recorded.cell_changed {
            doc.updated_at = Utc::now();
        }

        debug!(
            subsystem = "db",
            component = "memory_store",
            op = "record_outcome",
            document_id = %id,
            job_type = %job_type,
            cell_changed = recorded.cell_changed,
            aggregate_status = %recorded.current,
            "Outcome recorded"
        );
        Ok(recorded)
    }

    async fn mark_dispatched(&self, key: &DispatchKey) -> Result<bool> {
        Ok(self.dispatched.lock().await.insert(key.clone()))
    }

    async fn release_dispatched(&self, key: &DispatchKey) -> Result<()> {
        self.dispatched.lock().await.remove(key);
        Ok(())
    }

    async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>> {
        Ok(self
            .all_documents()
            .await
            .into_iter()
            .filter(|d| d.updated_at < older_than && !d.status().is_terminal())
            .collect())
    }

    async fn list_documents(&self, project_id: Uuid) -> Result<Vec<Document>> {
        Ok(self
            .all_documents()
            .await
            .into_iter()
            .filter(|d| d.project_id == project_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use docflow_core::{expected_jobs, AggregateStatus, DocType};

    fn new_doc(doctype: DocType) -> NewDocument {
        NewDocument::new(Uuid::nil(), doctype, "upload.bin")
    }

    #[tokio::test]
    async fn test_create_and_get_document() {
        let store = InMemoryDocumentStore::new();
        let created = store.create_document(new_doc(DocType::Audio)).await.unwrap();
        let fetched = store.get_document(created.id).await.unwrap();

        assert_eq!(created, fetched);
        assert_eq!(fetched.status(), AggregateStatus::Processing);
        assert_eq!(fetched.completion.len(), expected_jobs(DocType::Audio).len());
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let store = InMemoryDocumentStore::new();
        let err = store.get_document(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_record_outcome_missing_document() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .record_outcome(Uuid::nil(), JobType::EsIndex, Outcome::Succeeded)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_dispatched_first_caller_wins() {
        let store = InMemoryDocumentStore::new();
        let key = DispatchKey {
            job_type: JobType::Spacy,
            subject: "doc".into(),
        };
        assert!(store.mark_dispatched(&key).await.unwrap());
        assert!(!store.mark_dispatched(&key).await.unwrap());

        store.release_dispatched(&key).await.unwrap();
        assert!(store.mark_dispatched(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_document() {
        let store = InMemoryDocumentStore::new();
        let doc = store.create_document(new_doc(DocType::Text)).await.unwrap();
        store.delete_document(doc.id).await.unwrap();

        assert!(store.is_empty().await);
        let err = store.delete_document(doc.id).await.unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_stale_skips_terminal_and_fresh_documents() {
        let store = InMemoryDocumentStore::new();
        let stale = store.create_document(new_doc(DocType::Text)).await.unwrap();
        let failed = store.create_document(new_doc(DocType::Text)).await.unwrap();
        let fresh = store.create_document(new_doc(DocType::Text)).await.unwrap();

        store
            .record_outcome(failed.id, JobType::ExtractHtml, Outcome::Failed)
            .await
            .unwrap();
        let long_ago = Utc::now() - Duration::hours(2);
        store.set_updated_at(stale.id, long_ago).await.unwrap();
        store.set_updated_at(failed.id, long_ago).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        let found: Vec<Uuid> = store
            .list_stale(cutoff)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(found, vec![stale.id]);
        assert!(!found.contains(&fresh.id));
    }

    #[tokio::test]
    async fn test_list_documents_filters_by_project() {
        let store = InMemoryDocumentStore::new();
        let other = Uuid::from_u128(5);
        store.create_document(new_doc(DocType::Image)).await.unwrap();
        store
            .create_document(NewDocument::new(other, DocType::Video, "clip.mp4"))
            .await
            .unwrap();

        let docs = store.list_documents(other).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doctype, DocType::Video);
        assert_eq!(store.len().await, 2);
    }
}
