//! Document completion tracker.
//!
//! Thin layer over a [`DocumentStore`] that owns the outcome-recording
//! policy: untracked job types are ignored, a cell is settled once and then
//! keeps its value, and the aggregate status is recomputed on every recording.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use docflow_core::{
    AggregateStatus, Document, DocumentStore, JobType, Outcome, RecordOutcome, Result,
};

#[derive(Clone)]
pub struct CompletionTracker {
    store: Arc<dyn DocumentStore>,
}

impl CompletionTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Record one job outcome and return the recomputed aggregate.
    pub async fn record_outcome(
        &self,
        document_id: Uuid,
        job_type: JobType,
        outcome: Outcome,
    ) -> Result<RecordOutcome> {
        let recorded = self
            .store
            .record_outcome(document_id, job_type, outcome)
            .await?;

        if !recorded.tracked {
            debug!(
                subsystem = "jobs",
                component = "tracker",
                op = "record_outcome",
                document_id = %document_id,
                job_type = %job_type,
                "Job type has no cell on this document, ignored"
            );
        } else if recorded.became_terminal() {
            info!(
                subsystem = "jobs",
                component = "tracker",
                op = "record_outcome",
                document_id = %document_id,
                job_type = %job_type,
                aggregate_status = %recorded.current,
                "Document reached terminal status"
            );
        } else {
            debug!(
                subsystem = "jobs",
                component = "tracker",
                op = "record_outcome",
                document_id = %document_id,
                job_type = %job_type,
                cell_changed = recorded.cell_changed,
                aggregate_status = %recorded.current,
                "Outcome recorded"
            );
        }
        Ok(recorded)
    }

    /// Aggregate status, freshly computed from the stored vector.
    pub async fn aggregate_status(&self, document_id: Uuid) -> Result<AggregateStatus> {
        Ok(self.store.get_document(document_id).await?.status())
    }

    pub async fn document(&self, document_id: Uuid) -> Result<Document> {
        self.store.get_document(document_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::{expected_jobs, DocType, NewDocument};
    use docflow_db::InMemoryDocumentStore;

    async fn tracker_with(doctype: DocType) -> (CompletionTracker, Uuid) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let doc = store
            .create_document(NewDocument::new(Uuid::nil(), doctype, "upload"))
            .await
            .unwrap();
        (CompletionTracker::new(store), doc.id)
    }

    #[tokio::test]
    async fn test_finished_after_every_expected_success() {
        let (tracker, id) = tracker_with(DocType::Text).await;
        let jobs = expected_jobs(DocType::Text);
        for (i, jt) in jobs.iter().enumerate() {
            let rec = tracker.record_outcome(id, *jt, Outcome::Succeeded).await.unwrap();
            assert_eq!(rec.became_terminal(), i == jobs.len() - 1);
        }
        assert_eq!(
            tracker.aggregate_status(id).await.unwrap(),
            AggregateStatus::Finished
        );
    }

    #[tokio::test]
    async fn test_recording_twice_is_idempotent() {
        let (tracker, id) = tracker_with(DocType::Image).await;
        let first = tracker
            .record_outcome(id, JobType::ImageThumbnail, Outcome::Succeeded)
            .await
            .unwrap();
        let second = tracker
            .record_outcome(id, JobType::ImageThumbnail, Outcome::Succeeded)
            .await
            .unwrap();
        assert!(first.cell_changed);
        assert!(!second.cell_changed);
        assert_eq!(first.current, second.current);
    }

    #[tokio::test]
    async fn test_untracked_job_type_is_noop() {
        let (tracker, id) = tracker_with(DocType::Text).await;
        let rec = tracker
            .record_outcome(id, JobType::ImageCaption, Outcome::Failed)
            .await
            .unwrap();
        assert!(!rec.tracked);
        assert_eq!(
            tracker.aggregate_status(id).await.unwrap(),
            AggregateStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_failure_is_sticky() {
        let (tracker, id) = tracker_with(DocType::Audio).await;
        tracker
            .record_outcome(id, JobType::AudioTranscription, Outcome::Failed)
            .await
            .unwrap();
        let late = tracker
            .record_outcome(id, JobType::AudioTranscription, Outcome::Succeeded)
            .await
            .unwrap();
        assert!(late.rejected_by_failure(Outcome::Succeeded.into()));
        assert_eq!(
            tracker.aggregate_status(id).await.unwrap(),
            AggregateStatus::Erroneous
        );
    }
}
