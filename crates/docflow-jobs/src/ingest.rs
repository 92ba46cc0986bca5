//! Ingestion entry points.
//!
//! The only two ways a sub-graph starts: a caller uploads a file, or a
//! fan-out transition creates a child document. Both create the document
//! first and then submit its entry job through the dispatcher.

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use docflow_core::payloads::{ChunkDocumentInput, ExtractArchiveInput};
use docflow_core::{DocType, Error, JobInput, NewDocument, Result, UploadKind};

use crate::dispatcher::Dispatcher;
use crate::graph::GraphConfig;

/// What an upload started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// A document was created and its entry job submitted.
    Document { document_id: Uuid, job_id: Uuid },
    /// A pre-document job (archive extraction or chunking) was submitted.
    Job { job_id: Uuid },
}

impl Ingested {
    pub fn document_id(&self) -> Option<Uuid> {
        match self {
            Ingested::Document { document_id, .. } => Some(*document_id),
            Ingested::Job { .. } => None,
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            Ingested::Document { job_id, .. } | Ingested::Job { job_id } => *job_id,
        }
    }
}

pub struct Ingestor {
    dispatcher: Arc<Dispatcher>,
    config: GraphConfig,
}

impl Ingestor {
    pub fn new(dispatcher: Arc<Dispatcher>, config: GraphConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Create a document of a known doctype and start its processing.
    pub async fn ingest_upload(
        &self,
        project_id: Uuid,
        file_path: impl AsRef<Path>,
        doctype: DocType,
        folder_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let new_document =
            NewDocument::new(project_id, doctype, file_path.as_ref()).in_folder(folder_id);
        let (document, _) = self.dispatcher.ingest_document(new_document).await?;
        Ok(document.id)
    }

    /// Classify an uploaded file and start the matching sub-graph.
    pub async fn ingest_file(
        &self,
        project_id: Uuid,
        file_path: impl AsRef<Path>,
        folder_id: Option<Uuid>,
    ) -> Result<Ingested> {
        let path = file_path.as_ref();
        let kind = UploadKind::classify(path).ok_or_else(|| {
            Error::InvalidInput(format!("Unsupported file type: {}", path.display()))
        })?;

        let ingested = match kind {
            UploadKind::Archive => {
                let input = JobInput::ExtractArchive(ExtractArchiveInput {
                    project_id,
                    folder_id,
                    archive_path: path.to_path_buf(),
                });
                Ingested::Job {
                    job_id: self.dispatcher.submit_input(input).await?,
                }
            }
            UploadKind::Paginated => {
                let input = JobInput::ChunkDocument(ChunkDocumentInput {
                    project_id,
                    folder_id,
                    file_path: path.to_path_buf(),
                    pages_per_chunk: self.config.pages_per_chunk,
                });
                Ingested::Job {
                    job_id: self.dispatcher.submit_input(input).await?,
                }
            }
            UploadKind::Document(doctype) => {
                let new_document =
                    NewDocument::new(project_id, doctype, path).in_folder(folder_id);
                let (document, job_id) = self.dispatcher.ingest_document(new_document).await?;
                Ingested::Document {
                    document_id: document.id,
                    job_id,
                }
            }
        };

        info!(
            subsystem = "jobs",
            component = "ingest",
            op = "ingest_file",
            project_id = %project_id,
            path = %path.display(),
            kind = ?kind,
            "Upload accepted"
        );
        Ok(ingested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::{AggregateStatus, DocumentStore, JobType};
    use docflow_db::InMemoryDocumentStore;

    use crate::graph::ingestion_graph;
    use crate::testing::RecordingExecutor;

    fn ingestor() -> (Ingestor, Arc<InMemoryDocumentStore>, Arc<RecordingExecutor>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        let config = GraphConfig::default().with_pages_per_chunk(5);
        let table = Arc::new(ingestion_graph(&config).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(table, store.clone(), executor.clone()));
        (Ingestor::new(dispatcher, config), store, executor)
    }

    #[tokio::test]
    async fn test_ingest_upload_creates_pending_document() {
        let (ingestor, store, executor) = ingestor();
        let folder = Some(Uuid::from_u128(5));
        let id = ingestor
            .ingest_upload(Uuid::nil(), "notes.html", DocType::Text, folder)
            .await
            .unwrap();

        let doc = store.get_document(id).await.unwrap();
        assert_eq!(doc.folder_id, folder);
        assert_eq!(doc.status(), AggregateStatus::Processing);
        assert_eq!(doc.completion.pending_jobs().len(), 7);

        let submitted = executor.take().await;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].job_type, JobType::SdocInit);
    }

    #[tokio::test]
    async fn test_archive_submits_extraction_without_document() {
        let (ingestor, store, executor) = ingestor();
        let ingested = ingestor
            .ingest_file(Uuid::nil(), "bundle.tar.gz", None)
            .await
            .unwrap();

        assert_eq!(ingested.document_id(), None);
        assert!(store.is_empty().await);
        let submitted = executor.take().await;
        assert_eq!(submitted[0].job_type, JobType::ExtractArchive);
        assert_eq!(submitted[0].job_id, ingested.job_id());
    }

    #[tokio::test]
    async fn test_pdf_is_chunked_with_configured_page_count() {
        let (ingestor, _, executor) = ingestor();
        ingestor
            .ingest_file(Uuid::nil(), "Book.PDF", None)
            .await
            .unwrap();
        let submitted = executor.take().await;
        match &submitted[0].input {
            JobInput::ChunkDocument(input) => assert_eq!(input.pages_per_chunk, 5),
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_media_file_becomes_document_of_inferred_type() {
        let (ingestor, store, _) = ingestor();
        let ingested = ingestor
            .ingest_file(Uuid::nil(), "clip.mp4", None)
            .await
            .unwrap();
        let id = ingested.document_id().unwrap();
        assert_eq!(store.get_document(id).await.unwrap().doctype, DocType::Video);
    }

    #[tokio::test]
    async fn test_unknown_extension_is_invalid_input() {
        let (ingestor, store, executor) = ingestor();
        let err = ingestor
            .ingest_file(Uuid::nil(), "binary.exe", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.is_empty().await);
        assert_eq!(executor.count().await, 0);
    }
}
