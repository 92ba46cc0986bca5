//! Core traits for docflow abstractions.
//!
//! The dispatcher only talks to storage and execution through these traits,
//! so both can be swapped for in-memory fakes in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::completion::RecordOutcome;
use crate::error::Result;
use crate::models::{Document, JobType, NewDocument, Outcome};
use crate::payloads::JobInput;

// =============================================================================
// DOCUMENT STORE
// =============================================================================

/// Identity of one completion for duplicate-dispatch detection.
///
/// Document-scoped jobs are keyed by `(job_type, document_id)`: each
/// document runs a job type once. Jobs that run before a document exists
/// (archive extraction, chunking) are keyed by the id of the delivered job,
/// so a redelivery is caught while a second upload of the same file is not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchKey {
    pub job_type: JobType,
    pub subject: String,
}

impl DispatchKey {
    pub fn for_completion(job_type: JobType, job_id: Uuid, input: &JobInput) -> Self {
        let subject = match input.document_id() {
            Some(id) => id.to_string(),
            None => format!("job:{}", job_id),
        };
        Self { job_type, subject }
    }

    /// Key of the `index`-th follow-up of this completion.
    ///
    /// `next_jobs` is pure, so a redelivered completion yields the same
    /// follow-ups in the same order.
    pub fn for_spawn(&self, index: usize) -> Self {
        Self {
            job_type: self.job_type,
            subject: format!("{}#{}", self.subject, index),
        }
    }
}

/// Persistence for documents and their completion vectors.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document with every expected cell pending.
    async fn create_document(&self, doc: NewDocument) -> Result<Document>;

    /// Fetch a document, `Error::DocumentNotFound` if absent.
    async fn get_document(&self, id: Uuid) -> Result<Document>;

    /// Remove a document and its cells. Used to roll back a document whose
    /// entry job could not be submitted.
    async fn delete_document(&self, id: Uuid) -> Result<()>;

    /// Atomically apply one job outcome to a document's completion vector.
    ///
    /// Implementations must serialize concurrent recordings per document and
    /// must only ever change a `NotStarted` cell.
    async fn record_outcome(
        &self,
        id: Uuid,
        job_type: JobType,
        outcome: Outcome,
    ) -> Result<RecordOutcome>;

    /// Claim the right to fan out for one completion.
    ///
    /// Returns `true` for the first caller with a given key, `false` after.
    async fn mark_dispatched(&self, key: &DispatchKey) -> Result<bool>;

    /// Give a claim back so a redelivered completion can retry it.
    async fn release_dispatched(&self, key: &DispatchKey) -> Result<()>;

    /// Documents still processing whose last update is older than `older_than`.
    async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>>;

    /// All documents of a project, oldest first.
    async fn list_documents(&self, project_id: Uuid) -> Result<Vec<Document>>;
}

// =============================================================================
// JOB EXECUTION
// =============================================================================

/// A job handed to the execution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub input: JobInput,
}

impl JobRequest {
    pub fn new(job_type: JobType, input: JobInput) -> Self {
        Self {
            job_id: crate::uuid_utils::new_v7(),
            job_type,
            input,
        }
    }

    /// Request whose job type is taken from the payload itself.
    pub fn from_input(input: JobInput) -> Self {
        Self::new(input.job_type(), input)
    }
}

/// The asynchronous job execution service.
///
/// `submit` is fire-and-forget: it returns once the job is accepted, and the
/// service later reports the finished job to the dispatcher.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn submit(&self, request: JobRequest) -> Result<()>;
}
