//! Dispatcher: the single completion callback of the job system.
//!
//! For every finished job the dispatcher records the outcome on the owning
//! document, and for successes evaluates the transition table and
//! materializes its follow-ups (new documents first, then their entry jobs).
//! It is the only writer of document status.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use docflow_core::{
    validate_input, validate_output, AggregateStatus, CellStatus, DispatchKey, Document,
    DocumentStore, Error, EventBus, JobExecutor, JobInput, JobOutput, JobRequest, JobType,
    NewDocument, Outcome, PipelineEvent, RecordOutcome, Result,
};

use crate::tracker::CompletionTracker;
use crate::transitions::{NextJob, Spawn, TransitionTable};

/// How a job finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Succeeded(JobOutput),
    Failed(String),
}

impl Completion {
    pub fn outcome(&self) -> Outcome {
        match self {
            Completion::Succeeded(_) => Outcome::Succeeded,
            Completion::Failed(_) => Outcome::Failed,
        }
    }
}

/// What one `on_job_finished` call did.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Recording on the owning document, if the job had one.
    pub recorded: Option<RecordOutcome>,
    /// The completion was already dispatched before; nothing was fanned out.
    pub duplicate: bool,
    /// Job ids submitted as follow-ups.
    pub submitted: Vec<Uuid>,
    /// Documents created by fan-out transitions.
    pub created_documents: Vec<Uuid>,
    /// Cells failed because their branch was abandoned.
    pub abandoned: Vec<JobType>,
    /// Follow-ups that could not be started. Siblings are unaffected, and a
    /// redelivery of the same completion retries exactly these.
    pub errors: Vec<String>,
}

impl DispatchReport {
    pub fn fan_out(&self) -> usize {
        self.submitted.len()
    }
}

pub struct Dispatcher {
    table: Arc<TransitionTable>,
    tracker: CompletionTracker,
    executor: Arc<dyn JobExecutor>,
    events: Arc<EventBus>,
}

impl Dispatcher {
    pub fn new(
        table: Arc<TransitionTable>,
        store: Arc<dyn DocumentStore>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            table,
            tracker: CompletionTracker::new(store),
            executor,
            events: Arc::new(EventBus::default()),
        }
    }

    /// Publish events on a shared bus instead of a private one.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        self.tracker.store()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Handle one finished job.
    ///
    /// Contract violations (payloads of the wrong type, unregistered job
    /// types) are returned as errors. Job failures are recorded and end
    /// the branch. A completion seen before is recorded idempotently and
    /// only starts follow-ups that no earlier delivery started.
    pub async fn on_job_finished(
        &self,
        job_id: Uuid,
        job_type: JobType,
        input: &JobInput,
        completion: Completion,
    ) -> Result<DispatchReport> {
        validate_input(job_type, input)?;
        if let Completion::Succeeded(output) = &completion {
            validate_output(job_type, output)?;
        }

        let document_id = input.document_id();
        let outcome = completion.outcome();
        let mut report = DispatchReport::default();

        if let Some(id) = document_id {
            let recorded = self
                .tracker
                .record_outcome(id, job_type, outcome)
                .await
                .map_err(|e| {
                    error!(
                        subsystem = "jobs",
                        component = "dispatcher",
                        op = "on_job_finished",
                        document_id = %id,
                        job_type = %job_type,
                        error = %e,
                        "Failed to record job outcome"
                    );
                    e
                })?;
            report.recorded = Some(recorded);
        }

        match &completion {
            Completion::Succeeded(_) => self.events.emit(PipelineEvent::JobSucceeded {
                job_type,
                document_id,
            }),
            Completion::Failed(message) => {
                let settled = report
                    .recorded
                    .is_some_and(|r| r.conflicted(CellStatus::Failed));
                if settled {
                    warn!(
                        subsystem = "jobs",
                        component = "dispatcher",
                        op = "on_job_finished",
                        document_id = ?document_id,
                        job_type = %job_type,
                        error = %message,
                        "Late failure over a succeeded cell, ignored"
                    );
                } else {
                    warn!(
                        subsystem = "jobs",
                        component = "dispatcher",
                        op = "on_job_finished",
                        document_id = ?document_id,
                        job_type = %job_type,
                        error = %message,
                        "Job failed, branch ends here"
                    );
                }
                self.events.emit(PipelineEvent::JobFailed {
                    job_type,
                    document_id,
                    error: message.clone(),
                });
            }
        }

        if let (Some(id), Some(recorded)) = (document_id, report.recorded) {
            self.announce_terminal(id, &recorded).await;
        }

        let output = match completion {
            Completion::Succeeded(output) => output,
            Completion::Failed(_) => return Ok(report),
        };

        if let Some(recorded) = &report.recorded {
            if recorded.rejected_by_failure(CellStatus::Succeeded) {
                warn!(
                    subsystem = "jobs",
                    component = "dispatcher",
                    op = "on_job_finished",
                    document_id = ?document_id,
                    job_type = %job_type,
                    "Late success over a failed cell, not fanning out"
                );
                return Ok(report);
            }
        }

        let next = self.table.next_jobs(job_type, input, &output)?;

        // One claim for the completion, one per follow-up. A follow-up that
        // fails to start gives its claim back for the next delivery.
        let key = DispatchKey::for_completion(job_type, job_id, input);
        let first_delivery = self.store().mark_dispatched(&key).await?;

        debug!(
            subsystem = "jobs",
            component = "dispatcher",
            op = "on_job_finished",
            document_id = ?document_id,
            job_type = %job_type,
            fan_out = next.len(),
            first_delivery,
            "Dispatching follow-up jobs"
        );

        let mut already_started = 0;
        for (index, job) in next.into_iter().enumerate() {
            let target = job.job_type;
            let spawn_key = key.for_spawn(index);
            if !self.store().mark_dispatched(&spawn_key).await? {
                already_started += 1;
                continue;
            }

            match self.spawn(document_id, job).await {
                Ok(Spawned::Job(job_id)) => report.submitted.push(job_id),
                Ok(Spawned::Document { document_id, job_id }) => {
                    report.created_documents.push(document_id);
                    report.submitted.push(job_id);
                }
                Ok(Spawned::Abandoned(failed)) => report.abandoned.extend(failed),
                Err(e) => {
                    self.release(&spawn_key).await;
                    if e.is_contract_violation() {
                        return Err(e);
                    }
                    error!(
                        subsystem = "jobs",
                        component = "dispatcher",
                        op = "spawn",
                        document_id = ?document_id,
                        job_type = %job_type,
                        target = %target,
                        error = %e,
                        "Failed to start follow-up job"
                    );
                    report.errors.push(format!("{}: {}", target, e));
                }
            }
        }

        if first_delivery {
            return Ok(report);
        }
        if report.submitted.is_empty() && report.abandoned.is_empty() && report.errors.is_empty()
        {
            warn!(
                subsystem = "jobs",
                component = "dispatcher",
                op = "on_job_finished",
                document_id = ?document_id,
                job_type = %job_type,
                already_started,
                "Duplicate completion, already dispatched"
            );
            self.events.emit(PipelineEvent::DuplicateCompletion {
                job_type,
                document_id,
            });
            report.duplicate = true;
        } else {
            info!(
                subsystem = "jobs",
                component = "dispatcher",
                op = "on_job_finished",
                document_id = ?document_id,
                job_type = %job_type,
                recovered = report.submitted.len(),
                already_started,
                "Redelivered completion started remaining follow-ups"
            );
        }
        Ok(report)
    }

    /// Submit one job to the execution service.
    pub async fn submit(&self, request: JobRequest) -> Result<Uuid> {
        validate_input(request.job_type, &request.input)?;
        let job_id = request.job_id;
        let job_type = request.job_type;
        let document_id = request.input.document_id();

        self.executor.submit(request).await?;

        debug!(
            subsystem = "jobs",
            component = "dispatcher",
            op = "submit",
            job_id = %job_id,
            job_type = %job_type,
            document_id = ?document_id,
            "Job submitted"
        );
        self.events.emit(PipelineEvent::JobSubmitted {
            job_id,
            job_type,
            document_id,
        });
        Ok(job_id)
    }

    /// Submit a job whose type is taken from its input.
    pub async fn submit_input(&self, input: JobInput) -> Result<Uuid> {
        self.submit(JobRequest::from_input(input)).await
    }

    /// Create a document and submit its entry job.
    ///
    /// Shared by uploads and by fan-out transitions creating child documents.
    /// When the entry job is not accepted the document is deleted again, so
    /// no document is left pending without a job.
    pub async fn ingest_document(&self, new_document: NewDocument) -> Result<(Document, Uuid)> {
        let document = self.store().create_document(new_document).await?;
        info!(
            subsystem = "jobs",
            component = "dispatcher",
            op = "ingest_document",
            document_id = %document.id,
            project_id = %document.project_id,
            doctype = %document.doctype,
            "Document created"
        );
        self.events.emit(PipelineEvent::DocumentCreated {
            document_id: document.id,
            project_id: document.project_id,
            doctype: document.doctype,
            folder_id: document.folder_id,
        });

        let submitted = match self.table.entry_job(&document) {
            Ok(NextJob {
                job_type,
                spawn: Spawn::Run(input),
            }) => self.submit(JobRequest::new(job_type, input)).await,
            Ok(_) => Err(Error::Contract("Entry transition must run a job".into())),
            Err(e) => Err(e),
        };

        match submitted {
            Ok(job_id) => Ok((document, job_id)),
            Err(e) => {
                self.roll_back(document.id, &e).await;
                Err(e)
            }
        }
    }

    /// Fail a cell that never completed.
    ///
    /// Only a pending cell changes: a cell that succeeded in the meantime
    /// keeps its result, and a late success cannot revert the failure.
    pub async fn mark_stale(&self, document_id: Uuid, job_type: JobType) -> Result<RecordOutcome> {
        let recorded = self
            .tracker
            .record_outcome(document_id, job_type, Outcome::Failed)
            .await?;
        if recorded.cell_changed {
            warn!(
                subsystem = "jobs",
                component = "dispatcher",
                op = "mark_stale",
                document_id = %document_id,
                job_type = %job_type,
                "Pending cell marked failed"
            );
            self.events.emit(PipelineEvent::CellMarkedStale {
                document_id,
                job_type,
            });
        }
        self.announce_terminal(document_id, &recorded).await;
        Ok(recorded)
    }

    async fn spawn(&self, source_document: Option<Uuid>, job: NextJob) -> Result<Spawned> {
        match job.spawn {
            Spawn::Run(input) => {
                let job_id = self.submit(JobRequest::new(job.job_type, input)).await?;
                Ok(Spawned::Job(job_id))
            }
            Spawn::CreateDocument(new_document) => {
                let (document, job_id) = self.ingest_document(new_document).await?;
                Ok(Spawned::Document {
                    document_id: document.id,
                    job_id,
                })
            }
            Spawn::Abandon(reason) => {
                let document_id = source_document.ok_or_else(|| {
                    Error::Contract(format!(
                        "Cannot abandon {} outside a document",
                        job.job_type
                    ))
                })?;
                let failed = self.abandon(document_id, job.job_type, reason).await?;
                Ok(Spawned::Abandoned(failed))
            }
        }
    }

    /// Fail `job_type` and every cell downstream of it that is still pending.
    async fn abandon(
        &self,
        document_id: Uuid,
        job_type: JobType,
        reason: String,
    ) -> Result<Vec<JobType>> {
        let mut failed = Vec::new();
        let mut terminal = None;
        for target in self.table.reachable_from(job_type) {
            let recorded = self
                .tracker
                .record_outcome(document_id, target, Outcome::Failed)
                .await?;
            if recorded.cell_changed {
                failed.push(target);
            }
            if recorded.became_terminal() {
                terminal = Some(recorded);
            }
        }
        if failed.is_empty() {
            return Ok(failed);
        }

        warn!(
            subsystem = "jobs",
            component = "dispatcher",
            op = "abandon",
            document_id = %document_id,
            job_type = %job_type,
            reason = %reason,
            cells = failed.len(),
            "Branch abandoned"
        );
        self.events.emit(PipelineEvent::BranchAbandoned {
            document_id,
            job_type,
            reason,
            failed_jobs: failed.clone(),
        });
        // Announced once every cell is recorded, so the event lists them all.
        if let Some(recorded) = terminal {
            self.announce_terminal(document_id, &recorded).await;
        }
        Ok(failed)
    }

    async fn release(&self, key: &DispatchKey) {
        if let Err(e) = self.store().release_dispatched(key).await {
            error!(
                subsystem = "jobs",
                component = "dispatcher",
                op = "release",
                job_type = %key.job_type,
                subject = %key.subject,
                error = %e,
                "Failed to release dispatch claim"
            );
        }
    }

    async fn roll_back(&self, document_id: Uuid, cause: &Error) {
        match self.store().delete_document(document_id).await {
            Ok(()) => {
                warn!(
                    subsystem = "jobs",
                    component = "dispatcher",
                    op = "ingest_document",
                    document_id = %document_id,
                    error = %cause,
                    "Entry job not accepted, document rolled back"
                );
                self.events.emit(PipelineEvent::DocumentRolledBack {
                    document_id,
                    error: cause.to_string(),
                });
            }
            Err(e) => error!(
                subsystem = "jobs",
                component = "dispatcher",
                op = "ingest_document",
                document_id = %document_id,
                error = %e,
                "Failed to roll back document without entry job"
            ),
        }
    }

    async fn announce_terminal(&self, document_id: Uuid, recorded: &RecordOutcome) {
        if !recorded.became_terminal() {
            return;
        }
        let document = match self.tracker.document(document_id).await {
            Ok(document) => document,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "dispatcher",
                    document_id = %document_id,
                    error = %e,
                    "Failed to load document for status event"
                );
                return;
            }
        };

        info!(
            subsystem = "jobs",
            component = "dispatcher",
            document_id = %document_id,
            doctype = %document.doctype,
            aggregate_status = %recorded.current,
            "Document processing complete"
        );
        let event = match recorded.current {
            AggregateStatus::Erroneous => PipelineEvent::DocumentErroneous {
                document_id,
                doctype: document.doctype,
                failed_jobs: document.completion.failed_jobs(),
            },
            _ => PipelineEvent::DocumentFinished {
                document_id,
                doctype: document.doctype,
            },
        };
        self.events.emit(event);
    }
}

enum Spawned {
    Job(Uuid),
    Document { document_id: Uuid, job_id: Uuid },
    Abandoned(Vec<JobType>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::payloads::{
        DetectLanguageInput, ExtractArchiveInput, ExtractArchiveOutput, ExtractedFile,
        SdocInitOutput,
    };
    use docflow_core::DocType;
    use docflow_db::InMemoryDocumentStore;

    use crate::graph::{ingestion_graph, GraphConfig};
    use crate::testing::RecordingExecutor;

    fn dispatcher() -> (Dispatcher, Arc<InMemoryDocumentStore>, Arc<RecordingExecutor>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        let table = Arc::new(ingestion_graph(&GraphConfig::default()).unwrap());
        (
            Dispatcher::new(table, store.clone(), executor.clone()),
            store,
            executor,
        )
    }

    #[tokio::test]
    async fn test_ingest_document_submits_entry_job() {
        let (dispatcher, store, executor) = dispatcher();
        let mut events = dispatcher.events().subscribe();

        let (doc, job_id) = dispatcher
            .ingest_document(NewDocument::new(Uuid::nil(), DocType::Image, "cat.png"))
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        let submitted = executor.take().await;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].job_id, job_id);
        assert_eq!(submitted[0].job_type, JobType::SdocInit);
        assert_eq!(submitted[0].input.document_id(), Some(doc.id));

        assert_eq!(events.recv().await.unwrap().event_type, "document.created");
        assert_eq!(events.recv().await.unwrap().event_type, "job.submitted");
    }

    #[tokio::test]
    async fn test_success_submits_exactly_next_jobs() {
        let (dispatcher, _, executor) = dispatcher();
        let (doc, _) = dispatcher
            .ingest_document(NewDocument::new(Uuid::nil(), DocType::Audio, "talk.mp3"))
            .await
            .unwrap();
        let init = executor.take().await.remove(0);
        let output = JobOutput::SdocInit(SdocInitOutput {
            doctype: DocType::Audio,
            file_path: doc.file_path.clone(),
            mime_type: Some("audio/mpeg".into()),
        });

        let expected = dispatcher
            .table()
            .next_jobs(JobType::SdocInit, &init.input, &output)
            .unwrap();
        let report = dispatcher
            .on_job_finished(
                init.job_id,
                JobType::SdocInit,
                &init.input,
                Completion::Succeeded(output),
            )
            .await
            .unwrap();

        assert_eq!(report.fan_out(), expected.len());
        let submitted: Vec<JobType> = executor.take().await.iter().map(|r| r.job_type).collect();
        let expected: Vec<JobType> = expected.iter().map(|n| n.job_type).collect();
        assert_eq!(submitted, expected);
    }

    fn archive_request() -> JobRequest {
        JobRequest::from_input(JobInput::ExtractArchive(ExtractArchiveInput {
            project_id: Uuid::nil(),
            folder_id: None,
            archive_path: "bundle.zip".into(),
        }))
    }

    fn archive_output(files: &[(&str, DocType)]) -> JobOutput {
        JobOutput::ExtractArchive(ExtractArchiveOutput {
            files: files
                .iter()
                .map(|(path, doctype)| ExtractedFile {
                    path: (*path).into(),
                    doctype: *doctype,
                })
                .collect(),
        })
    }

    #[tokio::test]
    async fn test_duplicate_completion_does_not_fan_out_twice() {
        let (dispatcher, _, executor) = dispatcher();
        let request = archive_request();
        let output = archive_output(&[("bundle/a.txt", DocType::Text)]);

        let first = dispatcher
            .on_job_finished(
                request.job_id,
                JobType::ExtractArchive,
                &request.input,
                Completion::Succeeded(output.clone()),
            )
            .await
            .unwrap();
        let second = dispatcher
            .on_job_finished(
                request.job_id,
                JobType::ExtractArchive,
                &request.input,
                Completion::Succeeded(output),
            )
            .await
            .unwrap();

        assert_eq!(first.created_documents.len(), 1);
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert!(second.submitted.is_empty());
        assert_eq!(executor.count().await, 1);
    }

    #[tokio::test]
    async fn test_same_archive_submitted_twice_fans_out_twice() {
        let (dispatcher, store, _) = dispatcher();
        let output = archive_output(&[("bundle/a.txt", DocType::Text)]);

        for _ in 0..2 {
            let request = archive_request();
            let report = dispatcher
                .on_job_finished(
                    request.job_id,
                    JobType::ExtractArchive,
                    &request.input,
                    Completion::Succeeded(output.clone()),
                )
                .await
                .unwrap();
            assert!(!report.duplicate);
            assert_eq!(report.created_documents.len(), 1);
        }
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_failure_records_and_stops_branch() {
        let (dispatcher, store, executor) = dispatcher();
        let (doc, _) = dispatcher
            .ingest_document(NewDocument::new(Uuid::nil(), DocType::Text, "a.html"))
            .await
            .unwrap();
        executor.take().await;

        let input = JobInput::DetectLanguage(DetectLanguageInput {
            sdoc: doc.sdoc_ref(),
            doctype: DocType::Text,
            text: "?".into(),
            html: "<p>?</p>".into(),
        });
        let mut events = dispatcher.events().subscribe();
        let report = dispatcher
            .on_job_finished(
                Uuid::from_u128(3),
                JobType::DetectLanguage,
                &input,
                Completion::Failed("no language".into()),
            )
            .await
            .unwrap();

        assert!(report.recorded.unwrap().became_terminal());
        assert_eq!(executor.count().await, 0);
        let stored = store.get_document(doc.id).await.unwrap();
        assert_eq!(stored.status(), AggregateStatus::Erroneous);

        assert_eq!(events.recv().await.unwrap().event_type, "job.failed");
        let erroneous = events.recv().await.unwrap();
        assert_eq!(
            erroneous.payload,
            PipelineEvent::DocumentErroneous {
                document_id: doc.id,
                doctype: DocType::Text,
                failed_jobs: vec![JobType::DetectLanguage],
            }
        );
    }

    #[tokio::test]
    async fn test_mismatched_output_is_contract_violation() {
        let (dispatcher, _, executor) = dispatcher();
        let input = JobInput::ExtractArchive(ExtractArchiveInput {
            project_id: Uuid::nil(),
            folder_id: None,
            archive_path: "bundle.zip".into(),
        });
        let output = JobOutput::SdocInit(SdocInitOutput {
            doctype: DocType::Text,
            file_path: "x".into(),
            mime_type: None,
        });
        let err = dispatcher
            .on_job_finished(
                Uuid::from_u128(4),
                JobType::ExtractArchive,
                &input,
                Completion::Succeeded(output),
            )
            .await
            .unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(executor.count().await, 0);
    }

    #[tokio::test]
    async fn test_refused_submission_is_reported_and_rolled_back() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let executor = Arc::new(RecordingExecutor::refusing());
        let table = Arc::new(ingestion_graph(&GraphConfig::default()).unwrap());
        let dispatcher = Dispatcher::new(table, store.clone(), executor);
        let mut events = dispatcher.events().subscribe();

        let request = archive_request();
        let output = archive_output(&[("a.txt", DocType::Text), ("b.png", DocType::Image)]);
        let report = dispatcher
            .on_job_finished(
                request.job_id,
                JobType::ExtractArchive,
                &request.input,
                Completion::Succeeded(output),
            )
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 2);
        assert!(report.created_documents.is_empty());
        // No document is left pending without its entry job.
        assert!(store.is_empty().await);

        let mut rolled_back = 0;
        while let Ok(envelope) = events.try_recv() {
            if envelope.event_type == "document.rolled_back" {
                rolled_back += 1;
            }
        }
        assert_eq!(rolled_back, 2);
    }

    #[tokio::test]
    async fn test_redelivery_starts_only_follow_ups_that_failed() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        let table = Arc::new(ingestion_graph(&GraphConfig::default()).unwrap());
        let dispatcher = Dispatcher::new(table, store.clone(), executor.clone());

        let (doc, _) = dispatcher
            .ingest_document(NewDocument::new(Uuid::nil(), DocType::Text, "a.html"))
            .await
            .unwrap();
        let init = executor.take().await.remove(0);
        let plain_text = JobInput::ExtractPlainText(docflow_core::payloads::ExtractPlainTextInput {
            sdoc: doc.sdoc_ref(),
            doctype: DocType::Text,
            html: "<p>hi</p>".into(),
        });
        let output = JobOutput::ExtractPlainText(docflow_core::payloads::ExtractPlainTextOutput {
            text: "hi".into(),
            html: "<p>hi</p>".into(),
        });

        executor.set_refusing(true);
        let refused = dispatcher
            .on_job_finished(
                init.job_id,
                JobType::ExtractPlainText,
                &plain_text,
                Completion::Succeeded(output.clone()),
            )
            .await
            .unwrap();
        assert_eq!(refused.errors.len(), 2);
        assert_eq!(executor.count().await, 0);

        executor.set_refusing(false);
        let redelivered = dispatcher
            .on_job_finished(
                init.job_id,
                JobType::ExtractPlainText,
                &plain_text,
                Completion::Succeeded(output.clone()),
            )
            .await
            .unwrap();
        assert!(!redelivered.duplicate);
        assert!(redelivered.errors.is_empty());
        let started: Vec<JobType> = executor.take().await.iter().map(|r| r.job_type).collect();
        assert_eq!(started, vec![JobType::DetectLanguage, JobType::EsIndex]);

        let again = dispatcher
            .on_job_finished(
                init.job_id,
                JobType::ExtractPlainText,
                &plain_text,
                Completion::Succeeded(output),
            )
            .await
            .unwrap();
        assert!(again.duplicate);
        assert_eq!(executor.count().await, 0);
    }

    #[tokio::test]
    async fn test_mark_stale_leaves_succeeded_cell_alone() {
        let (dispatcher, store, executor) = dispatcher();
        let (doc, _) = dispatcher
            .ingest_document(NewDocument::new(Uuid::nil(), DocType::Text, "a.html"))
            .await
            .unwrap();
        executor.take().await;
        store
            .record_outcome(doc.id, JobType::EsIndex, Outcome::Succeeded)
            .await
            .unwrap();
        let mut events = dispatcher.events().subscribe();

        let stale = dispatcher.mark_stale(doc.id, JobType::EsIndex).await.unwrap();

        assert!(!stale.cell_changed);
        assert_eq!(stale.cell, Some(CellStatus::Succeeded));
        let stored = store.get_document(doc.id).await.unwrap();
        assert_eq!(stored.status(), AggregateStatus::Processing);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mark_stale_then_late_success_does_not_revert() {
        let (dispatcher, store, executor) = dispatcher();
        let (doc, _) = dispatcher
            .ingest_document(NewDocument::new(Uuid::nil(), DocType::Text, "a.html"))
            .await
            .unwrap();
        executor.take().await;

        let stale = dispatcher
            .mark_stale(doc.id, JobType::ExtractHtml)
            .await
            .unwrap();
        assert!(stale.cell_changed);

        let input = JobInput::ExtractHtml(docflow_core::payloads::ExtractHtmlInput {
            sdoc: doc.sdoc_ref(),
            file_path: "a.html".into(),
        });
        let output = JobOutput::ExtractHtml(docflow_core::payloads::ExtractHtmlOutput {
            html: "<p>late</p>".into(),
            embedded_images: vec![],
        });
        let report = dispatcher
            .on_job_finished(
                Uuid::from_u128(5),
                JobType::ExtractHtml,
                &input,
                Completion::Succeeded(output),
            )
            .await
            .unwrap();

        assert!(report.submitted.is_empty());
        assert_eq!(executor.count().await, 0);
        let stored = store.get_document(doc.id).await.unwrap();
        assert_eq!(stored.completion.get(JobType::ExtractHtml), Some(CellStatus::Failed));
    }
}
