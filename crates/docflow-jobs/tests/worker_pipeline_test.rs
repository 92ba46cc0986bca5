//! The ingestion graph driven by the concurrent worker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use docflow_db::InMemoryDocumentStore;
use docflow_jobs::{
    ingestion_graph, job_queue, AggregateStatus, CellStatus, ChannelExecutor, Dispatcher,
    DocType, DocumentStore, Error, FailingHandler, GraphConfig, Ingestor, JobContext,
    JobExecutor, JobHandler, JobRequest, JobResult, JobType, SimulatedHandler,
    SimulationProfile, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle,
};

struct Pipeline {
    store: Arc<InMemoryDocumentStore>,
    ingestor: Ingestor,
    handle: WorkerHandle,
}

async fn pipeline(extra: Vec<Box<dyn JobHandler>>) -> Pipeline {
    let config = GraphConfig::default();
    let table = Arc::new(ingestion_graph(&config).unwrap());
    let store = Arc::new(InMemoryDocumentStore::new());
    let (executor, queue) = job_queue(64);
    let dispatcher = Arc::new(Dispatcher::new(table, store.clone(), Arc::new(executor)));

    let worker_config = WorkerConfig::default()
        .with_max_concurrent(4)
        .with_retry_delay(0)
        .with_max_retries(2);
    let handle = WorkerBuilder::new(dispatcher.clone(), queue)
        .with_config(worker_config)
        .with_handlers(SimulatedHandler::all(SimulationProfile::default()))
        .with_handlers(extra)
        .build()
        .await
        .start();

    Pipeline {
        store,
        ingestor: Ingestor::new(dispatcher, config),
        handle,
    }
}

async fn wait_idle(handle: &WorkerHandle) {
    tokio::time::timeout(Duration::from_secs(10), handle.wait_idle())
        .await
        .expect("pipeline did not settle")
        .unwrap();
}

/// Asks for a retry on its first call, then behaves like the simulated handler.
struct FlakyHandler {
    inner: SimulatedHandler,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl JobHandler for FlakyHandler {
    fn job_type(&self) -> JobType {
        self.inner.job_type()
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return JobResult::Retry("index not ready".into());
        }
        self.inner.execute(ctx).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_uploads_all_finish() {
    let p = pipeline(Vec::new()).await;
    let project = Uuid::from_u128(1);

    p.ingestor
        .ingest_file(project, "bundle.zip", None)
        .await
        .unwrap();
    p.ingestor
        .ingest_file(project, "talk.mp3", None)
        .await
        .unwrap();
    p.ingestor
        .ingest_file(project, "clip.mp4", None)
        .await
        .unwrap();
    wait_idle(&p.handle).await;

    let docs = p.store.list_documents(project).await.unwrap();
    // Three archive members, the audio file and the video file.
    assert_eq!(docs.len(), 5);
    for doc in &docs {
        assert_eq!(
            doc.status(),
            AggregateStatus::Finished,
            "{} left {:?}",
            doc.file_path.display(),
            doc.completion.pending_jobs()
        );
    }

    p.handle.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_under_concurrency_marks_document_erroneous() {
    let p = pipeline(vec![Box::new(FailingHandler::new(
        JobType::ImageObjectDetection,
        "detector crashed",
    ))])
    .await;
    let id = p
        .ingestor
        .ingest_upload(Uuid::nil(), "cat.png", DocType::Image, None)
        .await
        .unwrap();
    wait_idle(&p.handle).await;

    let doc = p.store.get_document(id).await.unwrap();
    assert_eq!(doc.status(), AggregateStatus::Erroneous);
    assert_eq!(doc.completion.failed_jobs(), vec![JobType::ImageObjectDetection]);
    // Sibling branches ran to completion.
    assert_eq!(
        doc.completion.get(JobType::SentenceEmbedding),
        Some(CellStatus::Succeeded)
    );
    assert_eq!(doc.completion.processed_count(), doc.completion.len() - 1);

    p.handle.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retried_job_is_recorded_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let flaky = FlakyHandler {
        inner: SimulatedHandler::new(JobType::EsIndex, Arc::new(SimulationProfile::default())),
        calls: calls.clone(),
    };
    let p = pipeline(vec![Box::new(flaky)]).await;
    let mut events = p.handle.events();

    let id = p
        .ingestor
        .ingest_upload(Uuid::nil(), "notes.html", DocType::Text, None)
        .await
        .unwrap();
    wait_idle(&p.handle).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let doc = p.store.get_document(id).await.unwrap();
    assert_eq!(doc.status(), AggregateStatus::Finished);

    let mut retries = 0;
    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            WorkerEvent::JobRetrying { job_type, .. } => {
                assert_eq!(job_type, JobType::EsIndex);
                retries += 1;
            }
            WorkerEvent::JobCompleted { .. } => completed += 1,
            _ => {}
        }
    }
    assert_eq!(retries, 1);
    // Entry job plus seven tracked jobs.
    assert_eq!(completed, 8);

    p.handle.join().await.unwrap();
}

/// Refuses exactly one submission, the `refuse_call`-th.
struct OneRefusal {
    inner: ChannelExecutor,
    calls: AtomicU32,
    refuse_call: u32,
}

#[async_trait]
impl JobExecutor for OneRefusal {
    async fn submit(&self, request: JobRequest) -> docflow_jobs::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.refuse_call {
            return Err(Error::Submit(format!("queue busy for {}", request.job_type)));
        }
        self.inner.submit(request).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refused_follow_up_is_started_on_redelivery() {
    let config = GraphConfig::default();
    let table = Arc::new(ingestion_graph(&config).unwrap());
    let store = Arc::new(InMemoryDocumentStore::new());
    let (executor, queue) = job_queue(64);
    // Call 1 is the entry job, call 2 the first follow-up.
    let executor = Arc::new(OneRefusal {
        inner: executor,
        calls: AtomicU32::new(0),
        refuse_call: 2,
    });
    let dispatcher = Arc::new(Dispatcher::new(table, store.clone(), executor.clone()));
    let handle = WorkerBuilder::new(dispatcher.clone(), queue)
        .with_config(WorkerConfig::default().with_retry_delay(0))
        .with_handlers(SimulatedHandler::all(SimulationProfile::default()))
        .build()
        .await
        .start();

    let id = Ingestor::new(dispatcher, config)
        .ingest_upload(Uuid::nil(), "notes.html", DocType::Text, None)
        .await
        .unwrap();
    wait_idle(&handle).await;

    let doc = store.get_document(id).await.unwrap();
    assert_eq!(doc.status(), AggregateStatus::Finished);
    // Entry job, the refused attempt, then one submission per tracked job.
    assert_eq!(
        executor.calls.load(Ordering::SeqCst) as usize,
        2 + doc.completion.len()
    );

    handle.join().await.unwrap();
}
