//! Fakes for exercising the graph without real workers.
//!
//! - [`RecordingExecutor`]: a [`JobExecutor`] that only queues requests.
//! - [`SimulatedHandler`]: a handler producing plausible typed outputs.
//! - [`Harness`]: drives a recording executor to completion one job at a
//!   time, so end-to-end scenarios are deterministic.
//!
//! Always compiled so the `docflow simulate` command and integration tests
//! can use it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use docflow_core::payloads::{
    AudioMetadataOutput, AudioTranscriptionOutput, ChunkDocumentOutput, DetectLanguageOutput,
    DetectedObject, DocumentChunk, EmbeddingOutput, EsIndexOutput, ExtractArchiveOutput,
    ExtractHtmlOutput, ExtractPlainTextOutput, ExtractedFile, HtmlMappingOutput,
    ImageCaptionOutput, ImageMetadataOutput, ObjectDetectionOutput, SdocInitOutput,
    SentenceEmbeddingOutput, SpacyOutput, ThumbnailOutput, VideoAudioExtractionOutput,
    VideoMetadataOutput,
};
use docflow_core::{
    new_v7, DocType, Error, JobExecutor, JobInput, JobOutput, JobRequest, JobType, Result,
};
use docflow_db::InMemoryDocumentStore;

use crate::dispatcher::{Completion, DispatchReport, Dispatcher};
use crate::graph::{ingestion_graph, GraphConfig};
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::ingest::Ingestor;

// =============================================================================
// RECORDING EXECUTOR
// =============================================================================

/// Executor that queues every submission for later inspection.
#[derive(Default)]
pub struct RecordingExecutor {
    queue: Mutex<VecDeque<JobRequest>>,
    total: AtomicUsize,
    refuse: AtomicBool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor whose queue is closed: every submission fails.
    pub fn refusing() -> Self {
        Self {
            refuse: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Open or close the queue.
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Drain every queued request.
    pub async fn take(&self) -> Vec<JobRequest> {
        self.queue.lock().await.drain(..).collect()
    }

    /// Pop the oldest queued request.
    pub async fn pop(&self) -> Option<JobRequest> {
        self.queue.lock().await.pop_front()
    }

    /// Number of requests currently queued.
    pub async fn count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Number of requests ever accepted.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    async fn submit(&self, request: JobRequest) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Submit(format!(
                "Executor refused {} job",
                request.job_type
            )));
        }
        self.total.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().await.push_back(request);
        Ok(())
    }
}

// =============================================================================
// SIMULATED HANDLERS
// =============================================================================

/// Shape of the simulated world.
#[derive(Debug, Clone)]
pub struct SimulationProfile {
    /// Language reported by language detection.
    pub language: String,
    /// Member file names and doctypes reported by archive extraction.
    pub archive_members: Vec<(String, DocType)>,
    /// Page count of every paginated upload.
    pub page_count: u32,
    /// Number of `<img>` tags found in every extracted HTML document.
    pub embedded_images: usize,
    pub caption: String,
    pub transcript: String,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            language: "en".into(),
            archive_members: vec![
                ("readme.txt".into(), DocType::Text),
                ("diagram.png".into(), DocType::Image),
                ("notes.txt".into(), DocType::Text),
            ],
            page_count: 25,
            embedded_images: 0,
            caption: "A diagram with two boxes.".into(),
            transcript: "Welcome to the meeting. Let us begin.".into(),
        }
    }
}

impl SimulationProfile {
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_archive_members(mut self, members: Vec<(String, DocType)>) -> Self {
        self.archive_members = members;
        self
    }

    pub fn with_page_count(mut self, pages: u32) -> Self {
        self.page_count = pages;
        self
    }

    pub fn with_embedded_images(mut self, count: usize) -> Self {
        self.embedded_images = count;
        self
    }
}

/// Handler that succeeds with a simulated output for its job type.
pub struct SimulatedHandler {
    job_type: JobType,
    profile: Arc<SimulationProfile>,
}

impl SimulatedHandler {
    pub fn new(job_type: JobType, profile: Arc<SimulationProfile>) -> Self {
        Self { job_type, profile }
    }

    /// One simulated handler per job type.
    pub fn all(profile: SimulationProfile) -> Vec<Box<dyn JobHandler>> {
        let profile = Arc::new(profile);
        JobType::ALL
            .iter()
            .map(|jt| Box::new(Self::new(*jt, profile.clone())) as Box<dyn JobHandler>)
            .collect()
    }
}

#[async_trait]
impl JobHandler for SimulatedHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let output = simulate(ctx.input(), &self.profile);
        ctx.report_progress(100, Some("simulated"));
        JobResult::Success(output)
    }
}

/// Handler that always fails.
pub struct FailingHandler {
    job_type: JobType,
    message: String,
}

impl FailingHandler {
    pub fn new(job_type: JobType, message: impl Into<String>) -> Self {
        Self {
            job_type,
            message: message.into(),
        }
    }
}

#[async_trait]
impl JobHandler for FailingHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Failed(self.message.clone())
    }
}

fn simulate(input: &JobInput, profile: &SimulationProfile) -> JobOutput {
    match input {
        JobInput::SdocInit(i) => JobOutput::SdocInit(SdocInitOutput {
            doctype: i.doctype,
            file_path: i.file_path.clone(),
            mime_type: None,
        }),
        JobInput::ExtractArchive(i) => {
            let root = i.archive_path.with_extension("");
            JobOutput::ExtractArchive(ExtractArchiveOutput {
                files: profile
                    .archive_members
                    .iter()
                    .map(|(name, doctype)| ExtractedFile {
                        path: root.join(name),
                        doctype: *doctype,
                    })
                    .collect(),
            })
        }
        JobInput::ChunkDocument(i) => {
            let per_chunk = i.pages_per_chunk.max(1);
            let stem = file_stem(&i.file_path);
            let chunks = (0..profile.page_count.div_ceil(per_chunk).max(1))
                .map(|n| {
                    let first_page = n * per_chunk + 1;
                    let last_page = ((n + 1) * per_chunk).min(profile.page_count.max(1));
                    DocumentChunk {
                        path: i
                            .file_path
                            .with_file_name(format!("{stem}_p{first_page}-{last_page}.pdf")),
                        first_page,
                        last_page,
                    }
                })
                .collect();
            JobOutput::ChunkDocument(ChunkDocumentOutput {
                folder_id: Some(new_v7()),
                chunks,
            })
        }
        JobInput::ExtractHtml(i) => {
            let stem = file_stem(&i.file_path);
            let images: Vec<PathBuf> = (0..profile.embedded_images)
                .map(|n| i.file_path.with_file_name(format!("{stem}_img{n}.png")))
                .collect();
            let mut html = format!("<p>Simulated content of {}.</p>", stem);
            for image in &images {
                html.push_str(&format!("<img src=\"{}\">", image.display()));
            }
            JobOutput::ExtractHtml(ExtractHtmlOutput {
                html,
                embedded_images: images,
            })
        }
        JobInput::ExtractPlainText(i) => JobOutput::ExtractPlainText(ExtractPlainTextOutput {
            text: strip_tags(&i.html),
            html: i.html.clone(),
        }),
        JobInput::DetectLanguage(_) => JobOutput::DetectLanguage(DetectLanguageOutput {
            language: profile.language.clone(),
        }),
        JobInput::Spacy(i) => JobOutput::Spacy(SpacyOutput {
            sentences: i
                .text
                .split_terminator('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            token_count: i.text.split_whitespace().count(),
        }),
        JobInput::HtmlMapping(i) => JobOutput::HtmlMapping(HtmlMappingOutput {
            mapped_annotations: strip_tags(&i.html).split_whitespace().count(),
        }),
        JobInput::EsIndex(i) => JobOutput::EsIndex(EsIndexOutput {
            index: format!("project-{}", i.sdoc.project_id),
        }),
        JobInput::SentenceEmbedding(i) => {
            JobOutput::SentenceEmbedding(SentenceEmbeddingOutput {
                embedded_sentences: i.sentences.len(),
            })
        }
        JobInput::ImageCaption(_) => JobOutput::ImageCaption(ImageCaptionOutput {
            caption: profile.caption.clone(),
        }),
        JobInput::ImageEmbedding(_) => {
            JobOutput::ImageEmbedding(EmbeddingOutput { dimensions: 512 })
        }
        JobInput::ImageMetadata(i) => JobOutput::ImageMetadata(ImageMetadataOutput {
            width: 640,
            height: 480,
            metadata: BTreeMap::from([("source".to_string(), i.file_path.display().to_string())]),
        }),
        JobInput::ImageThumbnail(i) => JobOutput::ImageThumbnail(thumbnail(&i.file_path)),
        JobInput::ImageObjectDetection(_) => {
            JobOutput::ImageObjectDetection(ObjectDetectionOutput {
                objects: vec![DetectedObject {
                    label: "box".into(),
                    confidence: 0.9,
                }],
            })
        }
        JobInput::AudioMetadata(_) => JobOutput::AudioMetadata(AudioMetadataOutput {
            duration_secs: 60.0,
            metadata: BTreeMap::new(),
        }),
        JobInput::AudioThumbnail(i) => JobOutput::AudioThumbnail(thumbnail(&i.file_path)),
        JobInput::AudioTranscription(_) => {
            JobOutput::AudioTranscription(AudioTranscriptionOutput {
                html: format!("<p>{}</p>", profile.transcript),
            })
        }
        JobInput::VideoMetadata(_) => JobOutput::VideoMetadata(VideoMetadataOutput {
            duration_secs: 120.0,
            width: 1280,
            height: 720,
        }),
        JobInput::VideoThumbnail(i) => JobOutput::VideoThumbnail(thumbnail(&i.file_path)),
        JobInput::VideoAudioExtraction(i) => {
            JobOutput::VideoAudioExtraction(VideoAudioExtractionOutput {
                audio_path: i.file_path.with_extension("wav"),
            })
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".into())
}

fn thumbnail(path: &Path) -> ThumbnailOutput {
    ThumbnailOutput {
        thumbnail_path: path.with_file_name(format!("{}_thumb.jpg", file_stem(path))),
    }
}

fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// HARNESS
// =============================================================================

/// One job run by the harness.
#[derive(Debug, Clone)]
pub struct Executed {
    pub request: JobRequest,
    pub completion: Completion,
    pub report: DispatchReport,
}

/// Deterministic end-to-end driver over the in-memory store.
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<InMemoryDocumentStore>,
    pub executor: Arc<RecordingExecutor>,
    pub ingestor: Ingestor,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl Harness {
    /// A harness with a simulated handler for every job type.
    pub fn new(config: GraphConfig, profile: SimulationProfile) -> Result<Self> {
        let store = Arc::new(InMemoryDocumentStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        let table = Arc::new(ingestion_graph(&config)?);
        let dispatcher = Arc::new(Dispatcher::new(table, store.clone(), executor.clone()));
        let handlers = SimulatedHandler::all(profile)
            .into_iter()
            .map(|h| (h.job_type(), Arc::from(h)))
            .collect();
        Ok(Self {
            ingestor: Ingestor::new(dispatcher.clone(), config),
            dispatcher,
            store,
            executor,
            handlers,
        })
    }

    /// Replace the handler for its job type.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.job_type(), Arc::new(handler));
        self
    }

    /// Run the oldest queued job and report it. `None` when idle.
    pub async fn step(&self) -> Result<Option<Executed>> {
        let Some(request) = self.executor.pop().await else {
            return Ok(None);
        };
        let completion = match self.handlers.get(&request.job_type) {
            Some(handler) => match handler.execute(JobContext::new(request.clone())).await {
                JobResult::Success(output) => Completion::Succeeded(output),
                JobResult::Failed(e) | JobResult::Retry(e) => Completion::Failed(e),
            },
            None => Completion::Failed(format!("No handler for job type: {}", request.job_type)),
        };
        let report = self
            .dispatcher
            .on_job_finished(
                request.job_id,
                request.job_type,
                &request.input,
                completion.clone(),
            )
            .await?;
        Ok(Some(Executed {
            request,
            completion,
            report,
        }))
    }

    /// Run queued jobs, including every follow-up, until nothing is left.
    pub async fn run_until_idle(&self) -> Result<Vec<Executed>> {
        let mut executed = Vec::new();
        while let Some(step) = self.step().await? {
            executed.push(step);
        }
        Ok(executed)
    }
}
