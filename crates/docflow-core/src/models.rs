//! Core data models for docflow.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::FAILED_CELL_SENTINEL;
use crate::error::{Error, Result};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Type of job in the ingestion graph.
///
/// The set is closed: adding a member means adding its payload types, its
/// transition edges (or a terminal declaration) and, when it runs on a
/// document, its place in the expected-jobs table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    // ─── text ───
    /// Initialize a freshly created document
    SdocInit,
    /// Unpack an uploaded archive into member files
    ExtractArchive,
    /// Split a paginated document into page-range chunks
    ChunkDocument,
    /// Convert the source file to HTML
    ExtractHtml,
    /// Strip HTML down to plain text
    ExtractPlainText,
    /// Detect the language of the plain text
    DetectLanguage,
    /// NLP annotation (tokens, sentences, entities)
    Spacy,
    /// Map annotations back onto the HTML
    HtmlMapping,
    /// Full-text search indexing
    EsIndex,
    /// Sentence embeddings for vector search
    SentenceEmbedding,
    // ─── image ───
    /// Generate a caption for an image
    ImageCaption,
    /// Image embedding for vector search
    ImageEmbedding,
    /// Extract image metadata (dimensions, EXIF)
    ImageMetadata,
    /// Render an image thumbnail
    ImageThumbnail,
    /// Detect objects in an image
    ImageObjectDetection,
    // ─── audio ───
    /// Extract audio metadata (duration, codec)
    AudioMetadata,
    /// Render an audio waveform thumbnail
    AudioThumbnail,
    /// Transcribe speech to text
    AudioTranscription,
    // ─── video ───
    /// Extract video metadata (duration, resolution)
    VideoMetadata,
    /// Render a video thumbnail
    VideoThumbnail,
    /// Extract the audio track of a video
    VideoAudioExtraction,
}

impl JobType {
    /// Every job type, in declaration order.
    pub const ALL: [JobType; 21] = [
        JobType::SdocInit,
        JobType::ExtractArchive,
        JobType::ChunkDocument,
        JobType::ExtractHtml,
        JobType::ExtractPlainText,
        JobType::DetectLanguage,
        JobType::Spacy,
        JobType::HtmlMapping,
        JobType::EsIndex,
        JobType::SentenceEmbedding,
        JobType::ImageCaption,
        JobType::ImageEmbedding,
        JobType::ImageMetadata,
        JobType::ImageThumbnail,
        JobType::ImageObjectDetection,
        JobType::AudioMetadata,
        JobType::AudioThumbnail,
        JobType::AudioTranscription,
        JobType::VideoMetadata,
        JobType::VideoThumbnail,
        JobType::VideoAudioExtraction,
    ];

    /// Stable string form (database column values, CLI arguments).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SdocInit => "sdoc_init",
            JobType::ExtractArchive => "extract_archive",
            JobType::ChunkDocument => "chunk_document",
            JobType::ExtractHtml => "extract_html",
            JobType::ExtractPlainText => "extract_plain_text",
            JobType::DetectLanguage => "detect_language",
            JobType::Spacy => "spacy",
            JobType::HtmlMapping => "html_mapping",
            JobType::EsIndex => "es_index",
            JobType::SentenceEmbedding => "sentence_embedding",
            JobType::ImageCaption => "image_caption",
            JobType::ImageEmbedding => "image_embedding",
            JobType::ImageMetadata => "image_metadata",
            JobType::ImageThumbnail => "image_thumbnail",
            JobType::ImageObjectDetection => "image_object_detection",
            JobType::AudioMetadata => "audio_metadata",
            JobType::AudioThumbnail => "audio_thumbnail",
            JobType::AudioTranscription => "audio_transcription",
            JobType::VideoMetadata => "video_metadata",
            JobType::VideoThumbnail => "video_thumbnail",
            JobType::VideoAudioExtraction => "video_audio_extraction",
        }
    }

    /// Modality group this job type belongs to.
    pub fn modality(&self) -> DocType {
        match self {
            JobType::ImageCaption
            | JobType::ImageEmbedding
            | JobType::ImageMetadata
            | JobType::ImageThumbnail
            | JobType::ImageObjectDetection => DocType::Image,
            JobType::AudioMetadata | JobType::AudioThumbnail | JobType::AudioTranscription => {
                DocType::Audio
            }
            JobType::VideoMetadata | JobType::VideoThumbnail | JobType::VideoAudioExtraction => {
                DocType::Video
            }
            _ => DocType::Text,
        }
    }

    /// Jobs that run before any document exists (their output is new documents).
    pub fn precedes_document(&self) -> bool {
        matches!(self, JobType::ExtractArchive | JobType::ChunkDocument)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        JobType::ALL
            .into_iter()
            .find(|jt| jt.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown job type: {}", s)))
    }
}

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// Modality of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Text,
    Image,
    Audio,
    Video,
}

impl DocType {
    pub const ALL: [DocType; 4] = [DocType::Text, DocType::Image, DocType::Audio, DocType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Text => "text",
            DocType::Image => "image",
            DocType::Audio => "audio",
            DocType::Video => "video",
        }
    }

    /// Map a MIME type to a doctype. Returns `None` for unsupported types.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence {
            "text/html" | "text/plain" | "text/markdown" | "application/pdf"
            | "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/rtf" | "application/epub+zip" => Some(DocType::Text),
            m if m.starts_with("image/") => Some(DocType::Image),
            m if m.starts_with("audio/") => Some(DocType::Audio),
            m if m.starts_with("video/") => Some(DocType::Video),
            _ => None,
        }
    }

    /// Infer the doctype from a file extension. Returns `None` for unsupported files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" | "txt" | "md" | "pdf" | "doc" | "docx" | "rtf" | "epub" => {
                Some(DocType::Text)
            }
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" => Some(DocType::Image),
            "mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" | "opus" => Some(DocType::Audio),
            "mp4" | "mov" | "mkv" | "avi" | "webm" | "mpeg" | "mpg" => Some(DocType::Video),
            _ => None,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(DocType::Text),
            "image" => Ok(DocType::Image),
            "audio" => Ok(DocType::Audio),
            "video" => Ok(DocType::Video),
            other => Err(Error::InvalidInput(format!("Unknown doctype: {}", other))),
        }
    }
}

/// How an uploaded file enters the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Unpacked by archive extraction; members become documents.
    Archive,
    /// Split into page-range chunks; each chunk becomes a text document.
    Paginated,
    /// Becomes one document of the given type.
    Document(DocType),
}

impl UploadKind {
    /// Classify an upload by file name. Returns `None` for unsupported files.
    pub fn classify(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        const ARCHIVE_SUFFIXES: [&str; 5] = [".zip", ".tar", ".tar.gz", ".tgz", ".7z"];
        if ARCHIVE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return Some(UploadKind::Archive);
        }
        if name.ends_with(".pdf") {
            return Some(UploadKind::Paginated);
        }
        DocType::from_path(path).map(UploadKind::Document)
    }
}

// =============================================================================
// COMPLETION CELLS
// =============================================================================

/// State of one job type's cell in a document's completion vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    #[default]
    NotStarted,
    Succeeded,
    Failed,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::NotStarted => "not_started",
            CellStatus::Succeeded => "succeeded",
            CellStatus::Failed => "failed",
        }
    }

    /// Legacy numeric encoding: 0 pending, 1 succeeded, sentinel failed.
    pub fn as_i16(&self) -> i16 {
        match self {
            CellStatus::NotStarted => 0,
            CellStatus::Succeeded => 1,
            CellStatus::Failed => FAILED_CELL_SENTINEL,
        }
    }

    /// Decode the legacy numeric encoding; any negative value is a failure.
    pub fn from_i16(value: i16) -> Result<Self> {
        match value {
            0 => Ok(CellStatus::NotStarted),
            1 => Ok(CellStatus::Succeeded),
            v if v < 0 => Ok(CellStatus::Failed),
            v => Err(Error::Serialization(format!("Invalid cell value: {}", v))),
        }
    }
}

impl FromStr for CellStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_started" => Ok(CellStatus::NotStarted),
            "succeeded" => Ok(CellStatus::Succeeded),
            "failed" => Ok(CellStatus::Failed),
            other => Err(Error::Serialization(format!(
                "Invalid cell status: {}",
                other
            ))),
        }
    }
}

/// Outcome of a finished job as seen by the completion tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl From<Outcome> for CellStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Succeeded => CellStatus::Succeeded,
            Outcome::Failed => CellStatus::Failed,
        }
    }
}

/// Aggregate processing status derived from a completion vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Processing,
    Finished,
    Erroneous,
}

impl AggregateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateStatus::Processing => "processing",
            AggregateStatus::Finished => "finished",
            AggregateStatus::Erroneous => "erroneous",
        }
    }

    /// Finished and Erroneous are terminal for a document.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AggregateStatus::Processing)
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Reference to the document a job operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SdocRef {
    pub project_id: Uuid,
    pub document_id: Uuid,
    pub folder_id: Option<Uuid>,
}

/// Request to create a document (upload or fan-out child).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub project_id: Uuid,
    pub doctype: DocType,
    pub folder_id: Option<Uuid>,
    pub file_path: PathBuf,
}

impl NewDocument {
    pub fn new(project_id: Uuid, doctype: DocType, file_path: impl Into<PathBuf>) -> Self {
        Self {
            project_id,
            doctype,
            folder_id: None,
            file_path: file_path.into(),
        }
    }

    pub fn in_folder(mut self, folder_id: Option<Uuid>) -> Self {
        self.folder_id = folder_id;
        self
    }
}

/// An ingested document with its completion vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub doctype: DocType,
    pub folder_id: Option<Uuid>,
    pub file_path: PathBuf,
    pub completion: crate::completion::CompletionVector,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Aggregate status, recomputed from the completion vector.
    pub fn status(&self) -> AggregateStatus {
        self.completion.aggregate()
    }

    pub fn sdoc_ref(&self) -> SdocRef {
        SdocRef {
            project_id: self.project_id,
            document_id: self.id,
            folder_id: self.folder_id,
        }
    }
}
