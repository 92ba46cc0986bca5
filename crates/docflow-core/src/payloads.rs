//! Typed job payloads.
//!
//! Every job type has exactly one input struct and one output struct,
//! wrapped in the [`JobInput`] / [`JobOutput`] enums. On the wire the enums
//! are adjacently tagged (`{"job_type": "...", "payload": {...}}`) so a
//! payload pulled off a queue still carries its declared type.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{DocType, JobType, SdocRef};

// =============================================================================
// INPUTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdocInitInput {
    pub sdoc: SdocRef,
    pub doctype: DocType,
    pub file_path: PathBuf,
}

/// Archive extraction runs before any document exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractArchiveInput {
    pub project_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub archive_path: PathBuf,
}

/// Chunking runs before any document exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDocumentInput {
    pub project_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub file_path: PathBuf,
    pub pages_per_chunk: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractHtmlInput {
    pub sdoc: SdocRef,
    pub file_path: PathBuf,
}

/// Entry into the shared text sub-graph. `doctype` is the modality of the
/// document the HTML came from (caption, transcript or native text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractPlainTextInput {
    pub sdoc: SdocRef,
    pub doctype: DocType,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectLanguageInput {
    pub sdoc: SdocRef,
    pub doctype: DocType,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpacyInput {
    pub sdoc: SdocRef,
    pub doctype: DocType,
    pub language: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlMappingInput {
    pub sdoc: SdocRef,
    pub language: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsIndexInput {
    pub sdoc: SdocRef,
    pub doctype: DocType,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceEmbeddingInput {
    pub sdoc: SdocRef,
    pub language: String,
    pub sentences: Vec<String>,
}

/// Input shared by the per-file media jobs (image/audio/video leaves).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInput {
    pub sdoc: SdocRef,
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTranscriptionInput {
    pub sdoc: SdocRef,
    /// Audio for native audio documents, video for extracted soundtracks.
    pub doctype: DocType,
    pub audio_path: PathBuf,
}

/// Typed input of a job, one variant per [`JobType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", content = "payload", rename_all = "snake_case")]
pub enum JobInput {
    SdocInit(SdocInitInput),
    ExtractArchive(ExtractArchiveInput),
    ChunkDocument(ChunkDocumentInput),
    ExtractHtml(ExtractHtmlInput),
    ExtractPlainText(ExtractPlainTextInput),
    DetectLanguage(DetectLanguageInput),
    Spacy(SpacyInput),
    HtmlMapping(HtmlMappingInput),
    EsIndex(EsIndexInput),
    SentenceEmbedding(SentenceEmbeddingInput),
    ImageCaption(MediaInput),
    ImageEmbedding(MediaInput),
    ImageMetadata(MediaInput),
    ImageThumbnail(MediaInput),
    ImageObjectDetection(MediaInput),
    AudioMetadata(MediaInput),
    AudioThumbnail(MediaInput),
    AudioTranscription(AudioTranscriptionInput),
    VideoMetadata(MediaInput),
    VideoThumbnail(MediaInput),
    VideoAudioExtraction(MediaInput),
}

impl JobInput {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobInput::SdocInit(_) => JobType::SdocInit,
            JobInput::ExtractArchive(_) => JobType::ExtractArchive,
            JobInput::ChunkDocument(_) => JobType::ChunkDocument,
            JobInput::ExtractHtml(_) => JobType::ExtractHtml,
            JobInput::ExtractPlainText(_) => JobType::ExtractPlainText,
            JobInput::DetectLanguage(_) => JobType::DetectLanguage,
            JobInput::Spacy(_) => JobType::Spacy,
            JobInput::HtmlMapping(_) => JobType::HtmlMapping,
            JobInput::EsIndex(_) => JobType::EsIndex,
            JobInput::SentenceEmbedding(_) => JobType::SentenceEmbedding,
            JobInput::ImageCaption(_) => JobType::ImageCaption,
            JobInput::ImageEmbedding(_) => JobType::ImageEmbedding,
            JobInput::ImageMetadata(_) => JobType::ImageMetadata,
            JobInput::ImageThumbnail(_) => JobType::ImageThumbnail,
            JobInput::ImageObjectDetection(_) => JobType::ImageObjectDetection,
            JobInput::AudioMetadata(_) => JobType::AudioMetadata,
            JobInput::AudioThumbnail(_) => JobType::AudioThumbnail,
            JobInput::AudioTranscription(_) => JobType::AudioTranscription,
            JobInput::VideoMetadata(_) => JobType::VideoMetadata,
            JobInput::VideoThumbnail(_) => JobType::VideoThumbnail,
            JobInput::VideoAudioExtraction(_) => JobType::VideoAudioExtraction,
        }
    }

    /// Document reference, absent for jobs that precede document creation.
    pub fn sdoc(&self) -> Option<&SdocRef> {
        match self {
            JobInput::ExtractArchive(_) | JobInput::ChunkDocument(_) => None,
            JobInput::SdocInit(i) => Some(&i.sdoc),
            JobInput::ExtractHtml(i) => Some(&i.sdoc),
            JobInput::ExtractPlainText(i) => Some(&i.sdoc),
            JobInput::DetectLanguage(i) => Some(&i.sdoc),
            JobInput::Spacy(i) => Some(&i.sdoc),
            JobInput::HtmlMapping(i) => Some(&i.sdoc),
            JobInput::EsIndex(i) => Some(&i.sdoc),
            JobInput::SentenceEmbedding(i) => Some(&i.sdoc),
            JobInput::AudioTranscription(i) => Some(&i.sdoc),
            JobInput::ImageCaption(i)
            | JobInput::ImageEmbedding(i)
            | JobInput::ImageMetadata(i)
            | JobInput::ImageThumbnail(i)
            | JobInput::ImageObjectDetection(i)
            | JobInput::AudioMetadata(i)
            | JobInput::AudioThumbnail(i)
            | JobInput::VideoMetadata(i)
            | JobInput::VideoThumbnail(i)
            | JobInput::VideoAudioExtraction(i) => Some(&i.sdoc),
        }
    }

    pub fn document_id(&self) -> Option<Uuid> {
        self.sdoc().map(|s| s.document_id)
    }

    /// Wrap a [`MediaInput`] in the variant for `job_type`.
    pub fn media(job_type: JobType, media: MediaInput) -> Result<Self> {
        Ok(match job_type {
            JobType::ImageCaption => JobInput::ImageCaption(media),
            JobType::ImageEmbedding => JobInput::ImageEmbedding(media),
            JobType::ImageMetadata => JobInput::ImageMetadata(media),
            JobType::ImageThumbnail => JobInput::ImageThumbnail(media),
            JobType::ImageObjectDetection => JobInput::ImageObjectDetection(media),
            JobType::AudioMetadata => JobInput::AudioMetadata(media),
            JobType::AudioThumbnail => JobInput::AudioThumbnail(media),
            JobType::VideoMetadata => JobInput::VideoMetadata(media),
            JobType::VideoThumbnail => JobInput::VideoThumbnail(media),
            JobType::VideoAudioExtraction => JobInput::VideoAudioExtraction(media),
            other => {
                return Err(Error::Contract(format!(
                    "{} does not take a MediaInput",
                    other
                )))
            }
        })
    }

    pub fn project_id(&self) -> Uuid {
        match self {
            JobInput::ExtractArchive(i) => i.project_id,
            JobInput::ChunkDocument(i) => i.project_id,
            other => other
                .sdoc()
                .map(|s| s.project_id)
                .unwrap_or_else(Uuid::nil),
        }
    }

    /// Decode a JSON payload, failing fast if it is not the declared type.
    pub fn decode(job_type: JobType, payload: JsonValue) -> Result<Self> {
        let tagged = serde_json::json!({ "job_type": job_type.as_str(), "payload": payload });
        serde_json::from_value(tagged).map_err(|e| {
            Error::Contract(format!("Payload is not a valid {} input: {}", job_type, e))
        })
    }

    /// Encode the payload body (without the tag).
    pub fn to_payload(&self) -> Result<JsonValue> {
        let mut tagged = serde_json::to_value(self)?;
        tagged
            .get_mut("payload")
            .map(JsonValue::take)
            .ok_or_else(|| Error::Serialization("Tagged input has no payload".into()))
    }
}

// =============================================================================
// OUTPUTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdocInitOutput {
    pub doctype: DocType,
    pub file_path: PathBuf,
    pub mime_type: Option<String>,
}

/// One archive member with the doctype inferred for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub doctype: DocType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractArchiveOutput {
    pub files: Vec<ExtractedFile>,
}

/// One page range cut from a paginated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub path: PathBuf,
    pub first_page: u32,
    pub last_page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDocumentOutput {
    /// Folder grouping the chunks under their original file.
    pub folder_id: Option<Uuid>,
    pub chunks: Vec<DocumentChunk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractHtmlOutput {
    pub html: String,
    /// Image files referenced by `<img>` tags, already stored on disk.
    pub embedded_images: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractPlainTextOutput {
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectLanguageOutput {
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpacyOutput {
    pub sentences: Vec<String>,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlMappingOutput {
    pub mapped_annotations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsIndexOutput {
    pub index: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceEmbeddingOutput {
    pub embedded_sentences: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCaptionOutput {
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingOutput {
    pub dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadataOutput {
    pub width: u32,
    pub height: u32,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailOutput {
    pub thumbnail_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetectionOutput {
    pub objects: Vec<DetectedObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadataOutput {
    pub duration_secs: f64,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTranscriptionOutput {
    /// Transcript as HTML, one `<p>` per segment.
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadataOutput {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAudioExtractionOutput {
    pub audio_path: PathBuf,
}

/// Typed output of a successful job, one variant per [`JobType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", content = "payload", rename_all = "snake_case")]
pub enum JobOutput {
    SdocInit(SdocInitOutput),
    ExtractArchive(ExtractArchiveOutput),
    ChunkDocument(ChunkDocumentOutput),
    ExtractHtml(ExtractHtmlOutput),
    ExtractPlainText(ExtractPlainTextOutput),
    DetectLanguage(DetectLanguageOutput),
    Spacy(SpacyOutput),
    HtmlMapping(HtmlMappingOutput),
    EsIndex(EsIndexOutput),
    SentenceEmbedding(SentenceEmbeddingOutput),
    ImageCaption(ImageCaptionOutput),
    ImageEmbedding(EmbeddingOutput),
    ImageMetadata(ImageMetadataOutput),
    ImageThumbnail(ThumbnailOutput),
    ImageObjectDetection(ObjectDetectionOutput),
    AudioMetadata(AudioMetadataOutput),
    AudioThumbnail(ThumbnailOutput),
    AudioTranscription(AudioTranscriptionOutput),
    VideoMetadata(VideoMetadataOutput),
    VideoThumbnail(ThumbnailOutput),
    VideoAudioExtraction(VideoAudioExtractionOutput),
}

impl JobOutput {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobOutput::SdocInit(_) => JobType::SdocInit,
            JobOutput::ExtractArchive(_) => JobType::ExtractArchive,
            JobOutput::ChunkDocument(_) => JobType::ChunkDocument,
            JobOutput::ExtractHtml(_) => JobType::ExtractHtml,
            JobOutput::ExtractPlainText(_) => JobType::ExtractPlainText,
            JobOutput::DetectLanguage(_) => JobType::DetectLanguage,
            JobOutput::Spacy(_) => JobType::Spacy,
            JobOutput::HtmlMapping(_) => JobType::HtmlMapping,
            JobOutput::EsIndex(_) => JobType::EsIndex,
            JobOutput::SentenceEmbedding(_) => JobType::SentenceEmbedding,
            JobOutput::ImageCaption(_) => JobType::ImageCaption,
            JobOutput::ImageEmbedding(_) => JobType::ImageEmbedding,
            JobOutput::ImageMetadata(_) => JobType::ImageMetadata,
            JobOutput::ImageThumbnail(_) => JobType::ImageThumbnail,
            JobOutput::ImageObjectDetection(_) => JobType::ImageObjectDetection,
            JobOutput::AudioMetadata(_) => JobType::AudioMetadata,
            JobOutput::AudioThumbnail(_) => JobType::AudioThumbnail,
            JobOutput::AudioTranscription(_) => JobType::AudioTranscription,
            JobOutput::VideoMetadata(_) => JobType::VideoMetadata,
            JobOutput::VideoThumbnail(_) => JobType::VideoThumbnail,
            JobOutput::VideoAudioExtraction(_) => JobType::VideoAudioExtraction,
        }
    }

    /// Decode a JSON payload, failing fast if it is not the declared type.
    pub fn decode(job_type: JobType, payload: JsonValue) -> Result<Self> {
        let tagged = serde_json::json!({ "job_type": job_type.as_str(), "payload": payload });
        serde_json::from_value(tagged).map_err(|e| {
            Error::Contract(format!("Payload is not a valid {} output: {}", job_type, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sdoc() -> SdocRef {
        SdocRef {
            project_id: Uuid::nil(),
            document_id: Uuid::from_u128(7),
            folder_id: None,
        }
    }

    #[test]
    fn test_input_wire_format_is_adjacently_tagged() {
        let input = JobInput::DetectLanguage(DetectLanguageInput {
            sdoc: sdoc(),
            doctype: DocType::Text,
            text: "hello".into(),
            html: "<p>hello</p>".into(),
        });
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["job_type"], "detect_language");
        assert_eq!(value["payload"]["text"], "hello");
    }

    #[test]
    fn test_tag_names_match_job_type_strings() {
        let output = JobOutput::VideoAudioExtraction(VideoAudioExtractionOutput {
            audio_path: "a.wav".into(),
        });
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["job_type"], output.job_type().as_str());
    }

    #[test]
    fn test_decode_accepts_matching_payload() {
        let input = JobInput::decode(
            JobType::ExtractArchive,
            json!({"project_id": Uuid::nil(), "folder_id": null, "archive_path": "x.zip"}),
        )
        .unwrap();
        assert_eq!(input.job_type(), JobType::ExtractArchive);
        assert_eq!(input.document_id(), None);
    }

    #[test]
    fn test_decode_rejects_mismatched_payload_as_contract_violation() {
        let err = JobOutput::decode(JobType::DetectLanguage, json!({"caption": "a cat"}))
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_to_payload_strips_tag() {
        let input = JobInput::ImageThumbnail(MediaInput {
            sdoc: sdoc(),
            file_path: "cat.png".into(),
        });
        let payload = input.to_payload().unwrap();
        assert!(payload.get("job_type").is_none());
        let decoded = JobInput::decode(JobType::ImageThumbnail, payload).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_media_variants_share_payload_but_keep_job_type() {
        let media = MediaInput {
            sdoc: sdoc(),
            file_path: "clip.mp4".into(),
        };
        assert_eq!(
            JobInput::VideoThumbnail(media.clone()).job_type(),
            JobType::VideoThumbnail
        );
        assert_eq!(
            JobInput::VideoMetadata(media).document_id(),
            Some(Uuid::from_u128(7))
        );
    }

    #[test]
    fn test_media_constructor_rejects_non_media_jobs() {
        let media = MediaInput {
            sdoc: sdoc(),
            file_path: "talk.mp3".into(),
        };
        let input = JobInput::media(JobType::AudioThumbnail, media.clone()).unwrap();
        assert_eq!(input.job_type(), JobType::AudioThumbnail);

        let err = JobInput::media(JobType::AudioTranscription, media).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_project_id_for_pre_document_jobs() {
        let project_id = Uuid::from_u128(42);
        let input = JobInput::ChunkDocument(ChunkDocumentInput {
            project_id,
            folder_id: None,
            file_path: "book.pdf".into(),
            pages_per_chunk: 10,
        });
        assert_eq!(input.project_id(), project_id);
        assert!(input.sdoc().is_none());
    }
}
