//! Job contract registry.
//!
//! Static lookup tables: which payload types each job type accepts and
//! produces, and which job types a document of each doctype must accumulate
//! before it is finished. Nothing here holds state.

use crate::error::{Error, Result};
use crate::models::{DocType, JobType};
use crate::payloads::{JobInput, JobOutput};

/// Shared text sub-graph every modality eventually runs through.
const TEXT_SUBGRAPH: [JobType; 6] = [
    JobType::ExtractPlainText,
    JobType::DetectLanguage,
    JobType::Spacy,
    JobType::HtmlMapping,
    JobType::EsIndex,
    JobType::SentenceEmbedding,
];

const TEXT_EXPECTED: [JobType; 7] = [
    JobType::ExtractHtml,
    TEXT_SUBGRAPH[0],
    TEXT_SUBGRAPH[1],
    TEXT_SUBGRAPH[2],
    TEXT_SUBGRAPH[3],
    TEXT_SUBGRAPH[4],
    TEXT_SUBGRAPH[5],
];

const IMAGE_EXPECTED: [JobType; 11] = [
    JobType::ImageCaption,
    JobType::ImageEmbedding,
    JobType::ImageMetadata,
    JobType::ImageThumbnail,
    JobType::ImageObjectDetection,
    TEXT_SUBGRAPH[0],
    TEXT_SUBGRAPH[1],
    TEXT_SUBGRAPH[2],
    TEXT_SUBGRAPH[3],
    TEXT_SUBGRAPH[4],
    TEXT_SUBGRAPH[5],
];

const AUDIO_EXPECTED: [JobType; 9] = [
    JobType::AudioMetadata,
    JobType::AudioThumbnail,
    JobType::AudioTranscription,
    TEXT_SUBGRAPH[0],
    TEXT_SUBGRAPH[1],
    TEXT_SUBGRAPH[2],
    TEXT_SUBGRAPH[3],
    TEXT_SUBGRAPH[4],
    TEXT_SUBGRAPH[5],
];

// Video documents transcribe their extracted soundtrack, so the
// transcription cell lives on the video document.
const VIDEO_EXPECTED: [JobType; 10] = [
    JobType::VideoMetadata,
    JobType::VideoThumbnail,
    JobType::VideoAudioExtraction,
    JobType::AudioTranscription,
    TEXT_SUBGRAPH[0],
    TEXT_SUBGRAPH[1],
    TEXT_SUBGRAPH[2],
    TEXT_SUBGRAPH[3],
    TEXT_SUBGRAPH[4],
    TEXT_SUBGRAPH[5],
];

/// Job types that must succeed for a document of `doctype` to be finished.
pub fn expected_jobs(doctype: DocType) -> &'static [JobType] {
    match doctype {
        DocType::Text => &TEXT_EXPECTED,
        DocType::Image => &IMAGE_EXPECTED,
        DocType::Audio => &AUDIO_EXPECTED,
        DocType::Video => &VIDEO_EXPECTED,
    }
}

/// Whether `job_type` owns a completion cell on documents of `doctype`.
pub fn is_tracked(job_type: JobType, doctype: DocType) -> bool {
    expected_jobs(doctype).contains(&job_type)
}

/// Declared payload type of one side of a job contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSchema {
    pub job_type: JobType,
    pub type_name: &'static str,
}

/// Declared input type of `job_type`.
pub fn input_schema(job_type: JobType) -> PayloadSchema {
    let type_name = match job_type {
        JobType::SdocInit => "SdocInitInput",
        JobType::ExtractArchive => "ExtractArchiveInput",
        JobType::ChunkDocument => "ChunkDocumentInput",
        JobType::ExtractHtml => "ExtractHtmlInput",
        JobType::ExtractPlainText => "ExtractPlainTextInput",
        JobType::DetectLanguage => "DetectLanguageInput",
        JobType::Spacy => "SpacyInput",
        JobType::HtmlMapping => "HtmlMappingInput",
        JobType::EsIndex => "EsIndexInput",
        JobType::SentenceEmbedding => "SentenceEmbeddingInput",
        JobType::AudioTranscription => "AudioTranscriptionInput",
        JobType::ImageCaption
        | JobType::ImageEmbedding
        | JobType::ImageMetadata
        | JobType::ImageThumbnail
        | JobType::ImageObjectDetection
        | JobType::AudioMetadata
        | JobType::AudioThumbnail
        | JobType::VideoMetadata
        | JobType::VideoThumbnail
        | JobType::VideoAudioExtraction => "MediaInput",
    };
    PayloadSchema {
        job_type,
        type_name,
    }
}

/// Declared output type of `job_type`.
pub fn output_schema(job_type: JobType) -> PayloadSchema {
    let type_name = match job_type {
        JobType::SdocInit => "SdocInitOutput",
        JobType::ExtractArchive => "ExtractArchiveOutput",
        JobType::ChunkDocument => "ChunkDocumentOutput",
        JobType::ExtractHtml => "ExtractHtmlOutput",
        JobType::ExtractPlainText => "ExtractPlainTextOutput",
        JobType::DetectLanguage => "DetectLanguageOutput",
        JobType::Spacy => "SpacyOutput",
        JobType::HtmlMapping => "HtmlMappingOutput",
        JobType::EsIndex => "EsIndexOutput",
        JobType::SentenceEmbedding => "SentenceEmbeddingOutput",
        JobType::ImageCaption => "ImageCaptionOutput",
        JobType::ImageEmbedding => "EmbeddingOutput",
        JobType::ImageMetadata => "ImageMetadataOutput",
        JobType::ImageThumbnail | JobType::AudioThumbnail | JobType::VideoThumbnail => {
            "ThumbnailOutput"
        }
        JobType::ImageObjectDetection => "ObjectDetectionOutput",
        JobType::AudioMetadata => "AudioMetadataOutput",
        JobType::AudioTranscription => "AudioTranscriptionOutput",
        JobType::VideoMetadata => "VideoMetadataOutput",
        JobType::VideoAudioExtraction => "VideoAudioExtractionOutput",
    };
    PayloadSchema {
        job_type,
        type_name,
    }
}

/// Fail fast when `input` is not an instance of `job_type`'s declared input.
pub fn validate_input(job_type: JobType, input: &JobInput) -> Result<()> {
    if input.job_type() != job_type {
        return Err(Error::Contract(format!(
            "{} expects {}, got {}",
            job_type,
            input_schema(job_type).type_name,
            input_schema(input.job_type()).type_name,
        )));
    }
    Ok(())
}

/// Fail fast when `output` is not an instance of `job_type`'s declared output.
pub fn validate_output(job_type: JobType, output: &JobOutput) -> Result<()> {
    if output.job_type() != job_type {
        return Err(Error::Contract(format!(
            "{} produces {}, got {}",
            job_type,
            output_schema(job_type).type_name,
            output_schema(output.job_type()).type_name,
        )));
    }
    Ok(())
}
