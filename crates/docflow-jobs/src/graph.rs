//! The ingestion graph: every edge between docflow job types.

use docflow_core::defaults::{PAGES_PER_CHUNK, SUPPORTED_LANGUAGES};
use docflow_core::payloads::{
    AudioTranscriptionInput, DetectLanguageInput, EsIndexInput, ExtractHtmlInput,
    ExtractPlainTextInput, HtmlMappingInput, MediaInput, SdocInitInput, SentenceEmbeddingInput,
    SpacyInput,
};
use docflow_core::{
    DocType, Document, Error, JobInput, JobOutput, JobType, NewDocument, Result,
};

use crate::transitions::{
    Direct, Edge, LoopItem, Spawn, TransitionContext, TransitionTable,
};

/// Tunables that shape the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Languages with an NLP model; other languages end at language detection.
    pub supported_languages: Vec<String>,
    /// Page count per chunk when splitting paginated uploads.
    pub pages_per_chunk: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            supported_languages: SUPPORTED_LANGUAGES.iter().map(|l| l.to_string()).collect(),
            pages_per_chunk: PAGES_PER_CHUNK,
        }
    }
}

impl GraphConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let supported_languages = std::env::var("DOCFLOW_SUPPORTED_LANGUAGES")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|l| l.trim().to_lowercase())
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|langs| !langs.is_empty())
            .unwrap_or_else(|| Self::default().supported_languages);

        let pages_per_chunk = std::env::var("DOCFLOW_PAGES_PER_CHUNK")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(PAGES_PER_CHUNK)
            .max(1);

        Self {
            supported_languages,
            pages_per_chunk,
        }
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_languages = languages
            .into_iter()
            .map(|l| Into::<String>::into(l).to_lowercase())
            .collect();
        self
    }

    pub fn with_pages_per_chunk(mut self, pages: u32) -> Self {
        self.pages_per_chunk = pages.max(1);
        self
    }
}

/// Build and validate the ingestion transition table.
pub fn ingestion_graph(config: &GraphConfig) -> Result<TransitionTable> {
    if config.supported_languages.is_empty() {
        return Err(Error::Config(
            "At least one supported language is required".into(),
        ));
    }

    let media = |target| Direct::new(target, media_job);
    let spacy_cases = config
        .supported_languages
        .iter()
        .map(|lang| (lang.clone(), vec![Direct::new(JobType::Spacy, spacy)]));

    let table = TransitionTable::builder(JobType::SdocInit, sdoc_init)
        // Fan-out into new documents
        .on(
            JobType::ExtractArchive,
            Edge::loop_over(
                "archive_members",
                archive_members,
                vec![Direct::new(JobType::SdocInit, create_member_document)],
            ),
        )
        .on(
            JobType::ChunkDocument,
            Edge::loop_over(
                "chunks",
                chunks,
                vec![Direct::new(JobType::SdocInit, create_chunk_document)],
            ),
        )
        // Per-modality entry
        .on(
            JobType::SdocInit,
            Edge::switch(
                "doctype",
                initialized_doctype,
                [
                    (
                        DocType::Text.as_str(),
                        vec![Direct::new(JobType::ExtractHtml, extract_html)],
                    ),
                    (
                        DocType::Image.as_str(),
                        vec![
                            media(JobType::ImageMetadata),
                            media(JobType::ImageThumbnail),
                            media(JobType::ImageEmbedding),
                            media(JobType::ImageObjectDetection),
                            media(JobType::ImageCaption),
                        ],
                    ),
                    (
                        DocType::Audio.as_str(),
                        vec![
                            media(JobType::AudioMetadata),
                            media(JobType::AudioThumbnail),
                            Direct::new(JobType::AudioTranscription, transcribe_upload),
                        ],
                    ),
                    (
                        DocType::Video.as_str(),
                        vec![
                            media(JobType::VideoMetadata),
                            media(JobType::VideoThumbnail),
                            media(JobType::VideoAudioExtraction),
                        ],
                    ),
                ],
            ),
        )
        .on(
            JobType::ExtractHtml,
            Edge::direct(JobType::ExtractPlainText, plain_text_from_html),
        )
        .on(
            JobType::ExtractHtml,
            Edge::loop_over(
                "embedded_images",
                embedded_images,
                vec![Direct::new(JobType::SdocInit, create_embedded_image_document)],
            ),
        )
        // Modalities joining the text sub-graph
        .on(
            JobType::ImageCaption,
            Edge::direct(JobType::ExtractPlainText, plain_text_from_caption),
        )
        .on(
            JobType::AudioTranscription,
            Edge::direct(JobType::ExtractPlainText, plain_text_from_transcript),
        )
        .on(
            JobType::VideoAudioExtraction,
            Edge::direct(JobType::AudioTranscription, transcribe_soundtrack),
        )
        // Text sub-graph
        .on(
            JobType::ExtractPlainText,
            Edge::direct(JobType::DetectLanguage, detect_language),
        )
        .on(JobType::ExtractPlainText, Edge::direct(JobType::EsIndex, es_index))
        .on(
            JobType::DetectLanguage,
            Edge::switch("language", detected_language, spacy_cases)
                .or_abandon("language not supported"),
        )
        .on(JobType::Spacy, Edge::direct(JobType::HtmlMapping, html_mapping))
        .on(
            JobType::Spacy,
            Edge::direct(JobType::SentenceEmbedding, sentence_embedding),
        )
        .terminal([
            JobType::HtmlMapping,
            JobType::EsIndex,
            JobType::SentenceEmbedding,
            JobType::ImageEmbedding,
            JobType::ImageMetadata,
            JobType::ImageThumbnail,
            JobType::ImageObjectDetection,
            JobType::AudioMetadata,
            JobType::AudioThumbnail,
            JobType::VideoMetadata,
            JobType::VideoThumbnail,
        ])
        .build()?;

    table.validate()?;
    Ok(table)
}

// =============================================================================
// ENTRY
// =============================================================================

fn sdoc_init(document: &Document) -> Result<JobInput> {
    Ok(JobInput::SdocInit(SdocInitInput {
        sdoc: document.sdoc_ref(),
        doctype: document.doctype,
        file_path: document.file_path.clone(),
    }))
}

// =============================================================================
// FAN-OUT
// =============================================================================

fn archive_members(_: &JobInput, output: &JobOutput) -> Result<Vec<LoopItem>> {
    match output {
        JobOutput::ExtractArchive(out) => Ok(out
            .files
            .iter()
            .cloned()
            .map(LoopItem::ArchiveMember)
            .collect()),
        other => Err(unexpected_output("archive_members", other)),
    }
}

fn create_member_document(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let JobInput::ExtractArchive(input) = ctx.input else {
        return Err(ctx.unexpected("input"));
    };
    let LoopItem::ArchiveMember(file) = ctx.loop_item()? else {
        return Err(ctx.unexpected("loop item"));
    };
    Ok(Spawn::CreateDocument(
        NewDocument::new(input.project_id, file.doctype, file.path.clone())
            .in_folder(input.folder_id),
    ))
}

fn chunks(_: &JobInput, output: &JobOutput) -> Result<Vec<LoopItem>> {
    match output {
        JobOutput::ChunkDocument(out) => {
            Ok(out.chunks.iter().cloned().map(LoopItem::Chunk).collect())
        }
        other => Err(unexpected_output("chunks", other)),
    }
}

fn create_chunk_document(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::ChunkDocument(input), JobOutput::ChunkDocument(output)) =
        (ctx.input, ctx.output)
    else {
        return Err(ctx.unexpected("payload"));
    };
    let LoopItem::Chunk(chunk) = ctx.loop_item()? else {
        return Err(ctx.unexpected("loop item"));
    };
    Ok(Spawn::CreateDocument(
        NewDocument::new(input.project_id, DocType::Text, chunk.path.clone())
            .in_folder(output.folder_id.or(input.folder_id)),
    ))
}

fn embedded_images(_: &JobInput, output: &JobOutput) -> Result<Vec<LoopItem>> {
    match output {
        JobOutput::ExtractHtml(out) => Ok(out
            .embedded_images
            .iter()
            .cloned()
            .map(LoopItem::EmbeddedImage)
            .collect()),
        other => Err(unexpected_output("embedded_images", other)),
    }
}

fn create_embedded_image_document(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let JobInput::ExtractHtml(input) = ctx.input else {
        return Err(ctx.unexpected("input"));
    };
    let LoopItem::EmbeddedImage(path) = ctx.loop_item()? else {
        return Err(ctx.unexpected("loop item"));
    };
    Ok(Spawn::CreateDocument(
        NewDocument::new(input.sdoc.project_id, DocType::Image, path.clone())
            .in_folder(input.sdoc.folder_id),
    ))
}

// =============================================================================
// PER-MODALITY ENTRY
// =============================================================================

fn initialized_doctype(_: &JobInput, output: &JobOutput) -> Result<String> {
    match output {
        JobOutput::SdocInit(out) => Ok(out.doctype.as_str().to_string()),
        other => Err(unexpected_output("doctype", other)),
    }
}

fn extract_html(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::SdocInit(input), JobOutput::SdocInit(output)) = (ctx.input, ctx.output) else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::ExtractHtml(ExtractHtmlInput {
        sdoc: input.sdoc,
        file_path: output.file_path.clone(),
    })))
}

fn media_job(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::SdocInit(input), JobOutput::SdocInit(output)) = (ctx.input, ctx.output) else {
        return Err(ctx.unexpected("payload"));
    };
    let media = MediaInput {
        sdoc: input.sdoc,
        file_path: output.file_path.clone(),
    };
    JobInput::media(ctx.target, media).map(Spawn::Run)
}

fn transcribe_upload(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::SdocInit(input), JobOutput::SdocInit(output)) = (ctx.input, ctx.output) else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::AudioTranscription(
        AudioTranscriptionInput {
            sdoc: input.sdoc,
            doctype: DocType::Audio,
            audio_path: output.file_path.clone(),
        },
    )))
}

fn transcribe_soundtrack(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::VideoAudioExtraction(input), JobOutput::VideoAudioExtraction(output)) =
        (ctx.input, ctx.output)
    else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::AudioTranscription(
        AudioTranscriptionInput {
            sdoc: input.sdoc,
            doctype: DocType::Video,
            audio_path: output.audio_path.clone(),
        },
    )))
}

// =============================================================================
// INTO THE TEXT SUB-GRAPH
// =============================================================================

fn plain_text_from_html(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::ExtractHtml(input), JobOutput::ExtractHtml(output)) = (ctx.input, ctx.output)
    else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::ExtractPlainText(ExtractPlainTextInput {
        sdoc: input.sdoc,
        doctype: DocType::Text,
        html: output.html.clone(),
    })))
}

fn plain_text_from_caption(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::ImageCaption(input), JobOutput::ImageCaption(output)) = (ctx.input, ctx.output)
    else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::ExtractPlainText(ExtractPlainTextInput {
        sdoc: input.sdoc,
        doctype: DocType::Image,
        html: format!("<p>{}</p>", escape_html(&output.caption)),
    })))
}

fn plain_text_from_transcript(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::AudioTranscription(input), JobOutput::AudioTranscription(output)) =
        (ctx.input, ctx.output)
    else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::ExtractPlainText(ExtractPlainTextInput {
        sdoc: input.sdoc,
        doctype: input.doctype,
        html: output.html.clone(),
    })))
}

// =============================================================================
// TEXT SUB-GRAPH
// =============================================================================

fn detect_language(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::ExtractPlainText(input), JobOutput::ExtractPlainText(output)) =
        (ctx.input, ctx.output)
    else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::DetectLanguage(DetectLanguageInput {
        sdoc: input.sdoc,
        doctype: input.doctype,
        text: output.text.clone(),
        html: output.html.clone(),
    })))
}

fn es_index(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::ExtractPlainText(input), JobOutput::ExtractPlainText(output)) =
        (ctx.input, ctx.output)
    else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::EsIndex(EsIndexInput {
        sdoc: input.sdoc,
        doctype: input.doctype,
        text: output.text.clone(),
    })))
}

fn detected_language(_: &JobInput, output: &JobOutput) -> Result<String> {
    match output {
        JobOutput::DetectLanguage(out) => Ok(out.language.trim().to_lowercase()),
        other => Err(unexpected_output("language", other)),
    }
}

fn spacy(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::DetectLanguage(input), JobOutput::DetectLanguage(output)) =
        (ctx.input, ctx.output)
    else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::Spacy(SpacyInput {
        sdoc: input.sdoc,
        doctype: input.doctype,
        language: output.language.trim().to_lowercase(),
        text: input.text.clone(),
        html: input.html.clone(),
    })))
}

fn html_mapping(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let JobInput::Spacy(input) = ctx.input else {
        return Err(ctx.unexpected("input"));
    };
    Ok(Spawn::Run(JobInput::HtmlMapping(HtmlMappingInput {
        sdoc: input.sdoc,
        language: input.language.clone(),
        html: input.html.clone(),
    })))
}

fn sentence_embedding(ctx: &TransitionContext<'_>) -> Result<Spawn> {
    let (JobInput::Spacy(input), JobOutput::Spacy(output)) = (ctx.input, ctx.output) else {
        return Err(ctx.unexpected("payload"));
    };
    Ok(Spawn::Run(JobInput::SentenceEmbedding(
        SentenceEmbeddingInput {
            sdoc: input.sdoc,
            language: input.language.clone(),
            sentences: output.sentences.clone(),
        },
    )))
}

// =============================================================================
// HELPERS
// =============================================================================

fn unexpected_output(what: &str, output: &JobOutput) -> Error {
    Error::Contract(format!(
        "Cannot derive {} from a {} output",
        what,
        output.job_type()
    ))
}

/// Escape a caption before it is wrapped in `<p>`, so it reaches the text
/// sub-graph as markup-safe HTML.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
