//! Core data model: request, processing context, tiles and extraction
//! artifacts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::core::config::ExtractionOptions;
use crate::error::DocsiftError;

/// Internal row marker: global tile index the row was extracted from.
pub const TILE_INDEX_KEY: &str = "_tileIndex";
/// Internal row marker: page index the row was extracted from.
pub const PAGE_INDEX_KEY: &str = "_pageIndex";
/// Internal row marker: slice index within the page.
pub const SLICE_INDEX_KEY: &str = "_sliceIndex";
/// Internal row marker: the IBAN was replaced from an OCR candidate.
pub const OCR_CORRECTED_KEY: &str = "_ocrCorrected";
/// Internal row marker: residual validation failure category.
pub const VALIDATION_ISSUE_KEY: &str = "_validationIssue";
/// Internal row marker: human-readable residual validation details.
pub const VALIDATION_DETAILS_KEY: &str = "_validationDetails";

/// Document type tag selecting schema, prompts, dedup keys and validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "invoice")]
    Invoice,
    #[serde(rename = "bankStatement")]
    BankStatement,
    #[serde(rename = "loanContract")]
    LoanContract,
    #[serde(rename = "drawdown")]
    Drawdown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::BankStatement => "bankStatement",
            DocumentType::LoanContract => "loanContract",
            DocumentType::Drawdown => "drawdown",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An extraction request as handed over by the inbound surface.
///
/// Immutable for the lifetime of one pipeline run.
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    /// Raw document bytes.
    pub file: bytes::Bytes,
    /// Declared MIME type of `file`.
    pub mime_type: String,
    pub doc_type: DocumentType,
    /// Extraction schema; `None` falls back to the registry default.
    pub schema: Option<Value>,
    pub options: ExtractionOptions,
}

impl DocumentRequest {
    /// Validate the request shape before constructing a context.
    ///
    /// # Errors
    ///
    /// [`DocsiftError::BadRequest`] for an empty file or blank MIME type.
    pub fn validate(&self) -> crate::Result<()> {
        if self.file.is_empty() {
            return Err(DocsiftError::bad_request("request file is empty"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(DocsiftError::bad_request("request is missing a MIME type"));
        }
        Ok(())
    }

    /// The schema in effect for this request: custom override, explicit
    /// schema, or the registry default.
    pub fn effective_schema(&self) -> Value {
        if let Some(custom) = &self.options.custom_schema {
            return custom.clone();
        }
        if let Some(schema) = &self.schema {
            return schema.clone();
        }
        crate::schema::default_schema(self.doc_type).clone()
    }
}

/// One normalised page image produced by Preprocess.
#[derive(Clone)]
pub struct PageImage {
    /// Encoded image bytes (JPEG for rendered PDF pages; the original bytes
    /// for image uploads).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// A header-plus-slice pair (or whole page) forming one model call payload.
#[derive(Clone)]
pub struct Tile {
    pub page_index: usize,
    pub slice_index: usize,
    /// Monotonic id correlating extracted rows back to their source tile.
    pub global_index: usize,
    /// Ordered model payload; header first when tiled, then the slice.
    pub images: Vec<Vec<u8>>,
    pub is_tiled: bool,
    /// Raw slice bytes, retained only when debug dumping is active.
    pub raw_slice: Option<Vec<u8>>,
    /// Raw header bytes, retained only when debug dumping is active.
    pub raw_header: Option<Vec<u8>>,
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("page_index", &self.page_index)
            .field("slice_index", &self.slice_index)
            .field("global_index", &self.global_index)
            .field("payload_images", &self.images.len())
            .field("is_tiled", &self.is_tiled)
            .finish()
    }
}

/// Output of one model call during Extract.
#[derive(Debug, Clone)]
pub struct TileExtraction {
    /// Parsed JSON object returned by the backend.
    pub data: Value,
    /// Backend response id, when the transport exposes one.
    pub response_id: Option<String>,
    /// Global index of the source tile; `None` for whole-document calls.
    pub tile_index: Option<usize>,
}

/// OCR output for a single page image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrArtifact {
    pub text: String,
    /// Mean word confidence in 0..1.
    pub confidence: f64,
    pub word_count: usize,
}

/// Separator placed between page texts in the joined OCR document text.
pub const OCR_PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Mutable per-run metadata: OCR artifacts, timings and counters.
#[derive(Debug, Default)]
pub struct RunMetadata {
    /// Per-page OCR artifacts, in page order. Pages whose OCR failed hold
    /// `None`.
    pub ocr_pages: Vec<Option<OcrArtifact>>,
    /// Concatenated OCR text with page separators; `None` when the OCR
    /// pre-pass did not run or produced nothing.
    pub ocr_text: Option<String>,
    /// Per-stage wall-clock durations in execution order.
    pub stage_timings: Vec<(&'static str, Duration)>,
    pub tiles_built: usize,
    pub tiles_dropped: usize,
    pub retries: usize,
    /// A targeted model re-verification pass ran during validation/repair.
    pub reverified: bool,
}

/// Linear pipeline progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Created,
    Preprocess,
    Ocr,
    Tiling,
    Extract,
    Aggregate,
    Validate,
    Cleanup,
    Emitted,
    Failed,
}

/// Mutable single-owner state threaded through the pipeline stages.
///
/// The context is created per request, owned by exactly one stage at a time
/// and discarded after emission; intra-stage fan-out joins before the stage
/// returns, so no locking is needed.
#[derive(Debug)]
pub struct ProcessingContext {
    pub request: DocumentRequest,
    /// Ordered page images; non-empty after a successful Preprocess.
    pub images: Vec<PageImage>,
    /// Tiles ordered by `(page_index, slice_index)` ascending.
    pub tiles: Vec<Tile>,
    /// Extraction outputs in `global_index` order.
    pub extractions: Vec<TileExtraction>,
    /// Final aggregated and validated result.
    pub result: Option<Value>,
    pub metadata: RunMetadata,
    /// First fatal error; set once, short-circuits remaining stages.
    pub error: Option<DocsiftError>,
    /// All fatal error strings accumulated during the run.
    pub errors: Vec<String>,
    /// Non-fatal degradations (dropped tiles, skipped OCR, ...).
    pub warnings: Vec<String>,
    pub state: StageState,
}

impl ProcessingContext {
    pub fn new(request: DocumentRequest) -> Self {
        Self {
            request,
            images: Vec::new(),
            tiles: Vec::new(),
            extractions: Vec::new(),
            result: None,
            metadata: RunMetadata::default(),
            error: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            state: StageState::Created,
        }
    }

    pub fn record_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Record a fatal error and transition to `Failed`. The first fatal
    /// error is kept as `error`; later ones only accumulate in `errors`.
    pub fn record_fatal(&mut self, error: DocsiftError) {
        tracing::error!("pipeline failed: {error}");
        self.errors.push(error.to_string());
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.state = StageState::Failed;
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Consume the context into the caller-facing outcome.
    pub fn into_outcome(self) -> PipelineOutcome {
        match self.error {
            Some(error) => PipelineOutcome::Failed(ErrorPayload {
                error: error.to_string(),
                kind: error.kind().to_string(),
                status: error.status_code(),
                details: self.errors,
                warnings: self.warnings,
            }),
            None => PipelineOutcome::Completed {
                result: self.result.unwrap_or(Value::Null),
                warnings: self.warnings,
            },
        }
    }
}

/// Terminal state of a pipeline run.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed { result: Value, warnings: Vec<String> },
    Failed(ErrorPayload),
}

/// Structured error payload emitted for failed runs.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    /// Machine-readable error kind.
    pub kind: String,
    /// HTTP status category (400 or 500).
    pub status: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
