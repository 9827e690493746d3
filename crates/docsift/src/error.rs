//! Error types for the extraction pipeline.

use crate::core::config::ModelProvider;

/// Provider name used for the OCR collaborator in transport and
/// configuration errors.
pub const OCR_PROVIDER: &str = "azure-ocr";

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DocsiftError>;

/// Unified error type for the extraction pipeline.
///
/// Variants map onto the caller-visible error kinds: request problems
/// surface as 400s, pipeline and backend failures as 500s. Transport and
/// timeout errors are retryable inside multi-tile dispatch and fatal in
/// single-call contexts.
#[derive(Debug, thiserror::Error)]
pub enum DocsiftError {
    /// The request itself is unusable (missing file, bad schema, ...).
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// The declared MIME type is not one the pipeline accepts.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Required environment for the selected backend is absent.
    #[error("backend '{provider}' is not configured: {message}")]
    BackendUnconfigured { provider: String, message: String },

    /// Non-2xx status or network failure from a model or OCR endpoint.
    #[error("transport error from '{provider}'{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transport {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// A response body could not be interpreted as the expected JSON.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A per-call deadline elapsed.
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// An OCR-dependent stage ran without a configured OCR collaborator.
    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    /// Decoding, encoding or slicing an image failed.
    #[error("image processing error: {message}")]
    ImageProcessing { message: String },

    /// Rasterising a PDF failed.
    #[error("PDF rendering error: {message}")]
    PdfRender { message: String },

    /// Configuration or option values failed validation.
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DocsiftError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        DocsiftError::BadRequest {
            message: message.into(),
        }
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        DocsiftError::Parse {
            message: message.into(),
        }
    }

    pub fn image_processing(message: impl Into<String>) -> Self {
        DocsiftError::ImageProcessing {
            message: message.into(),
        }
    }

    pub fn pdf_render(message: impl Into<String>) -> Self {
        DocsiftError::PdfRender {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DocsiftError::Validation {
            message: message.into(),
        }
    }

    pub fn unconfigured(provider: ModelProvider, message: impl Into<String>) -> Self {
        DocsiftError::BackendUnconfigured {
            provider: provider.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn transport(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        DocsiftError::Transport {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Whether a retry of the failed call could plausibly succeed.
    ///
    /// Only transport-level failures and timeouts qualify; everything else is
    /// deterministic and retrying would waste the backend quota.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DocsiftError::Transport { .. } | DocsiftError::Timeout { .. })
    }

    /// Stable machine-readable kind string for the error payload.
    pub fn kind(&self) -> &'static str {
        match self {
            DocsiftError::BadRequest { .. } => "BadRequest",
            DocsiftError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            DocsiftError::BackendUnconfigured { .. } => "BackendUnconfigured",
            DocsiftError::Transport { .. } => "BackendTransport",
            DocsiftError::Parse { .. } => "BackendParse",
            DocsiftError::Timeout { .. } => "Timeout",
            DocsiftError::OcrUnavailable(_) => "OCRUnavailable",
            DocsiftError::ImageProcessing { .. } => "ImageProcessingError",
            DocsiftError::PdfRender { .. } => "PdfRenderError",
            DocsiftError::Validation { .. } => "ValidationError",
            DocsiftError::Io(_) => "IOError",
            DocsiftError::Serialization(_) => "SerializationError",
            DocsiftError::Other(_) => "Error",
        }
    }

    /// HTTP status category the caller should map this error to.
    ///
    /// 400 covers invalid requests and OCR-required-but-unavailable
    /// (including an unconfigured OCR collaborator); every other pipeline
    /// failure is a 500.
    pub fn status_code(&self) -> u16 {
        match self {
            DocsiftError::BadRequest { .. }
            | DocsiftError::UnsupportedMediaType(_)
            | DocsiftError::Validation { .. }
            | DocsiftError::OcrUnavailable(_) => 400,
            DocsiftError::BackendUnconfigured { provider, .. } if provider == OCR_PROVIDER => 400,
            _ => 500,
        }
    }
}
