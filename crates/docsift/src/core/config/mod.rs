//! Request options and runtime configuration.
//!
//! [`ExtractionOptions`] carries the per-request knobs in their wire shape
//! (camelCase keys); [`RuntimeConfig`] is the process-level environment
//! surface (API keys, endpoints, render parameters, timeouts).

mod env;

pub use env::{RenderConfig, RuntimeConfig};

use serde::{Deserialize, Serialize};

/// Model back-end selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelProvider {
    #[default]
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure-openai")]
    AzureOpenAi,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::Gemini => "gemini",
            ModelProvider::OpenAi => "openai",
            ModelProvider::AzureOpenAi => "azure-openai",
        }
    }

    /// Whether this provider consumes the original file bytes directly
    /// instead of per-page images.
    pub fn consumes_native_pdf(&self) -> bool {
        matches!(self, ModelProvider::Gemini)
    }
}

/// Extraction branch selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    /// Image (or native-PDF) extraction without an OCR pre-pass requirement.
    #[default]
    Default,
    /// Per-page image + OCR text fusion.
    OcrEnhanced,
    /// OCR text only, no images.
    OcrOnly,
    /// Two-pass extraction with IBAN repair (drawdown specialisation).
    OcrVerified,
}

impl PipelineMode {
    /// OCR modes imply the OCR pre-pass even when `useAzureOCR` is unset.
    pub fn requires_ocr(&self) -> bool {
        !matches!(self, PipelineMode::Default)
    }
}

/// Per-request options, deserialized from the inbound request body.
///
/// Unknown keys are ignored; all fields default so an empty object is a
/// valid options record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractionOptions {
    /// Selected model back-end.
    pub model_provider: ModelProvider,

    /// Request server-side structured output where the backend supports it;
    /// otherwise the schema is embedded into the prompt.
    pub enforce_json_schema: bool,

    /// Overrides the default instructions. A literal `{{schema}}` token is
    /// substituted with the schema JSON exactly once.
    pub custom_prompt: Option<String>,

    /// Overrides the registry schema for the document type.
    pub custom_schema: Option<serde_json::Value>,

    /// Tiling override; `None` means auto (tiled for drawdowns only).
    pub enable_tiling: Option<bool>,

    pub slice_height: Option<u32>,
    pub overlap: Option<u32>,
    pub header_height: Option<u32>,

    /// Parallel vs sequential tile dispatch.
    pub parallel_mode: bool,

    /// Parallel batch size.
    pub max_concurrency: usize,

    /// Per-tile retry budget in parallel dispatch.
    pub retry_attempts: u32,

    /// Enable the OCR pre-pass in `default` mode.
    #[serde(rename = "useAzureOCR")]
    pub use_azure_ocr: bool,

    /// Language hint forwarded to the OCR collaborator.
    pub ocr_language: Option<String>,

    /// Bound on concurrent OCR page requests.
    pub ocr_concurrency: usize,

    pub pipeline_mode: PipelineMode,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            model_provider: ModelProvider::default(),
            enforce_json_schema: true,
            custom_prompt: None,
            custom_schema: None,
            enable_tiling: None,
            slice_height: None,
            overlap: None,
            header_height: None,
            parallel_mode: true,
            max_concurrency: 3,
            retry_attempts: 2,
            use_azure_ocr: false,
            ocr_language: None,
            ocr_concurrency: 3,
            pipeline_mode: PipelineMode::default(),
        }
    }
}

impl ExtractionOptions {
    /// Whether the OCR pre-pass should run for this request.
    pub fn wants_ocr(&self) -> bool {
        self.use_azure_ocr || self.pipeline_mode.requires_ocr()
    }

    /// Resolve the tile geometry from the option overrides.
    pub fn tile_geometry(&self) -> TileGeometry {
        let defaults = TileGeometry::default();
        TileGeometry {
            header_height: self.header_height.unwrap_or(defaults.header_height),
            slice_height: self.slice_height.unwrap_or(defaults.slice_height),
            overlap: self.overlap.unwrap_or(defaults.overlap),
        }
    }
}

/// Tile geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    /// Height of the shared header strip cut from the top of a tiled page.
    pub header_height: u32,
    /// Height of each horizontal slice.
    pub slice_height: u32,
    /// Vertical overlap between consecutive slices.
    pub overlap: u32,
}

impl Default for TileGeometry {
    fn default() -> Self {
        Self {
            header_height: 500,
            slice_height: 900,
            overlap: 100,
        }
    }
}

impl TileGeometry {
    /// Step between consecutive slice origins.
    pub fn step(&self) -> u32 {
        self.slice_height.saturating_sub(self.overlap).max(1)
    }
}
