//! Process-level configuration read from the environment.
//!
//! The environment is the deployment surface: provider credentials,
//! endpoints, PDF render parameters and timeouts. Unset variables fall back
//! to defaults; set-but-invalid numeric values are configuration errors and
//! fail loudly rather than being silently ignored.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DocsiftError, Result};

/// PDF rasterisation parameters.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Render density in DPI.
    pub density: u32,
    /// JPEG quality for encoded pages (1-100).
    pub jpeg_quality: u8,
    /// Hard cap on rendered pages per document.
    pub max_pages: u16,
    /// Pages wider than this are downscaled preserving aspect ratio.
    pub max_width: u32,
    /// Convert pages to grayscale before encoding.
    pub grayscale: bool,
    /// Apply histogram normalisation before encoding.
    pub normalize: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            density: 150,
            jpeg_quality: 85,
            max_pages: 20,
            max_width: 1600,
            grayscale: true,
            normalize: true,
        }
    }
}

/// Runtime configuration resolved once per process.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,

    pub openai_api_key: Option<String>,
    pub openai_model: String,

    pub azure_openai_endpoint: Option<String>,
    pub azure_openai_api_key: Option<String>,
    pub azure_openai_deployment: Option<String>,
    pub azure_openai_api_version: String,

    pub azure_ocr_endpoint: Option<String>,
    pub azure_ocr_key: Option<String>,

    pub render: RenderConfig,

    /// Deadline for whole-document model calls.
    pub request_timeout: Duration,
    /// Deadline for per-tile model calls.
    pub tile_timeout: Duration,

    /// Attempt model-assisted repair of rows that fail field validation.
    pub enable_reverification: bool,

    /// Surface warnings and per-stage timing in the response metadata.
    pub verbose_debug: bool,
    /// When set, tiling dumps each header/slice JPEG into this directory.
    pub debug_dir: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Read the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`DocsiftError::Validation`] when a numeric variable is set
    /// to a value that does not parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gemini_model: non_empty_var("DOCSIFT_GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_model: non_empty_var("DOCSIFT_OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            azure_openai_endpoint: non_empty_var("AZURE_OPENAI_ENDPOINT"),
            azure_openai_api_key: non_empty_var("AZURE_OPENAI_API_KEY"),
            azure_openai_deployment: non_empty_var("AZURE_OPENAI_DEPLOYMENT"),
            azure_openai_api_version: non_empty_var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| "2024-08-01-preview".to_string()),
            azure_ocr_endpoint: non_empty_var("AZURE_OCR_ENDPOINT"),
            azure_ocr_key: non_empty_var("AZURE_OCR_KEY"),
            render: RenderConfig::default(),
            request_timeout: Duration::from_secs(300),
            tile_timeout: Duration::from_secs(90),
            enable_reverification: true,
            verbose_debug: std::env::var_os("DOCSIFT_DEBUG").is_some(),
            debug_dir: non_empty_var("DOCSIFT_DEBUG_DIR").map(PathBuf::from),
        };

        if let Some(density) = parse_var::<u32>("DOCSIFT_PDF_DENSITY")? {
            if density == 0 || density > 600 {
                return Err(DocsiftError::validation(
                    "DOCSIFT_PDF_DENSITY must be between 1 and 600".to_string(),
                ));
            }
            config.render.density = density;
        }
        if let Some(quality) = parse_var::<u8>("DOCSIFT_PDF_QUALITY")? {
            if quality == 0 || quality > 100 {
                return Err(DocsiftError::validation(
                    "DOCSIFT_PDF_QUALITY must be between 1 and 100".to_string(),
                ));
            }
            config.render.jpeg_quality = quality;
        }
        if let Some(max_pages) = parse_var::<u16>("DOCSIFT_PDF_MAX_PAGES")? {
            if max_pages == 0 {
                return Err(DocsiftError::validation(
                    "DOCSIFT_PDF_MAX_PAGES must be greater than 0".to_string(),
                ));
            }
            config.render.max_pages = max_pages;
        }
        if let Some(max_width) = parse_var::<u32>("DOCSIFT_PDF_MAX_WIDTH")? {
            config.render.max_width = max_width;
        }
        if let Some(secs) = parse_var::<u64>("DOCSIFT_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("DOCSIFT_TILE_TIMEOUT_SECS")? {
            config.tile_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = non_empty_var("DOCSIFT_REVERIFY") {
            config.enable_reverification = match flag.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(DocsiftError::validation(format!(
                        "Invalid value for DOCSIFT_REVERIFY: '{other}'. Must be 'true' or 'false'."
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Whether the OCR collaborator is configured at all.
    pub fn ocr_configured(&self) -> bool {
        self.azure_ocr_endpoint.is_some() && self.azure_ocr_key.is_some()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match non_empty_var(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            DocsiftError::validation(format!(
                "Invalid value for {name}: '{raw}'. Must be a {}.",
                std::any::type_name::<T>()
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        unsafe {
            std::env::remove_var("DOCSIFT_PDF_DENSITY");
            std::env::remove_var("DOCSIFT_REQUEST_TIMEOUT_SECS");
        }
        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.render.density, 150);
        assert_eq!(config.render.max_pages, 20);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert!(config.enable_reverification);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number_is_validation_error() {
        unsafe {
            std::env::set_var("DOCSIFT_PDF_DENSITY", "not-a-number");
        }
        let err = RuntimeConfig::from_env().unwrap_err();
        assert!(matches!(err, DocsiftError::Validation { .. }));
        unsafe {
            std::env::remove_var("DOCSIFT_PDF_DENSITY");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_density_out_of_range() {
        unsafe {
            std::env::set_var("DOCSIFT_PDF_DENSITY", "1200");
        }
        let err = RuntimeConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("between 1 and 600"));
        unsafe {
            std::env::remove_var("DOCSIFT_PDF_DENSITY");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        unsafe {
            std::env::set_var("DOCSIFT_PDF_MAX_PAGES", "5");
            std::env::set_var("DOCSIFT_TILE_TIMEOUT_SECS", "42");
        }
        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.render.max_pages, 5);
        assert_eq!(config.tile_timeout, Duration::from_secs(42));
        unsafe {
            std::env::remove_var("DOCSIFT_PDF_MAX_PAGES");
            std::env::remove_var("DOCSIFT_TILE_TIMEOUT_SECS");
        }
    }

    #[test]
    #[serial]
    fn test_ocr_configured_requires_both() {
        unsafe {
            std::env::set_var("AZURE_OCR_ENDPOINT", "https://example.cognitiveservices.azure.com");
            std::env::remove_var("AZURE_OCR_KEY");
        }
        let config = RuntimeConfig::from_env().unwrap();
        assert!(!config.ocr_configured());
        unsafe {
            std::env::remove_var("AZURE_OCR_ENDPOINT");
        }
    }
}
