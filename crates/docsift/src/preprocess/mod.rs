//! Preprocess: turn a raw document into an ordered sequence of page images.
//!
//! PDFs are rasterised through pdfium and normalised (grayscale, histogram
//! stretch, width clamp) before JPEG encoding; image uploads pass through
//! unchanged. Anything else is rejected.

mod pdf;

pub use pdf::rasterize_pdf;

use crate::core::config::RenderConfig;
use crate::error::{DocsiftError, Result};
use crate::types::PageImage;

/// MIME types accepted as direct image uploads.
const IMAGE_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

pub fn is_supported_mime(mime_type: &str) -> bool {
    mime_type == "application/pdf" || IMAGE_MIME_TYPES.contains(&mime_type)
}

/// Produce the ordered page sequence for a document.
///
/// PDF rasterisation runs on the blocking pool; pdfium calls block the
/// thread they run on.
///
/// # Errors
///
/// - [`DocsiftError::UnsupportedMediaType`] for MIME types outside the
///   accepted set.
/// - [`DocsiftError::PdfRender`] when rasterisation fails (fatal).
/// - [`DocsiftError::ImageProcessing`] when an image upload cannot be
///   decoded.
pub async fn preprocess(file: &[u8], mime_type: &str, render: &RenderConfig) -> Result<Vec<PageImage>> {
    match mime_type {
        "application/pdf" => {
            let bytes = file.to_vec();
            let render = render.clone();
            tokio::task::spawn_blocking(move || rasterize_pdf(&bytes, &render))
                .await
                .map_err(|e| DocsiftError::Other(format!("rasterisation task failed: {e}")))?
        }
        mime if IMAGE_MIME_TYPES.contains(&mime) => passthrough_image(file),
        other => Err(DocsiftError::UnsupportedMediaType(other.to_string())),
    }
}

/// Keep the uploaded image bytes unchanged as the single page, probing the
/// dimensions for the tiling decision.
fn passthrough_image(file: &[u8]) -> Result<Vec<PageImage>> {
    let (width, height) = crate::image::dimensions(file)?;
    Ok(vec![PageImage {
        data: file.to_vec(),
        width,
        height,
    }])
}
