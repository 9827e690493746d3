//! PDF rasterisation via pdfium.

use image::GenericImageView;
use pdfium_render::prelude::*;

use crate::core::config::RenderConfig;
use crate::error::{DocsiftError, Result};
use crate::image::{clamp_width, encode_jpeg, normalize_histogram, to_grayscale};
use crate::types::PageImage;

const PDF_POINTS_PER_INCH: f32 = 72.0;

/// Rasterise a PDF into normalised JPEG page images.
///
/// Pages are rendered at `render.density` DPI, clamped to
/// `render.max_width`, optionally converted to grayscale and
/// histogram-normalised, then JPEG-encoded at `render.jpeg_quality`.
/// The page count is capped at `render.max_pages`; page order mirrors the
/// document.
///
/// Blocking: call from the blocking pool, not an async executor thread.
pub fn rasterize_pdf(bytes: &[u8], render: &RenderConfig) -> Result<Vec<PageImage>> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| DocsiftError::pdf_render(format!("failed to bind pdfium library: {e}")))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| DocsiftError::pdf_render(format!("failed to load PDF: {e}")))?;

    let total_pages = document.pages().len();
    let page_limit = usize::from(render.max_pages.min(total_pages));
    if total_pages > render.max_pages {
        tracing::warn!(
            total_pages,
            max_pages = render.max_pages,
            "PDF exceeds the page cap; trailing pages are skipped"
        );
    }

    let mut pages = Vec::with_capacity(page_limit);
    for (index, page) in document.pages().iter().take(page_limit).enumerate() {
        let rendered = render_page(&page, render)
            .map_err(|e| DocsiftError::pdf_render(format!("failed to render page {index}: {e}")))?;
        pages.push(rendered);
    }

    if pages.is_empty() {
        return Err(DocsiftError::pdf_render("PDF contains no pages"));
    }

    tracing::debug!(pages = pages.len(), density = render.density, "PDF rasterised");
    Ok(pages)
}

fn render_page(page: &PdfPage<'_>, render: &RenderConfig) -> Result<PageImage> {
    let scale = render.density as f32 / PDF_POINTS_PER_INCH;
    let pixel_width = (page.width().value * scale).round().max(1.0) as i32;
    let pixel_height = (page.height().value * scale).round().max(1.0) as i32;

    let bitmap = page
        .render_with_config(
            &PdfRenderConfig::new()
                .set_target_width(pixel_width)
                .set_target_height(pixel_height)
                .render_form_data(true)
                .render_annotations(true),
        )
        .map_err(|e| DocsiftError::pdf_render(e.to_string()))?;

    let mut image = bitmap.as_image();
    image = clamp_width(image, render.max_width)?;
    if render.grayscale {
        image = to_grayscale(&image);
    }
    if render.normalize {
        image = normalize_histogram(&image);
    }

    let (width, height) = image.dimensions();
    let data = encode_jpeg(&image, render.jpeg_quality)?;

    Ok(PageImage { data, width, height })
}
