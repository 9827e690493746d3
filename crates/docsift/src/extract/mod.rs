//! Extraction branches: per-tile image calls, native-file calls and the
//! OCR-driven variants.

pub mod instructions;
mod native;
mod ocr_enhanced;
mod ocr_only;
mod ocr_verified;
mod tiles;

pub use native::run_native;
pub use ocr_enhanced::run_ocr_enhanced;
pub use ocr_only::run_ocr_only;
pub use ocr_verified::run_ocr_verified;
pub use tiles::run_tiles;

use serde_json::Value;

use crate::error::{DocsiftError, OCR_PROVIDER, Result};
use crate::types::{PAGE_INDEX_KEY, ProcessingContext, SLICE_INDEX_KEY, TILE_INDEX_KEY};

/// Fetch the joined OCR text an OCR-dependent branch requires.
///
/// Distinguishes "the OCR collaborator never ran" (unconfigured, a client
/// error) from "OCR ran but recognised nothing" (an upstream degradation).
pub(crate) fn require_ocr_text(ctx: &ProcessingContext) -> Result<String> {
    match ctx.metadata.ocr_text.clone() {
        Some(text) => Ok(text),
        None if ctx.metadata.ocr_pages.is_empty() => Err(DocsiftError::BackendUnconfigured {
            provider: OCR_PROVIDER.to_string(),
            message: "this pipeline mode requires the OCR collaborator, which is not configured".to_string(),
        }),
        None => Err(DocsiftError::OcrUnavailable(
            "OCR ran but produced no text for this document".to_string(),
        )),
    }
}

/// Stamp every row of the document type's array field with its source
/// coordinates so aggregation can correlate and order rows.
///
/// Markers are integer back-references into the tile arena, removed again
/// by Cleanup before emission.
pub(crate) fn tag_rows(
    data: &mut Value,
    array_field: Option<&str>,
    tile_index: Option<usize>,
    page_index: Option<usize>,
    slice_index: Option<usize>,
) {
    let Some(field) = array_field else {
        return;
    };
    let Some(rows) = data.get_mut(field).and_then(Value::as_array_mut) else {
        return;
    };
    for row in rows {
        let Some(object) = row.as_object_mut() else {
            continue;
        };
        if let Some(tile_index) = tile_index {
            object.insert(TILE_INDEX_KEY.to_string(), Value::from(tile_index));
        }
        if let Some(page_index) = page_index {
            object.insert(PAGE_INDEX_KEY.to_string(), Value::from(page_index));
        }
        if let Some(slice_index) = slice_index {
            object.insert(SLICE_INDEX_KEY.to_string(), Value::from(slice_index));
        }
    }
}
