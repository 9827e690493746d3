//! OCR-enhanced extraction branch: per page, the model receives the page's
//! OCR text fused with the page image.

use std::sync::Arc;

use crate::backend::{BackendRequest, ContentPart, ModelBackend};
use crate::error::{DocsiftError, Result};
use crate::extract::instructions::{OCR_FUSION_DIRECTIVE, build_instructions};
use crate::schema::spec_for;
use crate::types::{ProcessingContext, TileExtraction};

/// Run one fused text+image call per page.
///
/// Per-page failures are non-fatal warnings; the page is dropped. The run
/// fails only when the OCR pre-pass produced nothing or every page failed.
pub async fn run_ocr_enhanced(ctx: &mut ProcessingContext, backend: &Arc<dyn ModelBackend>) -> Result<()> {
    super::require_ocr_text(ctx)?;

    let schema = ctx.request.effective_schema();
    let enforce = ctx.request.options.enforce_json_schema && backend.supports_structured_output();
    let mut instructions = build_instructions(
        ctx.request.doc_type,
        ctx.request.options.custom_prompt.as_deref(),
        &schema,
        !enforce,
    );
    instructions.push_str(OCR_FUSION_DIRECTIVE);

    let array_field = spec_for(ctx.request.doc_type).array_field;
    let doc_type = ctx.request.doc_type;

    let mut extractions = Vec::with_capacity(ctx.images.len());
    let mut warnings = Vec::new();

    for (page_index, page) in ctx.images.iter().enumerate() {
        let page_text = ctx
            .metadata
            .ocr_pages
            .get(page_index)
            .and_then(|artifact| artifact.as_ref())
            .map(|artifact| artifact.text.as_str())
            .unwrap_or("");

        let parts = vec![
            ContentPart::Text(format!(
                "Page {} OCR Text:\n{page_text}\n\nNow extract structured data from this page:",
                page_index + 1
            )),
            ContentPart::ImageJpeg(page.data.clone()),
        ];

        let result = backend
            .extract(BackendRequest {
                parts: &parts,
                instructions: &instructions,
                doc_type,
                schema: enforce.then_some(&schema),
                enforce_schema: enforce,
                use_tile_timeout: true,
            })
            .await;

        match result {
            Ok(response) => {
                let mut data = response.data;
                super::tag_rows(&mut data, array_field, None, Some(page_index), None);
                extractions.push(TileExtraction {
                    data,
                    response_id: response.response_id,
                    // Page order doubles as the aggregation order.
                    tile_index: Some(page_index),
                });
            }
            Err(error) => warnings.push(format!("page {page_index} dropped: {error}")),
        }
    }

    if extractions.is_empty() {
        return Err(DocsiftError::Other(format!(
            "ocr-enhanced extraction failed for all {} pages",
            ctx.images.len()
        )));
    }

    for warning in warnings {
        ctx.record_warning(warning);
    }
    ctx.extractions = extractions;
    Ok(())
}
