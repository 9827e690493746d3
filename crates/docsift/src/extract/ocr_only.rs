//! OCR-only extraction branch: the model sees the OCR text and no images.

use std::sync::Arc;

use crate::backend::{BackendRequest, ContentPart, ModelBackend};
use crate::error::Result;
use crate::extract::instructions::build_instructions;
use crate::types::{ProcessingContext, TileExtraction};

/// Run one text-only extraction call over the joined OCR text. Failure is
/// fatal, as is a missing OCR pre-pass.
pub async fn run_ocr_only(ctx: &mut ProcessingContext, backend: &Arc<dyn ModelBackend>) -> Result<()> {
    let ocr_text = super::require_ocr_text(ctx)?;

    let schema = ctx.request.effective_schema();
    let enforce = ctx.request.options.enforce_json_schema && backend.supports_structured_output();
    let instructions = build_instructions(
        ctx.request.doc_type,
        ctx.request.options.custom_prompt.as_deref(),
        &schema,
        !enforce,
    );

    let parts = vec![ContentPart::Text(format!(
        "{ocr_text}\n\nExtract the structured data from the text above."
    ))];

    let response = backend
        .extract(BackendRequest {
            parts: &parts,
            instructions: &instructions,
            doc_type: ctx.request.doc_type,
            schema: enforce.then_some(&schema),
            enforce_schema: enforce,
            use_tile_timeout: false,
        })
        .await?;

    ctx.extractions = vec![TileExtraction {
        data: response.data,
        response_id: response.response_id,
        tile_index: None,
    }];
    Ok(())
}
