//! Native-file extraction branch.
//!
//! For back-ends that consume original file bytes, the whole document goes
//! out in one call with the schema embedded in the prompt; rasterisation
//! and tiling are skipped entirely.

use std::sync::Arc;

use crate::backend::ModelBackend;
use crate::error::Result;
use crate::extract::instructions::build_instructions;
use crate::types::{ProcessingContext, TileExtraction};

/// Run one whole-document extraction call. Failure is fatal.
pub async fn run_native(ctx: &mut ProcessingContext, backend: &Arc<dyn ModelBackend>) -> Result<()> {
    let schema = ctx.request.effective_schema();
    let instructions = build_instructions(
        ctx.request.doc_type,
        ctx.request.options.custom_prompt.as_deref(),
        &schema,
        true,
    );

    tracing::debug!(
        doc_type = %ctx.request.doc_type,
        mime_type = %ctx.request.mime_type,
        "running native-file extraction"
    );

    let response = backend
        .extract_native(&ctx.request.file, &ctx.request.mime_type, &instructions, Some(&schema))
        .await?;

    ctx.extractions = vec![TileExtraction {
        data: response.data,
        response_id: response.response_id,
        tile_index: None,
    }];
    Ok(())
}
