//! OCR-verified extraction branch (drawdown specialisation).
//!
//! Two-pass pipeline: an initial whole-document call over OCR text plus all
//! page images, followed by IBAN validation of every row, OCR-candidate
//! repair, and a targeted model re-verification of whatever is still
//! invalid.

use std::sync::Arc;

use serde_json::Value;

use crate::backend::{BackendRequest, ContentPart, ModelBackend};
use crate::error::Result;
use crate::extract::instructions::verified_instructions;
use crate::iban;
use crate::schema::spec_for;
use crate::types::{DocumentType, ProcessingContext, TileExtraction};
use crate::validate::repair::{model_reverify_rows, normalize_key, ocr_repair_rows};

pub async fn run_ocr_verified(ctx: &mut ProcessingContext, backend: &Arc<dyn ModelBackend>) -> Result<()> {
    let ocr_text = super::require_ocr_text(ctx)?;

    let mut data = initial_pass(ctx, backend, &ocr_text).await?;

    // IBAN repair applies to the drawdown row shape only; other document
    // types get the single verified pass without the repair loop.
    if ctx.request.doc_type == DocumentType::Drawdown {
        let array_field = spec_for(DocumentType::Drawdown)
            .array_field
            .expect("drawdown has an array field");
        if let Some(rows) = data.get_mut(array_field).and_then(Value::as_array_mut) {
            let all_rows = std::mem::take(rows);
            let merged = repair_rows(ctx, backend, all_rows, &ocr_text).await?;
            *rows = merged;
        }
        ctx.metadata.reverified = true;
    }

    ctx.extractions = vec![TileExtraction {
        data,
        response_id: None,
        tile_index: None,
    }];
    Ok(())
}

/// Single whole-document call: OCR text first, then every page image, with
/// the extended character-exactness instructions.
async fn initial_pass(ctx: &ProcessingContext, backend: &Arc<dyn ModelBackend>, ocr_text: &str) -> Result<Value> {
    let schema = ctx.request.effective_schema();
    let enforce = ctx.request.options.enforce_json_schema && backend.supports_structured_output();
    let instructions = verified_instructions(ctx.request.options.custom_prompt.as_deref(), &schema, !enforce);

    let mut parts = Vec::with_capacity(ctx.images.len() + 1);
    parts.push(ContentPart::Text(format!(
        "Full document OCR text:\n\n{ocr_text}\n\nExtract the structured data from the document, \
         cross-checking every value against the attached page images."
    )));
    parts.extend(ctx.images.iter().map(|page| ContentPart::ImageJpeg(page.data.clone())));

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
    Ok(response.data)
}

/// Validate, repair and merge the drawdown rows.
async fn repair_rows(
    ctx: &mut ProcessingContext,
    backend: &Arc<dyn ModelBackend>,
    rows: Vec<Value>,
    ocr_text: &str,
) -> Result<Vec<Value>> {
    let (valid, invalid): (Vec<Value>, Vec<Value>) = rows
        .into_iter()
        .partition(|row| row["iban"].as_str().is_some_and(iban::is_valid));

    if invalid.is_empty() {
        return Ok(valid);
    }
    tracing::debug!(valid = valid.len(), invalid = invalid.len(), "IBAN validation partitioned rows");

    let (ocr_repaired, still_invalid) = ocr_repair_rows(invalid, ocr_text);

    let model_repaired = if still_invalid.is_empty() {
        Vec::new()
    } else {
        match model_reverify_rows(backend, &ctx.images, &valid, &still_invalid, ctx.request.doc_type).await {
            Ok(repaired) => repaired,
            Err(error) => {
                ctx.record_warning(format!("model re-verification failed: {error}"));
                Vec::new()
            }
        }
    };

    Ok(merge_rows(valid, ocr_repaired, model_repaired, still_invalid))
}

/// Concatenate valid, OCR-repaired and model-repaired rows, dropping
/// repaired rows whose invoice number already appears among the valid ones.
/// Rows no pass could fix are kept too; the validator stage annotates them.
fn merge_rows(
    valid: Vec<Value>,
    ocr_repaired: Vec<Value>,
    model_repaired: Vec<Value>,
    still_invalid: Vec<Value>,
) -> Vec<Value> {
    let valid_keys: ahash::AHashSet<String> = valid.iter().map(|row| normalize_key(&row["invoiceNumber"])).collect();
    let repaired_keys: ahash::AHashSet<String> = model_repaired
        .iter()
        .map(|row| normalize_key(&row["invoiceNumber"]))
        .collect();

    let mut merged = valid;
    merged.extend(
        ocr_repaired
            .into_iter()
            .filter(|row| !valid_keys.contains(&normalize_key(&row["invoiceNumber"]))),
    );
    merged.extend(
        model_repaired
            .into_iter()
            .filter(|row| !valid_keys.contains(&normalize_key(&row["invoiceNumber"]))),
    );
    merged.extend(
        still_invalid
            .into_iter()
            .filter(|row| {
                let key = normalize_key(&row["invoiceNumber"]);
                !valid_keys.contains(&key) && !repaired_keys.contains(&key)
            }),
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID: &str = "SK3112000000198742637541";
    const VALID_2: &str = "SK0809000000000123123123";

    #[test]
    fn test_merge_rows_order_and_dedup() {
        let valid = vec![json!({ "invoiceNumber": "FV1", "iban": VALID })];
        let ocr_repaired = vec![
            json!({ "invoiceNumber": "FV2", "iban": VALID_2, "_ocrCorrected": true }),
            // Same invoice as a valid row: dropped.
            json!({ "invoiceNumber": "fv1", "iban": VALID_2, "_ocrCorrected": true }),
        ];
        let model_repaired = vec![json!({ "invoiceNumber": "FV3", "iban": VALID })];
        let still_invalid = vec![json!({ "invoiceNumber": "FV4", "iban": "SK31" })];

        let merged = merge_rows(valid, ocr_repaired, model_repaired, still_invalid);
        let keys: Vec<&str> = merged.iter().map(|r| r["invoiceNumber"].as_str().unwrap()).collect();
        assert_eq!(keys, vec!["FV1", "FV2", "FV3", "FV4"]);
    }

    #[test]
    fn test_merge_rows_model_repair_replaces_residual() {
        let model_repaired = vec![json!({ "invoiceNumber": "FV5", "iban": VALID })];
        let still_invalid = vec![json!({ "invoiceNumber": "FV5", "iban": "broken" })];
        let merged = merge_rows(vec![], vec![], model_repaired, still_invalid);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["iban"], VALID);
    }
}
