//! Shared repair primitives: OCR fuzzy correction and targeted model
//! re-verification of rows with invalid IBANs.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::backend::{BackendRequest, ContentPart, ModelBackend};
use crate::error::Result;
use crate::iban;
use crate::types::{DocumentType, OCR_CORRECTED_KEY, PageImage};

/// Maximum Levenshtein distance between a misread IBAN and an OCR candidate
/// for the candidate to be adopted.
pub const REPAIR_DISTANCE: usize = 3;

/// Normalise a key-field value for row matching: trimmed, lower-cased.
pub(crate) fn normalize_key(value: &Value) -> String {
    value.as_str().map(|s| s.trim().to_lowercase()).unwrap_or_default()
}

/// Attempt to fix invalid rows from checksum-valid IBAN candidates found in
/// the OCR text.
///
/// A row is repaired when a candidate with the same country code sits
/// within [`REPAIR_DISTANCE`] of the misread IBAN; repaired rows are marked
/// with `_ocrCorrected`. Returns `(repaired, still_invalid)` preserving
/// input order within each group.
pub fn ocr_repair_rows(invalid: Vec<Value>, ocr_text: &str) -> (Vec<Value>, Vec<Value>) {
    let candidates = iban::scan_candidates(ocr_text);
    if candidates.is_empty() {
        return (Vec::new(), invalid);
    }

    let mut repaired = Vec::new();
    let mut still_invalid = Vec::new();

    for mut row in invalid {
        let misread = row["iban"].as_str().unwrap_or("");
        match iban::closest_candidate(misread, &candidates, REPAIR_DISTANCE) {
            Some(candidate) => {
                tracing::debug!(from = misread, to = candidate, "IBAN repaired from OCR candidate");
                row["iban"] = Value::String(candidate.to_string());
                row[OCR_CORRECTED_KEY] = Value::Bool(true);
                repaired.push(row);
            }
            None => still_invalid.push(row),
        }
    }

    (repaired, still_invalid)
}

/// Ask the model to re-read only the rows whose IBANs remain invalid.
///
/// The prompt lists the already-valid rows as context and each invalid row
/// with a specific diagnosis, alongside the original page images. Only rows
/// whose `invoiceNumber` was in the requested set and whose new IBAN passes
/// MOD-97 are accepted; everything else the model returns is discarded.
pub async fn model_reverify_rows(
    backend: &Arc<dyn ModelBackend>,
    images: &[PageImage],
    valid: &[Value],
    invalid: &[Value],
    doc_type: DocumentType,
) -> Result<Vec<Value>> {
    if invalid.is_empty() {
        return Ok(Vec::new());
    }

    let requested: ahash::AHashSet<String> = invalid.iter().map(|row| normalize_key(&row["invoiceNumber"])).collect();

    let prompt = build_reverify_prompt(valid, invalid);
    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(ContentPart::Text(prompt));
    parts.extend(images.iter().map(|page| ContentPart::ImageJpeg(page.data.clone())));

    let response = backend
        .extract(BackendRequest {
            parts: &parts,
            instructions: "You correct bank account numbers that were misread from scanned documents. \
                           Read the attached pages carefully and return only the corrected rows.",
            doc_type,
            schema: None,
            enforce_schema: false,
            use_tile_timeout: false,
        })
        .await?;

    let returned = response.data["drawdowns"]
        .as_array()
        .cloned()
        .or_else(|| response.data.as_array().cloned())
        .unwrap_or_default();

    let accepted: Vec<Value> = returned
        .into_iter()
        .filter(|row| {
            let key = normalize_key(&row["invoiceNumber"]);
            if !requested.contains(&key) {
                return false;
            }
            row["iban"].as_str().is_some_and(iban::is_valid)
        })
        .map(|mut row| {
            if let Some(fixed) = row["iban"].as_str().map(iban::normalize) {
                row["iban"] = Value::String(fixed);
            }
            row
        })
        .collect();

    tracing::debug!(
        requested = requested.len(),
        accepted = accepted.len(),
        "model re-verification complete"
    );
    Ok(accepted)
}

fn build_reverify_prompt(valid: &[Value], invalid: &[Value]) -> String {
    let mut prompt = String::from(
        "Some payment rows extracted from the attached document have invalid IBANs.\n\n\
         Rows already verified as correct (context only, do NOT return these):\n",
    );
    prompt.push_str(&serde_json::to_string_pretty(&json!(valid)).unwrap_or_else(|_| "[]".to_string()));

    prompt.push_str("\n\nRows that need correction, with the detected problem:\n");
    for row in invalid {
        let diagnosis = iban::diagnose(row["iban"].as_str().unwrap_or(""));
        prompt.push_str(&format!(
            "- invoiceNumber {}: IBAN '{}' — {}\n",
            row["invoiceNumber"].as_str().unwrap_or("?"),
            row["iban"].as_str().unwrap_or(""),
            diagnosis.details.unwrap_or_else(|| "invalid".to_string()),
        ));
    }

    prompt.push_str(
        "\nFind these rows in the attached pages and re-read their IBANs character by \
         character. Return ONLY the corrected rows as {\"drawdowns\": [...]}, keeping all \
         other fields of each row unchanged.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResponse;
    use crate::core::config::ModelProvider;
    use async_trait::async_trait;

    const VALID: &str = "SK3112000000198742637541";
    const FLIPPED: &str = "SK3112000000198742637542";

    #[test]
    fn test_ocr_repair_within_distance() {
        let invalid = vec![json!({ "invoiceNumber": "FV1", "iban": FLIPPED })];
        let ocr_text = "payment to SK31 1200 0000 1987 4263 7541 due";
        let (repaired, still) = ocr_repair_rows(invalid, ocr_text);

        assert_eq!(repaired.len(), 1);
        assert!(still.is_empty());
        assert_eq!(repaired[0]["iban"], VALID);
        assert_eq!(repaired[0][OCR_CORRECTED_KEY], true);
    }

    #[test]
    fn test_ocr_repair_spec_scenario_short_iban() {
        // A 23-char too-short read repaired from the 24-char OCR candidate.
        let invalid = vec![json!({ "invoiceNumber": "FV2311102553", "iban": "SK20 0200 0000 0014 7073 725" })];
        let ocr_text = "Uhrada na ucet SK2002000000001470737255 dna 12.4.";
        let (repaired, still) = ocr_repair_rows(invalid, ocr_text);

        assert!(still.is_empty());
        assert_eq!(repaired[0]["iban"], "SK2002000000001470737255");
    }

    #[test]
    fn test_ocr_repair_no_candidates_leaves_rows() {
        let invalid = vec![json!({ "invoiceNumber": "FV1", "iban": FLIPPED })];
        let (repaired, still) = ocr_repair_rows(invalid, "no account numbers in this text");
        assert!(repaired.is_empty());
        assert_eq!(still.len(), 1);
    }

    struct CannedBackend {
        rows: Value,
    }

    #[async_trait]
    impl ModelBackend for CannedBackend {
        fn provider(&self) -> ModelProvider {
            ModelProvider::OpenAi
        }
        async fn extract(&self, _request: BackendRequest<'_>) -> Result<BackendResponse> {
            Ok(BackendResponse {
                data: self.rows.clone(),
                response_id: None,
            })
        }
    }

    fn page() -> PageImage {
        PageImage {
            data: vec![0xFF, 0xD8],
            width: 100,
            height: 100,
        }
    }

    #[tokio::test]
    async fn test_model_reverify_accepts_requested_valid_rows_only() {
        let backend: Arc<dyn ModelBackend> = Arc::new(CannedBackend {
            rows: json!({ "drawdowns": [
                // Requested and valid: accepted.
                { "invoiceNumber": "FV1", "iban": VALID },
                // Requested but still checksum-broken: rejected.
                { "invoiceNumber": "FV2", "iban": FLIPPED },
                // Not requested: rejected even though valid.
                { "invoiceNumber": "FV9", "iban": VALID },
            ]}),
        });

        let invalid = vec![
            json!({ "invoiceNumber": "FV1", "iban": FLIPPED }),
            json!({ "invoiceNumber": "FV2", "iban": "SK31" }),
        ];
        let accepted = model_reverify_rows(&backend, &[page()], &[], &invalid, DocumentType::Drawdown)
            .await
            .unwrap();

        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0]["invoiceNumber"], "FV1");
        assert_eq!(accepted[0]["iban"], VALID);
    }

    #[tokio::test]
    async fn test_model_reverify_empty_invalid_is_noop() {
        let backend: Arc<dyn ModelBackend> = Arc::new(CannedBackend {
            rows: json!({ "drawdowns": [ { "invoiceNumber": "FV1", "iban": VALID } ] }),
        });
        let accepted = model_reverify_rows(&backend, &[], &[], &[], DocumentType::Drawdown)
            .await
            .unwrap();
        assert!(accepted.is_empty());
    }

    #[test]
    fn test_reverify_prompt_carries_diagnostics() {
        let valid = vec![json!({ "invoiceNumber": "FV0", "iban": VALID })];
        let invalid = vec![
            json!({ "invoiceNumber": "FV1", "iban": &VALID[..23] }),
            json!({ "invoiceNumber": "FV2", "iban": FLIPPED }),
        ];
        let prompt = build_reverify_prompt(&valid, &invalid);
        assert!(prompt.contains("TOO SHORT"));
        assert!(prompt.contains("checksum failed") || prompt.contains("MOD-97"));
        assert!(prompt.contains("FV0"));
        assert!(prompt.contains("do NOT return these"));
    }
}
