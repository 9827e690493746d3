//! IBAN field validator: MOD-97 with OCR fuzzy repair and targeted model
//! re-verification.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::iban;
use crate::types::{VALIDATION_DETAILS_KEY, VALIDATION_ISSUE_KEY};

use super::repair::{model_reverify_rows, ocr_repair_rows};
use super::{FieldValidator, RepairContext};

pub struct IbanValidator;

#[async_trait]
impl FieldValidator for IbanValidator {
    fn name(&self) -> &'static str {
        "iban"
    }

    fn field(&self) -> &'static str {
        "iban"
    }

    fn is_valid(&self, row: &Value) -> bool {
        row[self.field()].as_str().is_some_and(iban::is_valid)
    }

    /// OCR fuzzy repair first, then a model pass for whatever remains.
    async fn repair(&self, invalid: &[Value], ctx: &RepairContext<'_>) -> Result<Vec<Value>> {
        let (mut repaired, still_invalid) = match ctx.ocr_text {
            Some(ocr_text) => ocr_repair_rows(invalid.to_vec(), ocr_text),
            None => (Vec::new(), invalid.to_vec()),
        };

        if !still_invalid.is_empty() && !ctx.images.is_empty() {
            let model_repaired =
                model_reverify_rows(ctx.backend, ctx.images, &[], &still_invalid, ctx.doc_type).await?;
            repaired.extend(model_repaired);
        }

        Ok(repaired)
    }

    fn annotate(&self, row: &mut Value) {
        let diagnosis = iban::diagnose(row[self.field()].as_str().unwrap_or(""));
        let issue = diagnosis.issue.unwrap_or(iban::IbanIssue::Invalid);
        row[VALIDATION_ISSUE_KEY] = Value::String(issue.as_str().to_string());
        if let Some(details) = diagnosis.details {
            row[VALIDATION_DETAILS_KEY] = Value::String(details);
        }
    }
}
