//! Field-level validation with a targeted repair loop.

mod iban;
pub(crate) mod repair;
mod registry;

pub use iban::IbanValidator;
pub use registry::{list_validators, register_validator, validator};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::ModelBackend;
use crate::core::config::RuntimeConfig;
use crate::error::Result;
use crate::schema::spec_for;
use crate::types::{PageImage, ProcessingContext};

/// Everything a repair pass may draw on.
pub struct RepairContext<'a> {
    pub ocr_text: Option<&'a str>,
    pub images: &'a [PageImage],
    pub backend: &'a Arc<dyn ModelBackend>,
    pub doc_type: crate::types::DocumentType,
}

/// A per-field validator with an optional repair capability.
///
/// Validators operate on the rows of the document type's array field.
/// Repairs are re-applied by matching on the validator's key field,
/// normalised to trimmed lower-case.
#[async_trait]
pub trait FieldValidator: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Row field this validator checks.
    fn field(&self) -> &'static str;

    /// Row field used to match repaired rows back onto the result.
    fn key_field(&self) -> &'static str {
        "invoiceNumber"
    }

    /// Whether one row passes.
    fn is_valid(&self, row: &Value) -> bool;

    /// Indices of failing rows, in order.
    fn find_invalid(&self, rows: &[Value]) -> Vec<usize> {
        rows.iter()
            .enumerate()
            .filter(|(_, row)| !self.is_valid(row))
            .map(|(index, _)| index)
            .collect()
    }

    /// Attempt to repair the given invalid rows. Returns repaired rows
    /// only; rows the pass could not fix are simply absent.
    async fn repair(&self, invalid: &[Value], ctx: &RepairContext<'_>) -> Result<Vec<Value>>;

    /// Write repaired rows back into the result, matching on the key field.
    fn apply_repairs(&self, result: &mut Value, repaired: &[Value], array_field: &str) {
        let Some(rows) = result.get_mut(array_field).and_then(Value::as_array_mut) else {
            return;
        };
        for fixed in repaired {
            let key = repair::normalize_key(&fixed[self.key_field()]);
            if key.is_empty() {
                continue;
            }
            for row in rows.iter_mut() {
                if repair::normalize_key(&row[self.key_field()]) == key {
                    *row = fixed.clone();
                    break;
                }
            }
        }
    }

    /// Annotate a row that remains invalid after repair with
    /// `_validationIssue` / `_validationDetails` for the API consumer.
    fn annotate(&self, row: &mut Value);
}

/// Run the configured validators for the context's document type, with
/// repair when re-verification is enabled.
///
/// Residual failures are non-fatal: rows keep their diagnostics markers and
/// a warning is recorded.
pub async fn run_validators(
    ctx: &mut ProcessingContext,
    backend: &Arc<dyn ModelBackend>,
    runtime: &RuntimeConfig,
) -> Result<()> {
    let doc_spec = spec_for(ctx.request.doc_type);
    let Some(array_field) = doc_spec.array_field else {
        return Ok(());
    };

    for name in doc_spec.validators {
        let Some(validator) = validator(name) else {
            ctx.record_warning(format!("validator '{name}' is configured but not registered"));
            continue;
        };

        let Some(result) = ctx.result.as_ref() else {
            return Ok(());
        };
        let rows = result[array_field].as_array().cloned().unwrap_or_default();
        let invalid_indices = validator.find_invalid(&rows);
        if invalid_indices.is_empty() {
            continue;
        }
        tracing::info!(
            validator = name,
            invalid = invalid_indices.len(),
            total = rows.len(),
            "validator found failing rows"
        );

        if runtime.enable_reverification {
            let invalid_rows: Vec<Value> = invalid_indices.iter().map(|&index| rows[index].clone()).collect();
            let repair_ctx = RepairContext {
                ocr_text: ctx.metadata.ocr_text.as_deref(),
                images: &ctx.images,
                backend,
                doc_type: ctx.request.doc_type,
            };

            match validator.repair(&invalid_rows, &repair_ctx).await {
                Ok(repaired) if !repaired.is_empty() => {
                    ctx.metadata.reverified = true;
                    if let Some(result) = ctx.result.as_mut() {
                        validator.apply_repairs(result, &repaired, array_field);
                    }
                }
                Ok(_) => {}
                Err(error) => ctx.record_warning(format!("validator '{name}' repair failed: {error}")),
            }
        }

        // Re-scan and annotate whatever is still failing.
        let mut residual = 0usize;
        if let Some(rows) = ctx
            .result
            .as_mut()
            .and_then(|result| result.get_mut(array_field))
            .and_then(Value::as_array_mut)
        {
            for row in rows.iter_mut() {
                if !validator.is_valid(row) {
                    validator.annotate(row);
                    residual += 1;
                }
            }
        }
        if residual > 0 {
            ctx.record_warning(format!("validator '{name}': {residual} rows remain invalid after repair"));
        }
    }

    Ok(())
}
