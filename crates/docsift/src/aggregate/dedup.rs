//! Composite-key row deduplication.

use ahash::AHashMap;
use serde_json::Value;

use crate::iban;
use crate::schema::spec_for;
use crate::types::DocumentType;

/// Minimum account-body similarity for two IBANs to be considered the same
/// account misread by OCR or the model.
const IBAN_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Deduplicate rows by the document type's composite key.
///
/// The key is built from the configured fields, trimmed and lower-cased,
/// joined with `|`. Rows whose key parts are all empty are kept as-is. The
/// first occurrence of a key wins; for drawdowns, a later duplicate whose
/// IBAN is more than 80% similar to the first one's can promote its IBAN
/// when the first one fails MOD-97 and the newcomer passes.
///
/// Output preserves first-seen order, and the operation is idempotent.
pub fn dedupe_rows(rows: Vec<Value>, doc_type: DocumentType) -> Vec<Value> {
    let keys = spec_for(doc_type).dedup_keys;
    if keys.is_empty() {
        return rows;
    }

    let mut kept: Vec<Value> = Vec::with_capacity(rows.len());
    let mut index_by_key: AHashMap<String, usize> = AHashMap::new();

    for row in rows {
        let Some(key) = composite_key(&row, keys) else {
            kept.push(row);
            continue;
        };

        match index_by_key.get(&key) {
            None => {
                index_by_key.insert(key, kept.len());
                kept.push(row);
            }
            Some(&existing_index) => {
                if doc_type == DocumentType::Drawdown {
                    maybe_promote_iban(&mut kept[existing_index], &row);
                }
            }
        }
    }

    kept
}

/// Build the normalised composite key, or `None` when every part is empty.
fn composite_key(row: &Value, keys: &[&str]) -> Option<String> {
    let parts: Vec<String> = keys
        .iter()
        .map(|key| normalize_key_part(&row[*key]))
        .collect();
    if parts.iter().all(String::is_empty) {
        return None;
    }
    Some(parts.join("|"))
}

fn normalize_key_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Keep whichever IBAN actually passes MOD-97 when a duplicate row carries a
/// near-identical account number.
fn maybe_promote_iban(existing: &mut Value, duplicate: &Value) {
    let (Some(old_iban), Some(new_iban)) = (existing["iban"].as_str(), duplicate["iban"].as_str()) else {
        return;
    };
    if old_iban.trim().is_empty() || new_iban.trim().is_empty() {
        return;
    }
    if iban::body_similarity(old_iban, new_iban) <= IBAN_SIMILARITY_THRESHOLD {
        return;
    }
    if !iban::is_valid(old_iban) && iban::is_valid(new_iban) {
        tracing::debug!(
            old = old_iban,
            new = new_iban,
            "promoting checksum-valid IBAN from duplicate row"
        );
        existing["iban"] = Value::String(iban::normalize(new_iban));
    }
}
