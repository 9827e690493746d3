//! Aggregation: merge per-tile outputs, deduplicate rows, recompute derived
//! totals.

mod dedup;

pub use dedup::dedupe_rows;

use serde_json::{Map, Value};

use crate::schema::spec_for;
use crate::types::{DocumentType, TileExtraction};

/// Merge per-tile extraction outputs into one result object.
///
/// A single extraction passes through untouched (apart from the drawdown
/// total recompute). With multiple extractions the document type's array
/// field is concatenated in `tile_index` order, deduplicated, and non-array
/// top-level fields are merged left-to-right with later values overriding
/// earlier ones.
pub fn aggregate(extractions: &[TileExtraction], doc_type: DocumentType) -> Value {
    let mut result = match extractions {
        [] => Value::Object(Map::new()),
        [single] => single.data.clone(),
        many => merge_many(many, doc_type),
    };

    if doc_type == DocumentType::Drawdown {
        recompute_total_sum(&mut result);
    }
    result
}

fn merge_many(extractions: &[TileExtraction], doc_type: DocumentType) -> Value {
    let mut ordered: Vec<&TileExtraction> = extractions.iter().collect();
    ordered.sort_by_key(|extraction| extraction.tile_index.unwrap_or(usize::MAX));

    let array_field = spec_for(doc_type).array_field;
    let mut merged = Map::new();
    let mut rows: Vec<Value> = Vec::new();

    for extraction in ordered {
        let Some(object) = extraction.data.as_object() else {
            continue;
        };
        for (key, value) in object {
            if Some(key.as_str()) == array_field {
                if let Some(items) = value.as_array() {
                    rows.extend(items.iter().cloned());
                }
            } else if !value.is_null() {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    if let Some(field) = array_field {
        let deduped = dedupe_rows(rows, doc_type);
        merged.insert(field.to_string(), Value::Array(deduped));
    }

    Value::Object(merged)
}

/// Overwrite `totalSum` with the rounded sum of `drawdowns[*].amount`,
/// treating missing or non-numeric amounts as zero.
pub fn recompute_total_sum(result: &mut Value) {
    let sum: f64 = result["drawdowns"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|row| row["amount"].as_f64()).sum())
        .unwrap_or(0.0);
    let rounded = round2(sum);
    if let Some(object) = result.as_object_mut() {
        object.insert(
            "totalSum".to_string(),
            serde_json::Number::from_f64(rounded).map(Value::Number).unwrap_or(Value::Null),
        );
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
