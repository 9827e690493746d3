//! Final strip of internal tracking metadata before emission.

use serde_json::Value;

/// Remove every key beginning with `_` from an arbitrary JSON tree,
/// recursing through objects and arrays.
///
/// The pipeline stamps rows with `_tileIndex`-style back-references during
/// extraction; removing them at the boundary is a contractual obligation of
/// the response shape.
pub fn strip_internal_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !key.starts_with('_'));
            for child in map.values_mut() {
                strip_internal_keys(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_internal_keys(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strips_top_level_markers() {
        let mut value = json!({ "amount": 12.5, "_tileIndex": 3, "_pageIndex": 0 });
        strip_internal_keys(&mut value);
        assert_eq!(value, json!({ "amount": 12.5 }));
    }

    #[test]
    fn test_strips_nested_markers_in_arrays() {
        let mut value = json!({
            "drawdowns": [
                { "invoiceNumber": "FV1", "_tileIndex": 0, "_sliceIndex": 1 },
                { "invoiceNumber": "FV2", "_ocrCorrected": true }
            ],
            "totalSum": 10.0
        });
        strip_internal_keys(&mut value);
        assert_eq!(
            value,
            json!({
                "drawdowns": [
                    { "invoiceNumber": "FV1" },
                    { "invoiceNumber": "FV2" }
                ],
                "totalSum": 10.0
            })
        );
    }

    #[test]
    fn test_strips_deeply_nested_markers() {
        let mut value = json!({
            "outer": { "inner": [ { "_validationIssue": "checksum_failed", "keep": 1 } ] }
        });
        strip_internal_keys(&mut value);
        assert_eq!(value, json!({ "outer": { "inner": [ { "keep": 1 } ] } }));
    }

    #[test]
    fn test_leaves_scalars_untouched() {
        let mut value = json!("plain");
        strip_internal_keys(&mut value);
        assert_eq!(value, json!("plain"));
    }
}
