//! Strict-schema derivation for structured-output-capable back-ends.

use serde_json::Value;

/// Transform a JSON Schema so that every object node forbids additional
/// properties and requires every declared property.
///
/// The derivation recurses into `properties` values and `items`; non-object
/// nodes pass through untouched. The transform is idempotent: applying it to
/// its own output yields the same schema.
pub fn to_strict(schema: &Value) -> Value {
    let mut strict = schema.clone();
    tighten(&mut strict);
    strict
}

fn tighten(node: &mut Value) {
    let Some(object) = node.as_object_mut() else {
        return;
    };

    let property_names: Option<Vec<String>> = object
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| properties.keys().cloned().collect());

    if let Some(names) = property_names {
        object.insert("additionalProperties".to_string(), Value::Bool(false));
        object.insert(
            "required".to_string(),
            Value::Array(names.into_iter().map(Value::String).collect()),
        );
    }

    if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
        for child in properties.values_mut() {
            tighten(child);
        }
    }
    if let Some(items) = object.get_mut("items") {
        tighten(items);
    }
}
