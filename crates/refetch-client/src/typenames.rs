//! Type discriminator extraction from response payloads.

use std::collections::HashSet;

use serde_json::Value;

/// Field carrying an entity's type name.
pub const TYPENAME_FIELD: &str = "__typename";

/// Collect every `__typename` value found anywhere in `data`.
///
/// Objects and arrays are walked at any depth. The root object's own type
/// name is excluded wherever it appears. The result is deduplicated and
/// keeps first-seen order.
#[must_use]
pub fn collect_typenames(data: &Value) -> Vec<String> {
    let root = data.get(TYPENAME_FIELD).and_then(Value::as_str);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    scan(data, &mut |typename| {
        if Some(typename) != root && seen.insert(typename.to_string()) {
            out.push(typename.to_string());
        }
    });
    out
}

fn scan(value: &Value, visit: &mut impl FnMut(&str)) {
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                if key == TYPENAME_FIELD {
                    if let Some(typename) = item.as_str() {
                        visit(typename);
                    }
                    continue;
                }
                scan(item, visit);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan(item, visit);
            }
        }
        _ => {}
    }
}
