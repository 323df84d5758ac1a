//! Folding paginated results and variable overrides.

use serde_json::Value;

/// Fold `next` into `prev`.
///
/// Objects merge key by key, arrays concatenate, and anything else from
/// `next` replaces the previous value.
#[must_use]
pub fn merge_pages(prev: Value, next: Value) -> Value {
    match (prev, next) {
        (Value::Object(mut prev), Value::Object(next)) => {
            for (key, value) in next {
                let merged = match prev.remove(&key) {
                    Some(existing) => merge_pages(existing, value),
                    None => value,
                };
                prev.insert(key, merged);
            }
            Value::Object(prev)
        }
        (Value::Array(mut prev), Value::Array(next)) => {
            prev.extend(next);
            Value::Array(prev)
        }
        (_, next) => next,
    }
}

/// Deep-merge `overrides` into a copy of `base`. Nested objects merge,
/// everything else in `overrides` wins.
#[must_use]
pub fn merge_variables(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            let mut merged = base.clone();
            for (key, value) in overrides {
                let next = match merged.get(key) {
                    Some(existing) => merge_variables(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (base, Value::Null) => base.clone(),
        (_, overrides) => overrides.clone(),
    }
}
