//! Response cache keyed by query ID and serialized variables.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::fingerprint::QueryId;

/// Serialize variables with object keys sorted at every depth.
///
/// Deeply equal variables always produce the same key. `null` is treated
/// as the empty variable set.
#[must_use]
pub fn variables_key(variables: &Value) -> String {
    match variables {
        Value::Null => "{}".to_string(),
        other => sorted(other).to_string(),
    }
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, item)| (key.clone(), sorted(item)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Per-query map from variables key to the last successful payload.
#[derive(Debug, Default)]
pub struct ResponseCache {
    buckets: RwLock<HashMap<QueryId, HashMap<String, Value>>>,
}

impl ResponseCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure an empty bucket exists for `query_id`.
    pub fn register(&self, query_id: QueryId) {
        self.buckets.write().entry(query_id).or_default();
    }

    /// Returns `true` if a bucket exists for `query_id`.
    #[must_use]
    pub fn is_registered(&self, query_id: QueryId) -> bool {
        self.buckets.read().contains_key(&query_id)
    }

    /// Cached payload for the given query and variables.
    #[must_use]
    pub fn get(&self, query_id: QueryId, variables: &Value) -> Option<Value> {
        let key = variables_key(variables);
        self.buckets
            .read()
            .get(&query_id)
            .and_then(|bucket| bucket.get(&key))
            .cloned()
    }

    /// Store a payload.
    pub fn set(&self, query_id: QueryId, variables: &Value, payload: Value) {
        let key = variables_key(variables);
        self.buckets
            .write()
            .entry(query_id)
            .or_default()
            .insert(key, payload);
    }

    /// Drop every payload cached for `query_id`. The bucket stays registered.
    pub fn invalidate(&self, query_id: QueryId) {
        if let Some(bucket) = self.buckets.write().get_mut(&query_id) {
            bucket.clear();
        }
    }

    /// Drop every cached payload.
    pub fn clear(&self) {
        for bucket in self.buckets.write().values_mut() {
            bucket.clear();
        }
    }

    /// Drop every bucket, registered or not.
    pub fn discard(&self) {
        self.buckets.write().clear();
    }

    /// Number of payloads cached for `query_id`.
    #[must_use]
    pub fn len(&self, query_id: QueryId) -> usize {
        self.buckets.read().get(&query_id).map_or(0, HashMap::len)
    }
}
