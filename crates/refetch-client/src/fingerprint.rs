//! Query fingerprints and the per-client fingerprint registry.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

use fnv::FnvHasher;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::ResponseCache;
use crate::document::{Document, DocumentId};

/// Stable identifier of a canonical query text (64-bit FNV-1a).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(u64);

impl QueryId {
    /// Hash a canonical query text.
    #[must_use]
    pub fn from_canonical(canonical: &str) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write(canonical.as_bytes());
        Self(hasher.finish())
    }

    /// Wrap a raw hash value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw hash value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical text and ID of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Canonical text sent on the wire.
    pub canonical: Arc<str>,
    /// Hash of `canonical`.
    pub query_id: QueryId,
}

/// Maps document instances to fingerprints and owns the response cache.
///
/// Each document is canonicalized and hashed once; later lookups go through
/// the [`DocumentId`] map.
#[derive(Debug, Default)]
pub struct FingerprintRegistry {
    identities: Mutex<HashMap<DocumentId, Fingerprint>>,
    cache: ResponseCache,
}

impl FingerprintRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint `document`, registering it on first sight.
    pub fn identify(&self, document: &Document) -> Fingerprint {
        if let Some(known) = self.identities.lock().get(&document.id()) {
            return known.clone();
        }

        let canonical: Arc<str> = Arc::from(document.canonical());
        let fingerprint = Fingerprint {
            query_id: QueryId::from_canonical(&canonical),
            canonical,
        };
        let fingerprint = self
            .identities
            .lock()
            .entry(document.id())
            .or_insert(fingerprint)
            .clone();
        self.cache.register(fingerprint.query_id);
        fingerprint
    }

    /// Query ID of an already registered document, without registering it.
    #[must_use]
    pub fn query_id_of(&self, document: &Document) -> Option<QueryId> {
        self.identities
            .lock()
            .get(&document.id())
            .map(|fingerprint| fingerprint.query_id)
    }

    /// Number of registered document instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.lock().len()
    }

    /// Returns `true` if no document has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.lock().is_empty()
    }

    /// Response cache owned by this registry.
    #[must_use]
    pub const fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Forget every identity and discard every cache bucket.
    pub fn reset(&self) {
        self.identities.lock().clear();
        self.cache.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Field;

    fn todos() -> Document {
        Document::query("Todos")
            .field(Field::new("todos").fields(["id"]))
            .build()
    }

    #[test]
    fn fnv1a_reference_vectors() {
        assert_eq!(QueryId::from_canonical("").as_u64(), 0xcbf2_9ce4_8422_2325);
        assert_eq!(QueryId::from_canonical("a").as_u64(), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn identify_is_idempotent_and_registers_bucket() {
        let registry = FingerprintRegistry::new();
        let document = todos();
        assert!(registry.query_id_of(&document).is_none());

        let first = registry.identify(&document);
        assert_eq!(registry.query_id_of(&document), Some(first.query_id));
        let second = registry.identify(&document.clone());
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first.canonical, &second.canonical));
        assert!(registry.cache().is_registered(first.query_id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn identical_documents_share_an_id() {
        let registry = FingerprintRegistry::new();
        let a = registry.identify(&todos());
        let b = registry.identify(&todos());
        assert_eq!(a.query_id, b.query_id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reset_forgets_everything() {
        let registry = FingerprintRegistry::new();
        let fingerprint = registry.identify(&todos());
        registry.reset();
        assert!(registry.is_empty());
        assert!(!registry.cache().is_registered(fingerprint.query_id));
    }
}
