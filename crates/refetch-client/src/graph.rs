//! Query → entity type dependency graph.
//!
//! The graph is bipartite: query nodes point at the type nodes their
//! responses contained. Edges are only ever added. A query that stops
//! returning a type keeps its edge, which at worst causes an extra refetch.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::fingerprint::QueryId;

/// Graph node key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    /// `query:<id>`
    Query(QueryId),
    /// `type:<name>`
    Type(String),
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query(id) => write!(f, "query:{id}"),
            Self::Type(name) => write!(f, "type:{name}"),
        }
    }
}

#[derive(Debug, Default)]
struct Adjacency {
    queries: HashMap<QueryId, BTreeSet<String>>,
    types: HashMap<String, BTreeSet<QueryId>>,
}

/// Thread-safe dependency graph.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    inner: RwLock<Adjacency>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query node. No-op if present.
    pub fn add_query_node(&self, query_id: QueryId) {
        self.inner.write().queries.entry(query_id).or_default();
    }

    /// Add a type node. No-op if present.
    pub fn add_type_node(&self, typename: &str) {
        let mut inner = self.inner.write();
        if !inner.types.contains_key(typename) {
            inner.types.insert(typename.to_string(), BTreeSet::new());
        }
    }

    /// Record that `query_id` returned an entity of `typename`.
    ///
    /// Missing nodes are created. Returns `false` if the edge already existed.
    pub fn add_edge(&self, query_id: QueryId, typename: &str) -> bool {
        let mut inner = self.inner.write();
        let added = inner
            .queries
            .entry(query_id)
            .or_default()
            .insert(typename.to_string());
        if added {
            inner
                .types
                .entry(typename.to_string())
                .or_default()
                .insert(query_id);
        }
        added
    }

    /// Queries that have returned `typename`. Empty for unknown types.
    #[must_use]
    pub fn dependents_of(&self, typename: &str) -> BTreeSet<QueryId> {
        self.inner
            .read()
            .types
            .get(typename)
            .cloned()
            .unwrap_or_default()
    }

    /// Types recorded for `query_id`.
    #[must_use]
    pub fn types_of(&self, query_id: QueryId) -> BTreeSet<String> {
        self.inner
            .read()
            .queries
            .get(&query_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns `true` if the node exists.
    #[must_use]
    pub fn has_node(&self, node: &NodeKey) -> bool {
        let inner = self.inner.read();
        match node {
            NodeKey::Query(id) => inner.queries.contains_key(id),
            NodeKey::Type(name) => inner.types.contains_key(name),
        }
    }

    /// Total number of query and type nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let inner = self.inner.read();
        inner.queries.len() + inner.types.len()
    }

    /// Total number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.read().queries.values().map(BTreeSet::len).sum()
    }

    /// Remove every node and edge.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.queries.clear();
        inner.types.clear();
    }
}
