//! Refetch client - GraphQL query engine with dependency-driven refetching.
//!
//! This crate provides:
//! - Canonical query documents and stable FNV-1a query identities.
//! - A response cache keyed by query identity and serialized variables.
//! - A query-to-type dependency graph built from `__typename` fields.
//! - Query and mutation execution with retry, backoff, timeouts and cancellation.
//! - Refetch signals that keep watched queries fresh after mutations.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]

mod broadcast;
mod cache;
mod client;
mod config;
mod document;
mod error;
mod fingerprint;
mod graph;
mod hooks;
mod merge;
mod operation;
mod retry;
mod typenames;
mod watch;

pub use broadcast::{RefetchBroadcaster, RefetchFuture, Subscription};
pub use cache::{ResponseCache, variables_key};
pub use client::{
    Client, ClientBuilder, ClientMetrics, ClientMetricsSnapshot, FetchPolicy, MutationOptions,
    QueryOptions,
};
pub use config::{ClientConfig, DEFAULT_TIMEOUT_MS};
pub use document::{
    ArgumentValue, Document, DocumentBuilder, DocumentId, Field, InlineFragment, OperationKind,
    Selection,
};
pub use error::{ApplicationErrors, ClientError, GraphqlError, HttpErrorInfo, TransportError};
pub use fingerprint::{Fingerprint, FingerprintRegistry, QueryId};
pub use graph::{DependencyGraph, NodeKey};
pub use hooks::{Hooks, RequestHook};
pub use merge::{merge_pages, merge_variables};
pub use operation::{GraphqlRequest, GraphqlResponse};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy, RetrySetting};
pub use typenames::{TYPENAME_FIELD, collect_typenames};
pub use watch::{QueryWatch, WatchState};

pub use tokio_util::sync::CancellationToken;
