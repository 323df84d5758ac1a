//! Error types for the query engine.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::QueryId;

/// HTTP error information captured from reqwest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorInfo {
    /// Error message.
    pub message: String,
    /// HTTP status code (if available).
    pub status_code: Option<u16>,
    /// Whether the error was a timeout.
    pub is_timeout: bool,
    /// Whether the error was a connection failure.
    pub is_connect: bool,
    /// Whether the error was a request error.
    pub is_request: bool,
}

impl From<reqwest::Error> for HttpErrorInfo {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            status_code: err.status().map(|status| status.as_u16()),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
            is_request: err.is_request(),
        }
    }
}

/// A single entry of a GraphQL `errors` array.
///
/// Only `message` is interpreted; every other field (`locations`, `path`,
/// `extensions`, vendor fields) is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
    /// Remaining fields of the entry.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GraphqlError {
    /// Create an error entry with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Look up an extra field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }
}

/// Ordered list of application errors returned with a 2xx status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationErrors(Vec<GraphqlError>);

impl ApplicationErrors {
    /// Wrap a list of error entries.
    #[must_use]
    pub const fn new(errors: Vec<GraphqlError>) -> Self {
        Self(errors)
    }

    /// Message of the first entry, used as the summary.
    #[must_use]
    pub fn message(&self) -> &str {
        self.0
            .first()
            .map(|error| error.message.as_str())
            .filter(|message| !message.is_empty())
            .unwrap_or("Request failed")
    }

    /// Iterate over the entries in server order.
    pub fn iter(&self) -> std::slice::Iter<'_, GraphqlError> {
        self.0.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the entries as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[GraphqlError] {
        &self.0
    }

    /// Consume into the underlying list.
    #[must_use]
    pub fn into_vec(self) -> Vec<GraphqlError> {
        self.0
    }
}

impl std::fmt::Display for ApplicationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())?;
        if self.0.len() > 1 {
            write!(f, " (and {} more)", self.0.len() - 1)?;
        }
        Ok(())
    }
}

impl IntoIterator for ApplicationErrors {
    type Item = GraphqlError;
    type IntoIter = std::vec::IntoIter<GraphqlError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ApplicationErrors {
    type Item = &'a GraphqlError;
    type IntoIter = std::slice::Iter<'a, GraphqlError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Transport-layer failure: the request never produced a usable 2xx body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network or connection failure.
    #[error("network error: {}", .0.message)]
    Http(HttpErrorInfo),

    /// Non-2xx response status.
    #[error("HTTP status {status} with body: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: StatusCode,
        /// Response body (truncated if needed).
        body: String,
    },

    /// The attempt exceeded its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Classify a reqwest failure, mapping timeouts to [`TransportError::Timeout`].
    #[must_use]
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Http(HttpErrorInfo::from(err))
        }
    }

    /// Returns `true` if another attempt could succeed.
    ///
    /// 4xx statuses are client errors and never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::HttpStatus { status, .. } => !status.is_client_error(),
        }
    }

    /// HTTP status, when the server answered.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Http(info) => info
                .status_code
                .and_then(|code| StatusCode::from_u16(code).ok()),
            Self::Timeout(_) => None,
        }
    }
}

/// Error type for query engine operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Network failure, non-2xx status, or attempt timeout.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered 2xx with an `errors` array.
    #[error("GraphQL errors: {0}")]
    Application(ApplicationErrors),

    /// The caller cancelled the invocation.
    #[error("request canceled")]
    Canceled,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(String),

    /// The response carried neither `data` nor `errors`.
    #[error("GraphQL protocol error: {message}")]
    Protocol {
        /// Details.
        message: String,
    },

    /// Invalid client configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// Details.
        message: String,
    },

    /// A subscriber failed to refetch while the mutation caller was waiting.
    #[error("refetch of query {query_id} failed: {source}")]
    Refetch {
        /// Query that failed to refetch.
        query_id: QueryId,
        /// Underlying failure.
        source: Box<ClientError>,
    },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(TransportError::Http(HttpErrorInfo::from(err)))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<ApplicationErrors> for ClientError {
    fn from(errors: ApplicationErrors) -> Self {
        Self::Application(errors)
    }
}

impl ClientError {
    /// Returns `true` for transport-layer failures.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` for application (GraphQL `errors`) failures.
    #[must_use]
    pub const fn is_application(&self) -> bool {
        matches!(self, Self::Application(_))
    }

    /// Returns `true` when the caller cancelled the invocation.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// HTTP status of a transport failure, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }

    /// Application error entries, if this is an application failure.
    #[must_use]
    pub const fn application_errors(&self) -> Option<&ApplicationErrors> {
        match self {
            Self::Application(errors) => Some(errors),
            _ => None,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
