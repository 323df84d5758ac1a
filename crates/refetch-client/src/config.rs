//! Serializable client configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::retry::RetrySetting;

/// Default per-attempt timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Client configuration as loaded from JSON or built in code.
///
/// ```json
/// {
///   "endpoint": "https://api.example.com/graphql",
///   "retry": {"retries": 3, "min_timeout_ms": 200},
///   "timeout_ms": 5000,
///   "cache": true,
///   "headers": {"x-client": "web"}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// GraphQL endpoint URL.
    pub endpoint: String,
    /// Retry setting: bool, count, or policy table.
    pub retry: RetrySetting,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Response caching.
    pub cache: bool,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            retry: RetrySetting::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            cache: true,
            headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Default configuration for `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Parse from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ClientError> {
        serde_json::from_str(text).map_err(|err| ClientError::config(err.to_string()))
    }

    /// Parse from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ClientError> {
        serde_json::from_value(value).map_err(|err| ClientError::config(err.to_string()))
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the endpoint and headers.
    pub fn validate(&self) -> Result<(), ClientError> {
        reqwest::Url::parse(&self.endpoint).map_err(|err| {
            ClientError::config(format!("invalid endpoint {:?}: {err}", self.endpoint))
        })?;
        if self.timeout_ms == 0 {
            return Err(ClientError::config("timeout_ms must be greater than zero"));
        }
        self.header_map().map(|_| ())
    }

    /// Headers as a reqwest header map.
    pub fn header_map(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| ClientError::config(format!("invalid header {name:?}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| ClientError::config(format!("invalid value for {name}: {err}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}
