//! Wire request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApplicationErrors, ClientError, GraphqlError};

/// GraphQL request payload.
#[derive(Debug, Clone, Serialize)]
pub struct GraphqlRequest<'a> {
    /// Canonical query text.
    pub query: &'a str,
    /// Variables object.
    pub variables: &'a Value,
}

impl<'a> GraphqlRequest<'a> {
    /// Create a new request.
    #[must_use]
    pub const fn new(query: &'a str, variables: &'a Value) -> Self {
        Self { query, variables }
    }

    /// Serialize to the request body.
    pub fn to_body(&self) -> Result<Vec<u8>, ClientError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// GraphQL response container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphqlResponse {
    /// Response data.
    #[serde(default)]
    pub data: Option<Value>,
    /// GraphQL errors.
    #[serde(default)]
    pub errors: Option<Vec<GraphqlError>>,
    /// Extensions payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlResponse {
    /// Split into data or a classified error.
    ///
    /// Any `errors` array, even an empty one, makes the response an
    /// application failure.
    pub fn into_result(self) -> Result<Value, ClientError> {
        match (self.data, self.errors) {
            (_, Some(errors)) => Err(ClientError::Application(ApplicationErrors::new(errors))),
            (Some(data), _) => Ok(data),
            (None, _) => Err(ClientError::Protocol {
                message: "response carried neither data nor errors".to_string(),
            }),
        }
    }
}
