//! Tool handlers for the MCP server.

use rmcp::{ErrorData as McpError, model::JsonObject};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::batch::BatchError;
use crate::jobs::JobError;
use crate::query::QueryError;
use crate::retrieval::RetrievalError;

pub mod jobs;
pub mod metrics;
pub mod query;

/// Parse structured arguments supplied to a tool invocation.
pub(crate) fn parse_arguments<T: DeserializeOwned>(
    arguments: Option<JsonObject>,
) -> Result<T, McpError> {
    let value = arguments
        .map(Value::Object)
        .unwrap_or_else(|| Value::Object(JsonObject::new()));
    parse_arguments_value(value)
}

/// Deserialize arguments represented as a JSON value into the target type.
pub(crate) fn parse_arguments_value<T: DeserializeOwned>(value: Value) -> Result<T, McpError> {
    serde_json::from_value(value)
        .map_err(|err| McpError::invalid_params(format!("Invalid arguments: {err}"), None))
}

/// Map a job service failure onto an MCP error code.
pub(crate) fn job_error(error: JobError) -> McpError {
    match &error {
        JobError::NotFound(_) => McpError::resource_not_found(error.to_string(), None),
        JobError::InvalidRequest(_)
        | JobError::Conflict(_)
        | JobError::Batch(BatchError::Empty)
        | JobError::Batch(BatchError::Conflict(_))
        | JobError::Batch(BatchError::PayloadTooLarge { .. }) => {
            McpError::invalid_params(error.to_string(), None)
        }
        _ => {
            tracing::error!(error = %error, "Job tool failed");
            McpError::internal_error(error.to_string(), None)
        }
    }
}

/// Map a query failure onto an MCP error code.
pub(crate) fn query_error(error: QueryError) -> McpError {
    match &error {
        QueryError::NotFound(_) => McpError::resource_not_found(error.to_string(), None),
        QueryError::InvalidRequest(_)
        | QueryError::Retrieval(
            RetrievalError::NoSelectors
            | RetrievalError::MissingDefaultJob(_)
            | RetrievalError::InvalidRequest(_),
        ) => McpError::invalid_params(error.to_string(), None),
        _ => {
            tracing::error!(error = %error, "Query tool failed");
            McpError::internal_error(error.to_string(), None)
        }
    }
}
